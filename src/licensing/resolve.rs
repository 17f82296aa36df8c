//! Seat resolution: validate, heartbeat and force-validate.
//!
//! All three entry points run inside one IMMEDIATE transaction so every
//! seat-management decision for a license is serialized against concurrent
//! writers; without this, two activations could both observe "1 free slot"
//! and both succeed. They share a single `resolve_and_activate` routine whose
//! only mode switch is whether binding a new device is permitted; this keeps
//! the status gate, ceiling checks and token issuance from drifting apart
//! between paths.

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, ErrorCode, Result};
use crate::models::*;
use crate::tokens::{OfflineTokenIssuer, SessionTokenIssuer};

use super::response::{mask_fingerprint, SessionInfo, TerminatedSession, ValidationResponse};

const AUTO_RESOLVE_REASON: &str = "AUTO_RESOLVE_STALE";
const FORCE_VALIDATE_REASON: &str = "FORCE_VALIDATE";
const USER_DEACTIVATE_REASON: &str = "USER_DEACTIVATE";

pub struct ResolveContext<'a> {
    pub session_tokens: &'a SessionTokenIssuer,
    pub offline_tokens: &'a OfflineTokenIssuer,
    pub stale_threshold_minutes: i64,
}

/// Owner identity from the authenticated session, never client-supplied.
#[derive(Debug, Clone, Copy)]
pub struct Owner<'a> {
    pub kind: OwnerKind,
    pub id: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub fingerprint: String,
    pub client_version: Option<String>,
    pub client_os: Option<String>,
    pub client_ip: Option<String>,
    pub display_name: Option<String>,
}

/// First contact: may bind a new device, auto-resolving across candidate
/// licenses when the caller does not pin one.
pub fn validate_and_activate(
    conn: &mut Connection,
    ctx: &ResolveContext,
    owner: Owner,
    product_id: Option<&str>,
    license_id: Option<&str>,
    device: &DeviceInfo,
) -> Result<ValidationResponse> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let response = match license_id {
        Some(id) => {
            let license = load_owned_license(&tx, owner, id, product_id)?;
            resolve_and_activate(&tx, ctx, &license, device, true)?
        }
        None => {
            let candidates = load_candidates(&tx, owner, product_id)?;
            match candidates {
                Candidates::Usable(sorted) => auto_resolve(&tx, ctx, &sorted, device)?,
                // every candidate is unusable: surface the most specific
                // state failure from the best-ranked one
                Candidates::AllUnusable(best) => {
                    resolve_and_activate(&tx, ctx, &best, device, true)?
                }
            }
        }
    };

    tx.commit()?;
    Ok(response)
}

/// Keep-alive: renews an existing binding only, never creates one.
pub fn heartbeat(
    conn: &mut Connection,
    ctx: &ResolveContext,
    owner: Owner,
    product_id: Option<&str>,
    license_id: Option<&str>,
    device: &DeviceInfo,
) -> Result<ValidationResponse> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let response = match license_id {
        Some(id) => {
            let license = load_owned_license(&tx, owner, id, product_id)?;
            resolve_and_activate(&tx, ctx, &license, device, false)?
        }
        None => {
            let candidates = load_candidates(&tx, owner, product_id)?;
            match candidates {
                Candidates::AllUnusable(best) => {
                    resolve_and_activate(&tx, ctx, &best, device, false)?
                }
                Candidates::Usable(sorted) => {
                    // device affinity: heartbeat against whichever license
                    // knows this fingerprint, distinguishing "never bound"
                    // from "kicked elsewhere"
                    let mut found = None;
                    for license in &sorted {
                        if let Some(activation) =
                            queries::get_activation(&tx, &license.id, &device.fingerprint)?
                        {
                            if activation.status != ActivationStatus::Active {
                                return Err(ErrorCode::SessionDeactivated.into());
                            }
                            found = Some(resolve_and_activate(&tx, ctx, license, device, false)?);
                            break;
                        }
                    }
                    match found {
                        Some(response) => response,
                        None => return Err(ErrorCode::ActivationNotFound.into()),
                    }
                }
            }
        }
    };

    tx.commit()?;
    Ok(response)
}

/// Explicit kick after an ALL_LICENSES_FULL answer: deactivate the chosen
/// sessions, re-check the ceiling under the same lock (a concurrent
/// activation may have raced us), then activate.
pub fn force_validate(
    conn: &mut Connection,
    ctx: &ResolveContext,
    owner: Owner,
    license_id: &str,
    deactivate_activation_ids: &[String],
    device: &DeviceInfo,
) -> Result<ValidationResponse> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = load_owned_license(&tx, owner, license_id, None)?;

    let targets = queries::get_activations_by_ids(&tx, deactivate_activation_ids)?;
    for target in &targets {
        if target.license_id != license.id {
            return Err(AppError::license_with(
                ErrorCode::InvalidActivationOwnership,
                format!("session {} does not belong to license {}", target.id, license.id),
            ));
        }
    }
    for target in &targets {
        if target.status == ActivationStatus::Active {
            queries::deactivate_activation(&tx, &target.id, FORCE_VALIDATE_REASON)?;
        }
    }

    let now = Utc::now().timestamp();
    let session_threshold = now - license.session_ttl_secs();
    let stale_threshold = now - ctx.stale_threshold_minutes * 60;

    let remaining = queries::count_occupied_slots(&tx, &license.id, session_threshold)?;
    let has_own_slot = queries::get_activation(&tx, &license.id, &device.fingerprint)?
        .is_some_and(|a| a.occupies_slot(session_threshold));

    let response = if !has_own_slot && remaining >= license.policy.max_concurrent_sessions {
        // lost the race: another device activated between the 409 and the kick
        tracing::info!(license_id = %license.id, "force-validate raced a concurrent activation");
        let sessions = build_session_list(
            &tx,
            std::slice::from_ref(&license),
            session_threshold,
            stale_threshold,
        )?;
        ValidationResponse::all_licenses_full(sessions)
    } else {
        resolve_and_activate(&tx, ctx, &license, device, true)?
    };

    tx.commit()?;
    Ok(response)
}

/// Explicit self-release of one device.
pub fn deactivate_device(
    conn: &Connection,
    owner: Owner,
    license_id: &str,
    device_fingerprint: &str,
) -> Result<()> {
    let license = load_owned_license(conn, owner, license_id, None)?;
    let activation = queries::get_activation(conn, &license.id, device_fingerprint)?
        .ok_or_else(|| AppError::license(ErrorCode::ActivationNotFound))?;
    queries::deactivate_activation(conn, &activation.id, USER_DEACTIVATE_REASON)?;
    Ok(())
}

/// Load a license and verify it belongs to the caller (and, when the request
/// names a product, that the license matches it).
pub fn load_owned_license(
    conn: &Connection,
    owner: Owner,
    license_id: &str,
    product_id: Option<&str>,
) -> Result<License> {
    let license = queries::get_license_by_id(conn, license_id)?
        .ok_or_else(|| AppError::license(ErrorCode::LicenseNotFound))?;

    if !license.is_owned_by(owner.kind, owner.id) {
        return Err(ErrorCode::AccessDenied.into());
    }
    if let Some(product_id) = product_id {
        if license.product_id != product_id {
            return Err(AppError::license_with(
                ErrorCode::LicenseNotFoundForProduct,
                "pinned license does not belong to the requested product",
            ));
        }
    }
    Ok(license)
}

enum Candidates {
    /// Sorted by resolution priority, at least one entry.
    Usable(Vec<License>),
    /// No usable candidate; carries the best-ranked one for error reporting.
    AllUnusable(License),
}

fn load_candidates(
    conn: &Connection,
    owner: Owner,
    product_id: Option<&str>,
) -> Result<Candidates> {
    let raw = queries::find_candidate_licenses(conn, owner.kind, owner.id, product_id)?;
    if raw.is_empty() {
        return Err(ErrorCode::LicenseNotFoundForProduct.into());
    }

    let now = Utc::now().timestamp();
    let mut sorted = raw;
    sort_candidates(&mut sorted, now);

    let usable: Vec<License> = sorted
        .iter()
        .filter(|l| l.calculate_effective_status(now).is_usable())
        .cloned()
        .collect();

    if usable.is_empty() {
        let best = sorted.into_iter().next().expect("non-empty candidate set");
        return Ok(Candidates::AllUnusable(best));
    }
    Ok(Candidates::Usable(usable))
}

/// Deterministic candidate priority: ACTIVE before EXPIRED_GRACE, then
/// descending validUntil (perpetual ranks highest), id as final tiebreak.
fn sort_candidates(candidates: &mut [License], now: i64) {
    candidates.sort_by(|a, b| {
        let rank = |l: &License| match l.calculate_effective_status(now) {
            LicenseStatus::Active => 0,
            LicenseStatus::ExpiredGrace => 1,
            _ => 2,
        };
        let until = |l: &License| l.valid_until.unwrap_or(i64::MAX);
        rank(a)
            .cmp(&rank(b))
            .then(until(b).cmp(&until(a)))
            .then(a.id.cmp(&b.id))
    });
}

/// Two-Pass Auto-Resolve over the sorted candidate set.
fn auto_resolve(
    conn: &Connection,
    ctx: &ResolveContext,
    sorted: &[License],
    device: &DeviceInfo,
) -> Result<ValidationResponse> {
    let now = Utc::now().timestamp();
    // candidates of one owner share plan policy in practice; thresholds come
    // from the best-ranked one
    let session_threshold = now - sorted[0].session_ttl_secs();
    let stale_threshold = now - ctx.stale_threshold_minutes * 60;

    // Pass 1a, device affinity: sticky-route to a license this device
    // already holds a live slot on.
    for license in sorted {
        if let Some(activation) = queries::get_activation(conn, &license.id, &device.fingerprint)? {
            if activation.occupies_slot(session_threshold) {
                tracing::debug!(license_id = %license.id, "auto-resolve: device affinity");
                return resolve_and_activate(conn, ctx, license, device, true);
            }
        }
    }

    // Pass 1b: first license with a free slot.
    for license in sorted {
        let occupied = queries::count_occupied_slots(conn, &license.id, session_threshold)?;
        if occupied < license.policy.max_concurrent_sessions {
            tracing::debug!(
                license_id = %license.id,
                occupied,
                max = license.policy.max_concurrent_sessions,
                "auto-resolve: free slot"
            );
            return resolve_and_activate(conn, ctx, license, device, true);
        }
    }

    // Pass 2: reclaim exactly the single oldest stale session.
    for license in sorted {
        let stale = queries::find_stale_activations(conn, &license.id, stale_threshold)?;
        if let Some(oldest) = stale.first() {
            tracing::info!(
                activation_id = %oldest.id,
                license_id = %license.id,
                last_seen_at = oldest.last_seen_at,
                "auto-resolve: terminating stale session"
            );
            queries::deactivate_activation(conn, &oldest.id, AUTO_RESOLVE_REASON)?;

            let response = resolve_and_activate(conn, ctx, license, device, true)?;
            if response.valid {
                return Ok(response.with_recovery(TerminatedSession {
                    device_display_name: oldest
                        .device_display_name
                        .clone()
                        .unwrap_or_else(|| "Unknown Device".to_string()),
                    last_seen_at: oldest.last_seen_at,
                }));
            }
            return Ok(response);
        }
    }

    // Everything is full and live: hand the caller the complete session list.
    tracing::info!(candidates = sorted.len(), "auto-resolve: all licenses full");
    let sessions = build_session_list(conn, sorted, session_threshold, stale_threshold)?;
    Ok(ValidationResponse::all_licenses_full(sessions))
}

/// The shared resolve routine. `allow_new_activation` is the only difference
/// between validate (true) and heartbeat (false).
fn resolve_and_activate(
    conn: &Connection,
    ctx: &ResolveContext,
    license: &License,
    device: &DeviceInfo,
    allow_new_activation: bool,
) -> Result<ValidationResponse> {
    let now = Utc::now().timestamp();

    let effective = license.calculate_effective_status(now);
    match effective {
        LicenseStatus::ExpiredHard => {
            return Ok(ValidationResponse::failure(ErrorCode::LicenseExpired))
        }
        LicenseStatus::Suspended => {
            return Ok(ValidationResponse::failure(ErrorCode::LicenseSuspended))
        }
        LicenseStatus::Revoked => {
            return Ok(ValidationResponse::failure(ErrorCode::LicenseRevoked))
        }
        LicenseStatus::Pending => {
            return Ok(ValidationResponse::failure(ErrorCode::InvalidLicenseState))
        }
        LicenseStatus::Active | LicenseStatus::ExpiredGrace => {}
    }

    let session_threshold = now - license.session_ttl_secs();
    let existing = queries::get_activation(conn, &license.id, &device.fingerprint)?;

    if !allow_new_activation {
        match &existing {
            None => return Err(ErrorCode::ActivationNotFound.into()),
            Some(activation) if activation.status != ActivationStatus::Active => {
                return Err(ErrorCode::SessionDeactivated.into())
            }
            // a TTL-lapsed but still ACTIVE binding may renew via heartbeat
            Some(_) => {}
        }
    }

    // Concurrency ceiling: a device without a live slot needs a free one.
    let has_own_slot = existing
        .as_ref()
        .is_some_and(|a| a.occupies_slot(session_threshold));
    if !has_own_slot {
        let others = queries::count_other_occupied_slots(
            conn,
            &license.id,
            session_threshold,
            &device.fingerprint,
        )?;
        if others >= license.policy.max_concurrent_sessions {
            let stale_threshold = now - ctx.stale_threshold_minutes * 60;
            let sessions = build_session_list(
                conn,
                std::slice::from_ref(license),
                session_threshold,
                stale_threshold,
            )?;
            return Ok(ValidationResponse::all_licenses_full(sessions));
        }
    }

    // Seat ceiling: only a never-seen device consumes a seat.
    if existing.is_none() {
        let seats = queries::count_seats(conn, &license.id)?;
        if seats >= license.policy.max_activations {
            return Ok(ValidationResponse::failure(
                ErrorCode::ActivationLimitExceeded,
            ));
        }
    }

    // Bind or refresh the row for this fingerprint.
    let activation = match existing {
        Some(activation) => {
            queries::touch_activation(
                conn,
                &activation.id,
                now,
                device.client_version.as_deref(),
                device.client_os.as_deref(),
                device.client_ip.as_deref(),
                device.display_name.as_deref(),
            )?;
            queries::get_activation(conn, &license.id, &device.fingerprint)?
                .ok_or_else(|| AppError::Internal("activation row vanished mid-transaction".into()))?
        }
        None => {
            let activation = Activation {
                id: queries::gen_id(),
                license_id: license.id.clone(),
                device_fingerprint: device.fingerprint.clone(),
                status: ActivationStatus::Active,
                deactivated_reason: None,
                device_display_name: device.display_name.clone(),
                client_version: device.client_version.clone(),
                client_os: device.client_os.clone(),
                client_ip: device.client_ip.clone(),
                offline_token: None,
                offline_token_expires_at: None,
                activated_at: now,
                last_seen_at: now,
            };
            queries::insert_activation(conn, &activation)?;
            activation
        }
    };

    let entitlements = license.policy.entitlements.clone();
    let product_code = resolve_product_code(conn, &license.product_id)?;

    // Offline token: reuse the cached one until the renewal policy triggers.
    let mut offline_token = activation.offline_token.clone();
    let mut offline_token_expires_at = activation.offline_token_expires_at;
    if ctx.offline_tokens.should_renew(
        offline_token_expires_at,
        license.policy.allow_offline_days,
        now,
    ) {
        if let Some(token) = ctx.offline_tokens.issue(
            &license.id,
            &product_code,
            &device.fingerprint,
            &entitlements,
            license.policy.allow_offline_days,
            license.valid_until,
        )? {
            queries::set_offline_token(conn, &activation.id, &token.token, token.expires_at)?;
            offline_token = Some(token.token);
            offline_token_expires_at = Some(token.expires_at);
        }
    }

    let session_token = ctx
        .session_tokens
        .issue(&license.id, &product_code, &device.fingerprint, &entitlements)?
        .map(|t| t.token);

    Ok(ValidationResponse::success(
        license.id.clone(),
        effective,
        license.valid_until,
        entitlements,
        session_token,
        offline_token,
        offline_token_expires_at,
    ))
}

fn resolve_product_code(conn: &Connection, product_id: &str) -> Result<String> {
    Ok(queries::get_product_by_id(conn, product_id)?
        .map(|p| p.code)
        .unwrap_or_else(|| format!("PRODUCT_{}", &product_id[..product_id.len().min(8)])))
}

/// Aggregate every occupied slot across the candidate licenses, most recently
/// seen first, fingerprints masked.
fn build_session_list(
    conn: &Connection,
    licenses: &[License],
    session_threshold: i64,
    stale_threshold: i64,
) -> Result<Vec<SessionInfo>> {
    let mut sessions = Vec::new();

    for license in licenses {
        let plan_name = match &license.plan_id {
            Some(plan_id) => queries::get_plan_by_id(conn, plan_id)?
                .map(|p| p.name)
                .unwrap_or_else(|| "Unknown plan".to_string()),
            None => "Default plan".to_string(),
        };
        let product_name = queries::get_product_by_id(conn, &license.product_id)?
            .map(|p| p.name)
            .unwrap_or_else(|| "Unknown product".to_string());

        for activation in queries::list_occupied_slots(conn, &license.id, session_threshold)? {
            sessions.push(SessionInfo {
                license_id: license.id.clone(),
                product_name: product_name.clone(),
                plan_name: plan_name.clone(),
                activation_id: activation.id,
                device_display_name: activation.device_display_name,
                device_fingerprint: mask_fingerprint(&activation.device_fingerprint),
                last_seen_at: activation.last_seen_at,
                client_os: activation.client_os,
                client_version: activation.client_version,
                is_stale: activation.last_seen_at < stale_threshold,
            });
        }
    }

    sessions.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
    Ok(sessions)
}
