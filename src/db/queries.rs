use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    query_all, query_one, ACTIVATION_COLS, CAMPAIGN_COLS, LICENSE_COLS, PLAN_COLS, PRODUCT_COLS,
    REDEEM_CODE_COLS, REDEMPTION_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Catalog (collaborator lookups) ============

pub fn create_product(conn: &Connection, code: &str, name: &str) -> Result<Product> {
    let product = Product {
        id: gen_id(),
        code: code.to_string(),
        name: name.to_string(),
        is_active: true,
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO products (id, code, name, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            product.id,
            product.code,
            product.name,
            product.is_active,
            product.created_at
        ],
    )?;
    Ok(product)
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn get_product_by_code(conn: &Connection, code: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM products WHERE code = ?1 AND is_active = 1",
            PRODUCT_COLS
        ),
        &[&code],
    )
}

pub fn create_plan(conn: &Connection, input: &CreatePlan) -> Result<Plan> {
    let plan = Plan {
        id: gen_id(),
        code: input.code.clone(),
        name: input.name.clone(),
        product_id: input.product_id.clone(),
        license_type: input.license_type,
        duration_days: input.duration_days,
        max_activations: input.max_activations,
        max_concurrent_sessions: input.max_concurrent_sessions,
        session_ttl_minutes: input.session_ttl_minutes,
        grace_period_days: input.grace_period_days,
        allow_offline_days: input.allow_offline_days,
        entitlements: input.entitlements.clone(),
        is_active: true,
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO plans (id, code, name, product_id, license_type, duration_days,
                            max_activations, max_concurrent_sessions, session_ttl_minutes,
                            grace_period_days, allow_offline_days, entitlements, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            plan.id,
            plan.code,
            plan.name,
            plan.product_id,
            plan.license_type.as_ref(),
            plan.duration_days,
            plan.max_activations,
            plan.max_concurrent_sessions,
            plan.session_ttl_minutes,
            plan.grace_period_days,
            plan.allow_offline_days,
            serde_json::to_string(&plan.entitlements)?,
            plan.is_active,
            plan.created_at
        ],
    )?;
    Ok(plan)
}

pub fn get_plan_by_id(conn: &Connection, id: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plans WHERE id = ?1", PLAN_COLS),
        &[&id],
    )
}

/// Active, non-disabled plans only; disabled plans cannot back new issuance.
pub fn get_available_plan_by_id(conn: &Connection, id: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM plans WHERE id = ?1 AND is_active = 1",
            PLAN_COLS
        ),
        &[&id],
    )
}

pub fn get_available_plan_by_code(conn: &Connection, code: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM plans WHERE code = ?1 AND is_active = 1",
            PLAN_COLS
        ),
        &[&code],
    )
}

// ============ Licenses ============

pub fn insert_license(conn: &Connection, license: &License) -> Result<()> {
    conn.execute(
        "INSERT INTO licenses (id, license_key, owner_kind, owner_id, product_id, plan_id,
                               license_type, usage_category, status, suspend_reason, revoke_reason,
                               valid_from, valid_until, policy_snapshot, source_order_id,
                               created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            license.id,
            license.license_key,
            license.owner_kind.as_ref(),
            license.owner_id,
            license.product_id,
            license.plan_id,
            license.license_type.as_ref(),
            license.usage_category.as_ref(),
            license.status.as_ref(),
            license.suspend_reason,
            license.revoke_reason,
            license.valid_from,
            license.valid_until,
            serde_json::to_string(&license.policy)?,
            license.source_order_id,
            license.created_at,
            license.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE license_key = ?1",
            LICENSE_COLS
        ),
        &[&license_key],
    )
}

pub fn get_license_by_source_order(conn: &Connection, order_id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE source_order_id = ?1",
            LICENSE_COLS
        ),
        &[&order_id],
    )
}

pub fn license_key_exists(conn: &Connection, license_key: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE license_key = ?1",
        params![license_key],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// The one-license-per-(owner, product) invariant check: any non-revoked row.
pub fn find_nonrevoked_license(
    conn: &Connection,
    owner_kind: OwnerKind,
    owner_id: &str,
    product_id: &str,
) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses
             WHERE owner_kind = ?1 AND owner_id = ?2 AND product_id = ?3 AND status != 'revoked'",
            LICENSE_COLS
        ),
        &[&owner_kind.as_ref(), &owner_id, &product_id],
    )
}

pub fn list_licenses_by_owner(
    conn: &Connection,
    owner_kind: OwnerKind,
    owner_id: &str,
    product_id: Option<&str>,
) -> Result<Vec<License>> {
    match product_id {
        Some(product_id) => query_all(
            conn,
            &format!(
                "SELECT {} FROM licenses
                 WHERE owner_kind = ?1 AND owner_id = ?2 AND product_id = ?3
                 ORDER BY created_at DESC",
                LICENSE_COLS
            ),
            &[&owner_kind.as_ref(), &owner_id, &product_id],
        ),
        None => query_all(
            conn,
            &format!(
                "SELECT {} FROM licenses
                 WHERE owner_kind = ?1 AND owner_id = ?2
                 ORDER BY created_at DESC",
                LICENSE_COLS
            ),
            &[&owner_kind.as_ref(), &owner_id],
        ),
    }
}

/// Candidate set for auto-resolve: stored-active licenses for the owner,
/// optionally narrowed to one product. Effective-status filtering (ACTIVE /
/// EXPIRED_GRACE) happens in the resolve layer, which owns `now`.
pub fn find_candidate_licenses(
    conn: &Connection,
    owner_kind: OwnerKind,
    owner_id: &str,
    product_id: Option<&str>,
) -> Result<Vec<License>> {
    match product_id {
        Some(product_id) => query_all(
            conn,
            &format!(
                "SELECT {} FROM licenses
                 WHERE owner_kind = ?1 AND owner_id = ?2 AND product_id = ?3 AND status = 'active'",
                LICENSE_COLS
            ),
            &[&owner_kind.as_ref(), &owner_id, &product_id],
        ),
        None => query_all(
            conn,
            &format!(
                "SELECT {} FROM licenses
                 WHERE owner_kind = ?1 AND owner_id = ?2 AND status = 'active'",
                LICENSE_COLS
            ),
            &[&owner_kind.as_ref(), &owner_id],
        ),
    }
}

pub fn set_license_active(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET status = 'active', updated_at = ?2 WHERE id = ?1 AND status = 'pending'",
        params![id, now()],
    )?;
    Ok(affected > 0)
}

pub fn set_license_suspended(conn: &Connection, id: &str, reason: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET status = 'suspended', suspend_reason = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'active'",
        params![id, reason, now()],
    )?;
    Ok(affected > 0)
}

pub fn set_license_unsuspended(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET status = 'active', suspend_reason = NULL, updated_at = ?2
         WHERE id = ?1 AND status = 'suspended'",
        params![id, now()],
    )?;
    Ok(affected > 0)
}

/// Revocation is terminal; any non-revoked state may transition here.
pub fn set_license_revoked(conn: &Connection, id: &str, reason: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET status = 'revoked', revoke_reason = ?2, updated_at = ?3
         WHERE id = ?1 AND status != 'revoked'",
        params![id, reason, now()],
    )?;
    Ok(affected > 0)
}

pub fn set_license_valid_until(conn: &Connection, id: &str, valid_until: Option<i64>) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET valid_until = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, valid_until, now()],
    )?;
    Ok(affected > 0)
}

// ============ Activations ============

pub fn list_activations(conn: &Connection, license_id: &str) -> Result<Vec<Activation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_id = ?1 ORDER BY activated_at DESC",
            ACTIVATION_COLS
        ),
        &[&license_id],
    )
}

pub fn get_activation(
    conn: &Connection,
    license_id: &str,
    device_fingerprint: &str,
) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_id = ?1 AND device_fingerprint = ?2",
            ACTIVATION_COLS
        ),
        &[&license_id, &device_fingerprint],
    )
}

pub fn get_activations_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Activation>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT {} FROM activations WHERE id IN ({})",
        ACTIVATION_COLS,
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(ids.iter()),
            <Activation as super::from_row::FromRow>::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_activation(conn: &Connection, activation: &Activation) -> Result<()> {
    conn.execute(
        "INSERT INTO activations (id, license_id, device_fingerprint, status, deactivated_reason,
                                  device_display_name, client_version, client_os, client_ip,
                                  offline_token, offline_token_expires_at, activated_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            activation.id,
            activation.license_id,
            activation.device_fingerprint,
            activation.status.as_ref(),
            activation.deactivated_reason,
            activation.device_display_name,
            activation.client_version,
            activation.client_os,
            activation.client_ip,
            activation.offline_token,
            activation.offline_token_expires_at,
            activation.activated_at,
            activation.last_seen_at
        ],
    )?;
    Ok(())
}

/// Refresh a binding: mark active, bump last_seen_at and overwrite any client
/// metadata the caller supplied (absent fields keep their stored value).
pub fn touch_activation(
    conn: &Connection,
    id: &str,
    seen_at: i64,
    client_version: Option<&str>,
    client_os: Option<&str>,
    client_ip: Option<&str>,
    device_display_name: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE activations
         SET status = 'active',
             deactivated_reason = NULL,
             last_seen_at = ?2,
             client_version = COALESCE(?3, client_version),
             client_os = COALESCE(?4, client_os),
             client_ip = COALESCE(?5, client_ip),
             device_display_name = COALESCE(?6, device_display_name)
         WHERE id = ?1",
        params![id, seen_at, client_version, client_os, client_ip, device_display_name],
    )?;
    Ok(())
}

pub fn deactivate_activation(conn: &Connection, id: &str, reason: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE activations SET status = 'deactivated', deactivated_reason = ?2
         WHERE id = ?1 AND status = 'active'",
        params![id, reason],
    )?;
    Ok(affected > 0)
}

pub fn set_offline_token(
    conn: &Connection,
    id: &str,
    token: &str,
    expires_at: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE activations SET offline_token = ?2, offline_token_expires_at = ?3 WHERE id = ?1",
        params![id, token, expires_at],
    )?;
    Ok(())
}

/// Non-deactivated rows bound to the license: the seat-inventory count
/// checked against `maxActivations`.
pub fn count_seats(conn: &Connection, license_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM activations WHERE license_id = ?1 AND status != 'deactivated'",
        params![license_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Activations currently occupying a concurrency slot (ACTIVE and seen within
/// the session TTL), checked against `maxConcurrentSessions`.
pub fn count_occupied_slots(
    conn: &Connection,
    license_id: &str,
    session_threshold: i64,
) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM activations
         WHERE license_id = ?1 AND status = 'active' AND last_seen_at >= ?2",
        params![license_id, session_threshold],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Same count, excluding the caller's own device (re-validation must not
/// count itself against the limit).
pub fn count_other_occupied_slots(
    conn: &Connection,
    license_id: &str,
    session_threshold: i64,
    device_fingerprint: &str,
) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM activations
         WHERE license_id = ?1 AND status = 'active' AND last_seen_at >= ?2
           AND device_fingerprint != ?3",
        params![license_id, session_threshold, device_fingerprint],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Occupied slots, most recently seen first (for the ALL_LICENSES_FULL list).
pub fn list_occupied_slots(
    conn: &Connection,
    license_id: &str,
    session_threshold: i64,
) -> Result<Vec<Activation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activations
             WHERE license_id = ?1 AND status = 'active' AND last_seen_at >= ?2
             ORDER BY last_seen_at DESC",
            ACTIVATION_COLS
        ),
        &[&license_id, &session_threshold],
    )
}

/// ACTIVE activations not seen since the stale threshold, oldest first so the
/// reclaim pass terminates exactly the longest-silent one.
pub fn find_stale_activations(
    conn: &Connection,
    license_id: &str,
    stale_threshold: i64,
) -> Result<Vec<Activation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activations
             WHERE license_id = ?1 AND status = 'active' AND last_seen_at < ?2
             ORDER BY last_seen_at ASC",
            ACTIVATION_COLS
        ),
        &[&license_id, &stale_threshold],
    )
}

// ============ Redeem ============

pub fn create_campaign(conn: &Connection, input: &CreateCampaign) -> Result<RedeemCampaign> {
    let ts = now();
    let campaign = RedeemCampaign {
        id: gen_id(),
        name: input.name.clone(),
        description: input.description.clone(),
        product_id: input.product_id.clone(),
        plan_id: input.plan_id.clone(),
        usage_category: input.usage_category,
        seat_limit: input.seat_limit,
        seats_used: 0,
        per_user_limit: input.per_user_limit.max(1),
        status: CampaignStatus::Active,
        valid_from: input.valid_from,
        valid_until: input.valid_until,
        created_at: ts,
        updated_at: ts,
    };
    conn.execute(
        "INSERT INTO redeem_campaigns (id, name, description, product_id, plan_id, usage_category,
                                       seat_limit, seats_used, per_user_limit, status,
                                       valid_from, valid_until, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            campaign.id,
            campaign.name,
            campaign.description,
            campaign.product_id,
            campaign.plan_id,
            campaign.usage_category.as_ref(),
            campaign.seat_limit,
            campaign.seats_used,
            campaign.per_user_limit,
            campaign.status.as_ref(),
            campaign.valid_from,
            campaign.valid_until,
            campaign.created_at,
            campaign.updated_at
        ],
    )?;
    Ok(campaign)
}

pub fn get_campaign_by_id(conn: &Connection, id: &str) -> Result<Option<RedeemCampaign>> {
    query_one(
        conn,
        &format!("SELECT {} FROM redeem_campaigns WHERE id = ?1", CAMPAIGN_COLS),
        &[&id],
    )
}

pub fn set_campaign_status(conn: &Connection, id: &str, status: CampaignStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE redeem_campaigns SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_ref(), now()],
    )?;
    Ok(affected > 0)
}

pub fn create_code(
    conn: &Connection,
    campaign_id: &str,
    code_hash: &str,
    max_redemptions: i64,
    expires_at: Option<i64>,
) -> Result<RedeemCode> {
    let ts = now();
    let code = RedeemCode {
        id: gen_id(),
        campaign_id: campaign_id.to_string(),
        code_hash: code_hash.to_string(),
        max_redemptions,
        current_redemptions: 0,
        active: true,
        expires_at,
        created_at: ts,
        updated_at: ts,
    };
    conn.execute(
        "INSERT INTO redeem_codes (id, campaign_id, code_hash, max_redemptions,
                                   current_redemptions, is_active, expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            code.id,
            code.campaign_id,
            code.code_hash,
            code.max_redemptions,
            code.current_redemptions,
            code.active,
            code.expires_at,
            code.created_at,
            code.updated_at
        ],
    )?;
    Ok(code)
}

pub fn code_hash_exists(conn: &Connection, code_hash: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM redeem_codes WHERE code_hash = ?1",
        params![code_hash],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn get_code_by_hash(conn: &Connection, code_hash: &str) -> Result<Option<RedeemCode>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM redeem_codes WHERE code_hash = ?1",
            REDEEM_CODE_COLS
        ),
        &[&code_hash],
    )
}

/// Atomic conditional increment of the code's redemption counter. Returns
/// false (zero rows) when the increment would exceed `max_redemptions` or the
/// code is disabled; the caller maps that to REDEEM_CODE_DEPLETED. Must stay
/// a single UPDATE: a read-then-write here loses races between concurrent
/// claims of the same code.
pub fn increment_code_redemptions(conn: &Connection, code_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE redeem_codes
         SET current_redemptions = current_redemptions + 1, updated_at = ?2
         WHERE id = ?1 AND current_redemptions < max_redemptions AND is_active = 1",
        params![code_id, now()],
    )?;
    Ok(affected > 0)
}

/// Atomic conditional increment of the campaign seat counter; false means the
/// campaign is full. Same single-statement rule as the code counter.
pub fn increment_campaign_seats(conn: &Connection, campaign_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE redeem_campaigns
         SET seats_used = seats_used + 1, updated_at = ?2
         WHERE id = ?1 AND (seat_limit IS NULL OR seats_used < seat_limit)",
        params![campaign_id, now()],
    )?;
    Ok(affected > 0)
}

pub fn get_user_claim_count(
    conn: &Connection,
    user_id: &str,
    campaign_id: &str,
) -> Result<i64> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT claim_count FROM redeem_user_counters WHERE user_id = ?1 AND campaign_id = ?2",
            params![user_id, campaign_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}

pub fn increment_user_claim_count(
    conn: &Connection,
    user_id: &str,
    campaign_id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO redeem_user_counters (user_id, campaign_id, claim_count) VALUES (?1, ?2, 1)
         ON CONFLICT(user_id, campaign_id) DO UPDATE SET claim_count = claim_count + 1",
        params![user_id, campaign_id],
    )?;
    Ok(())
}

pub fn list_redemptions_by_user(conn: &Connection, user_id: &str) -> Result<Vec<RedeemRedemption>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM redeem_redemptions WHERE user_id = ?1 ORDER BY created_at DESC",
            REDEMPTION_COLS
        ),
        &[&user_id],
    )
}

pub fn insert_redemption(conn: &Connection, redemption: &RedeemRedemption) -> Result<()> {
    conn.execute(
        "INSERT INTO redeem_redemptions (id, code_id, campaign_id, user_id, license_id,
                                         ip_address, user_agent, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            redemption.id,
            redemption.code_id,
            redemption.campaign_id,
            redemption.user_id,
            redemption.license_id,
            redemption.ip_address,
            redemption.user_agent,
            redemption.created_at
        ],
    )?;
    Ok(())
}
