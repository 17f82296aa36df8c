//! License issuance and lifecycle transitions.
//!
//! These are the internal collaborator surface: billing calls issue/renew/
//! revoke-by-order, admin calls suspend/unsuspend/revoke, and the redeem
//! pipeline ends in [`issue_license_with_plan`]. None of this is mounted as a
//! public route.

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::queries;
use crate::error::{AppError, ErrorCode, Result};
use crate::models::*;

const SECONDS_PER_DAY: i64 = 86400;

#[derive(Debug, Clone)]
pub struct IssueLicense {
    pub owner_kind: OwnerKind,
    pub owner_id: String,
    pub product_id: String,
    pub plan_id: Option<String>,
    pub license_type: LicenseType,
    pub usage_category: UsageCategory,
    pub valid_from: i64,
    pub valid_until: Option<i64>,
    /// None captures the default policy; billing passes a plan snapshot.
    pub policy: Option<PolicySnapshot>,
    pub source_order_id: Option<String>,
}

/// Issue a license. Enforces the one-non-revoked-license-per-(owner, product)
/// invariant, generates a globally unique key, and activates immediately
/// (issuance only happens after payment or a successful claim).
pub fn issue_license(conn: &Connection, input: IssueLicense) -> Result<License> {
    if let Some(existing) = queries::find_nonrevoked_license(
        conn,
        input.owner_kind,
        &input.owner_id,
        &input.product_id,
    )? {
        return Err(AppError::license_with(
            ErrorCode::LicenseAlreadyExists,
            format!("existing license {}", existing.id),
        ));
    }

    let now = Utc::now().timestamp();
    let license = License {
        id: queries::gen_id(),
        license_key: generate_license_key(conn)?,
        owner_kind: input.owner_kind,
        owner_id: input.owner_id,
        product_id: input.product_id,
        plan_id: input.plan_id,
        license_type: input.license_type,
        usage_category: input.usage_category,
        status: StoredStatus::Active,
        suspend_reason: None,
        revoke_reason: None,
        valid_from: input.valid_from,
        valid_until: input.valid_until,
        policy: input.policy.unwrap_or_default(),
        source_order_id: input.source_order_id,
        created_at: now,
        updated_at: now,
    };

    queries::insert_license(conn, &license)?;
    tracing::info!(license_id = %license.id, product_id = %license.product_id, "license issued");
    Ok(license)
}

/// Plan-based issuance: the plan supplies the policy snapshot and the
/// validity window (perpetual plans have no validUntil).
pub fn issue_license_with_plan(
    conn: &Connection,
    owner_kind: OwnerKind,
    owner_id: &str,
    plan_id: &str,
    source_order_id: Option<&str>,
    usage_category: UsageCategory,
) -> Result<License> {
    let plan = queries::get_available_plan_by_id(conn, plan_id)?
        .ok_or_else(|| AppError::license(ErrorCode::PlanNotAvailable))?;

    let now = Utc::now().timestamp();
    let valid_until = match plan.license_type {
        LicenseType::Perpetual => None,
        LicenseType::Subscription => {
            let days = plan.duration_days.unwrap_or(365);
            Some(now + days * SECONDS_PER_DAY)
        }
    };

    issue_license(
        conn,
        IssueLicense {
            owner_kind,
            owner_id: owner_id.to_string(),
            product_id: plan.product_id.clone(),
            plan_id: Some(plan.id.clone()),
            license_type: plan.license_type,
            usage_category,
            valid_from: now,
            valid_until,
            policy: Some(plan.policy_snapshot()),
            source_order_id: source_order_id.map(String::from),
        },
    )
}

pub fn issue_license_with_plan_code(
    conn: &Connection,
    owner_kind: OwnerKind,
    owner_id: &str,
    plan_code: &str,
    source_order_id: Option<&str>,
    usage_category: UsageCategory,
) -> Result<License> {
    let plan = queries::get_available_plan_by_code(conn, plan_code)?
        .ok_or_else(|| AppError::license(ErrorCode::PlanNotAvailable))?;
    issue_license_with_plan(
        conn,
        owner_kind,
        owner_id,
        &plan.id,
        source_order_id,
        usage_category,
    )
}

pub fn suspend_license(conn: &Connection, license_id: &str, reason: &str) -> Result<License> {
    require_license(conn, license_id)?;
    if !queries::set_license_suspended(conn, license_id, reason)? {
        return Err(AppError::license_with(
            ErrorCode::InvalidLicenseState,
            "only active licenses can be suspended",
        ));
    }
    tracing::info!(license_id, reason, "license suspended");
    reload(conn, license_id)
}

pub fn unsuspend_license(conn: &Connection, license_id: &str) -> Result<License> {
    require_license(conn, license_id)?;
    if !queries::set_license_unsuspended(conn, license_id)? {
        return Err(AppError::license_with(
            ErrorCode::InvalidLicenseState,
            "license is not suspended",
        ));
    }
    reload(conn, license_id)
}

/// Revocation is terminal and never reversible.
pub fn revoke_license(conn: &Connection, license_id: &str, reason: &str) -> Result<License> {
    require_license(conn, license_id)?;
    if !queries::set_license_revoked(conn, license_id, reason)? {
        return Err(AppError::license_with(
            ErrorCode::InvalidLicenseState,
            "license is already revoked",
        ));
    }
    tracing::info!(license_id, reason, "license revoked");
    reload(conn, license_id)
}

/// Refund path: billing knows the order id, not the license id.
pub fn revoke_license_by_order(conn: &Connection, order_id: &str, reason: &str) -> Result<License> {
    let license = queries::get_license_by_source_order(conn, order_id)?
        .ok_or_else(|| AppError::license(ErrorCode::LicenseNotFound))?;
    revoke_license(conn, &license.id, reason)
}

/// Subscription renewal: push validUntil forward (None = convert to
/// perpetual, used for lifetime upgrades).
pub fn renew_license(
    conn: &Connection,
    license_id: &str,
    new_valid_until: Option<i64>,
) -> Result<License> {
    let license = require_license(conn, license_id)?;
    if license.status == StoredStatus::Revoked {
        return Err(AppError::license_with(
            ErrorCode::InvalidLicenseState,
            "revoked licenses cannot be renewed",
        ));
    }
    queries::set_license_valid_until(conn, license_id, new_valid_until)?;
    reload(conn, license_id)
}

fn require_license(conn: &Connection, license_id: &str) -> Result<License> {
    queries::get_license_by_id(conn, license_id)?
        .ok_or_else(|| AppError::license(ErrorCode::LicenseNotFound))
}

fn reload(conn: &Connection, license_id: &str) -> Result<License> {
    require_license(conn, license_id)
}

/// `XXXX-XXXX-XXXX-XXXX` from uppercase hex, retried on the (unlikely)
/// collision so the key stays globally unique.
fn generate_license_key(conn: &Connection) -> Result<String> {
    for _ in 0..8 {
        let hex = Uuid::new_v4().as_simple().to_string().to_uppercase();
        let key = format!("{}-{}-{}-{}", &hex[0..4], &hex[4..8], &hex[8..12], &hex[12..16]);
        if !queries::license_key_exists(conn, &key)? {
            return Ok(key);
        }
    }
    Err(AppError::Internal(
        "could not generate a unique license key".into(),
    ))
}
