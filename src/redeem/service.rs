//! Redeem-code claim pipeline.
//!
//! Concurrency safety rests on the two atomic conditional increments (code
//! redemptions, campaign seats): they are single guarded UPDATEs, so two
//! concurrent claims of a one-shot code cannot both pass. The per-user
//! counter check is service-layer read-then-write; under extreme concurrency
//! a user can exceed the per-user limit by one. Known limitation, kept so
//! observable behavior under load stays unchanged. There is also no
//! compensating rollback: a failure after the increments leaves them spent.

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::{AppError, ErrorCode, Result};
use crate::licensing::issue;
use crate::models::{OwnerKind, RedeemRedemption};
use crate::rate_limit::SlidingWindowLimiter;

use super::CodeHasher;

pub struct RedeemClaim<'a> {
    pub user_id: &'a str,
    pub raw_code: &'a str,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemClaimResponse {
    pub license_id: String,
    pub license_key: String,
    pub product_name: String,
    pub plan_name: String,
    pub valid_until: Option<i64>,
}

pub fn claim(
    conn: &Connection,
    hasher: &CodeHasher,
    limiter: &SlidingWindowLimiter,
    request: RedeemClaim,
) -> Result<RedeemClaimResponse> {
    // 1. Per-user rate limit, before any lookup work.
    if !limiter.check(request.user_id) {
        return Err(ErrorCode::RedeemRateLimited.into());
    }

    // 2-3. Normalize, validate shape, hash; lookup is hash-only so the raw
    // code never reaches storage or logs.
    let normalized = hasher.normalize(request.raw_code)?;
    hasher.validate(&normalized)?;
    let code_hash = hasher.hash(&normalized);

    let code = queries::get_code_by_hash(conn, &code_hash)?
        .ok_or_else(|| AppError::license(ErrorCode::RedeemCodeNotFound))?;

    // 4. Code and campaign gate checks.
    let now = Utc::now().timestamp();
    if !code.active {
        return Err(ErrorCode::RedeemCodeDisabled.into());
    }
    if code.expires_at.is_some_and(|exp| now > exp) {
        return Err(ErrorCode::RedeemCodeExpired.into());
    }

    let campaign = queries::get_campaign_by_id(conn, &code.campaign_id)?
        .ok_or_else(|| AppError::license(ErrorCode::RedeemCampaignNotFound))?;
    if !campaign.is_available(now) {
        return Err(ErrorCode::RedeemCampaignNotActive.into());
    }

    // 5. The atomic guards.
    if !queries::increment_code_redemptions(conn, &code.id)? {
        return Err(ErrorCode::RedeemCodeDepleted.into());
    }
    if !queries::increment_campaign_seats(conn, &campaign.id)? {
        return Err(ErrorCode::RedeemCampaignFull.into());
    }

    // 6. Per-user counter (non-atomic fallback, see module docs).
    let claimed = queries::get_user_claim_count(conn, request.user_id, &campaign.id)?;
    if claimed >= campaign.per_user_limit {
        return Err(ErrorCode::RedeemUserLimitExceeded.into());
    }
    queries::increment_user_claim_count(conn, request.user_id, &campaign.id)?;

    // 7. Issue the license from the campaign's plan.
    let license = issue::issue_license_with_plan(
        conn,
        OwnerKind::Individual,
        request.user_id,
        &campaign.plan_id,
        None,
        campaign.usage_category,
    )?;

    // 8. Immutable audit record.
    queries::insert_redemption(
        conn,
        &RedeemRedemption {
            id: queries::gen_id(),
            code_id: code.id.clone(),
            campaign_id: campaign.id.clone(),
            user_id: request.user_id.to_string(),
            license_id: license.id.clone(),
            ip_address: request.ip_address,
            user_agent: request.user_agent,
            created_at: now,
        },
    )?;

    tracing::info!(
        user_id = %request.user_id,
        campaign_id = %campaign.id,
        license_id = %license.id,
        "redeem code claimed"
    );

    let product_name = queries::get_product_by_id(conn, &campaign.product_id)?
        .map(|p| p.name)
        .unwrap_or_else(|| "Unknown product".to_string());
    let plan_name = queries::get_plan_by_id(conn, &campaign.plan_id)?
        .map(|p| p.name)
        .unwrap_or_else(|| "Unknown plan".to_string());

    Ok(RedeemClaimResponse {
        license_id: license.id,
        license_key: license.license_key,
        product_name,
        plan_name,
        valid_until: license.valid_until,
    })
}

/// Generate fresh codes for a campaign. Returns the display-formatted raw
/// codes; this is the only moment they exist in plaintext.
pub fn generate_codes(
    conn: &Connection,
    hasher: &CodeHasher,
    campaign_id: &str,
    count: usize,
    max_redemptions: i64,
    expires_at: Option<i64>,
) -> Result<Vec<String>> {
    queries::get_campaign_by_id(conn, campaign_id)?
        .ok_or_else(|| AppError::license(ErrorCode::RedeemCampaignNotFound))?;

    let mut issued = Vec::with_capacity(count);
    for _ in 0..count {
        // regenerate on the rare hash collision
        let raw = loop {
            let candidate = hasher.generate_code();
            if !queries::code_hash_exists(conn, &hasher.hash(&candidate))? {
                break candidate;
            }
        };
        queries::create_code(conn, campaign_id, &hasher.hash(&raw), max_redemptions, expires_at)?;
        issued.push(hasher.format_for_display(&raw));
    }
    Ok(issued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::{CreateCampaign, CreatePlan, LicenseType, UsageCategory};

    fn setup() -> (Connection, CodeHasher, String) {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();

        let product = queries::create_product(&conn, "EVAC_PRO", "Evac Pro").unwrap();
        let plan = queries::create_plan(
            &conn,
            &CreatePlan {
                code: "promo".to_string(),
                name: "Promo".to_string(),
                product_id: product.id.clone(),
                license_type: LicenseType::Subscription,
                duration_days: Some(30),
                max_activations: 1,
                max_concurrent_sessions: 1,
                session_ttl_minutes: 60,
                grace_period_days: 7,
                allow_offline_days: 7,
                entitlements: vec!["core".to_string()],
            },
        )
        .unwrap();
        let campaign = queries::create_campaign(
            &conn,
            &CreateCampaign {
                name: "Launch".to_string(),
                description: None,
                product_id: product.id,
                plan_id: plan.id,
                usage_category: UsageCategory::Commercial,
                seat_limit: Some(100),
                per_user_limit: 1,
                valid_from: None,
                valid_until: None,
            },
        )
        .unwrap();

        (conn, CodeHasher::new("test-pepper"), campaign.id)
    }

    #[test]
    fn generated_codes_are_hashed_at_rest() {
        let (conn, hasher, campaign_id) = setup();
        let codes = generate_codes(&conn, &hasher, &campaign_id, 3, 1, None).unwrap();
        assert_eq!(codes.len(), 3);

        for shown in &codes {
            let normalized = hasher.normalize(shown).unwrap();
            // raw code is not in the table, its hash is
            assert!(queries::get_code_by_hash(&conn, &normalized).unwrap().is_none());
            assert!(queries::get_code_by_hash(&conn, &hasher.hash(&normalized))
                .unwrap()
                .is_some());
        }
    }

    #[test]
    fn claim_consumes_code_and_issues_license() {
        let (conn, hasher, campaign_id) = setup();
        let limiter = SlidingWindowLimiter::default();
        let codes = generate_codes(&conn, &hasher, &campaign_id, 1, 1, None).unwrap();

        let response = claim(
            &conn,
            &hasher,
            &limiter,
            RedeemClaim {
                user_id: "user-1",
                raw_code: &codes[0],
                ip_address: Some("127.0.0.1".to_string()),
                user_agent: None,
            },
        )
        .unwrap();

        assert_eq!(response.product_name, "Evac Pro");
        assert!(response.valid_until.is_some());

        // second claim by another user: the code is depleted
        let err = claim(
            &conn,
            &hasher,
            &limiter,
            RedeemClaim {
                user_id: "user-2",
                raw_code: &codes[0],
                ip_address: None,
                user_agent: None,
            },
        )
        .unwrap_err();
        match err {
            AppError::License { code, .. } => assert_eq!(code, ErrorCode::RedeemCodeDepleted),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
