//! Test utilities and fixtures for Keygate integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::Value;
use tower::ServiceExt;

pub use keygate::auth::issue_account_token;
pub use keygate::db::{init_db, queries, AppState, DbPool};
pub use keygate::handlers;
pub use keygate::models::*;
pub use keygate::rate_limit::SlidingWindowLimiter;
pub use keygate::redeem::{self, CodeHasher};
pub use keygate::tokens::{OfflineTokenIssuer, SessionTokenIssuer, SigningKeyProvider};

pub const ONE_MINUTE: i64 = 60;
pub const ONE_HOUR: i64 = 3600;
pub const ONE_DAY: i64 = 86400;

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// App state over an in-memory database. Pool size 1: each pooled SQLite
/// `:memory:` connection would otherwise see its own private database.
pub fn create_test_app_state() -> AppState {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    build_state(pool)
}

/// App state over a shared database file, for tests that need several
/// connections observing the same data concurrently.
pub fn create_file_app_state(path: &str) -> AppState {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
    let pool = Pool::builder().max_size(8).build(manager).unwrap();
    build_state(pool)
}

fn build_state(pool: DbPool) -> AppState {
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let signing = Arc::new(SigningKeyProvider::generate("test-v1"));
    AppState {
        db: pool,
        signing: signing.clone(),
        session_tokens: Arc::new(SessionTokenIssuer::new(
            signing.clone(),
            "keygate".to_string(),
            15,
        )),
        offline_tokens: Arc::new(OfflineTokenIssuer::new(
            signing.clone(),
            "keygate".to_string(),
            0.5,
            3,
        )),
        code_hasher: Arc::new(CodeHasher::new("test-pepper")),
        redeem_limiter: Arc::new(SlidingWindowLimiter::new(5, 60)),
        stale_threshold_minutes: 30,
        dev_mode: true,
    }
}

/// Router with all endpoints mounted, minus the IP rate limiter (oneshot
/// requests carry no connect info).
pub fn app(state: AppState) -> Router {
    handlers::router_without_rate_limits().with_state(state)
}

pub fn bearer_for(state: &AppState, user_id: &str) -> String {
    let token = issue_account_token(&state.signing, user_id)
        .unwrap()
        .expect("test signing key is always configured");
    format!("Bearer {}", token)
}

/// POST a JSON body as the given user; returns status + parsed body.
pub async fn post_json(
    app: &Router,
    uri: &str,
    auth: &str,
    body: Value,
) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("Authorization", auth)
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response should be valid JSON")
    };
    (status, json)
}

pub async fn get_json(app: &Router, uri: &str, auth: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("Authorization", auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response should be valid JSON")
    };
    (status, json)
}

// ============ Fixtures ============

pub fn create_test_product(conn: &rusqlite::Connection, code: &str, name: &str) -> Product {
    queries::create_product(conn, code, name).expect("Failed to create test product")
}

pub fn create_test_plan(conn: &rusqlite::Connection, product_id: &str, code: &str) -> Plan {
    queries::create_plan(
        conn,
        &CreatePlan {
            code: code.to_string(),
            name: format!("Plan {}", code),
            product_id: product_id.to_string(),
            license_type: LicenseType::Subscription,
            duration_days: Some(365),
            max_activations: 3,
            max_concurrent_sessions: 2,
            session_ttl_minutes: 60,
            grace_period_days: 7,
            allow_offline_days: 30,
            entitlements: vec!["core".to_string()],
        },
    )
    .expect("Failed to create test plan")
}

/// Policy tuned per test: (maxActivations, maxConcurrentSessions).
pub fn policy(max_activations: i64, max_concurrent_sessions: i64) -> PolicySnapshot {
    PolicySnapshot {
        max_activations,
        max_concurrent_sessions,
        session_ttl_minutes: 60,
        grace_period_days: 7,
        allow_offline_days: 30,
        entitlements: vec!["core".to_string()],
    }
}

/// Insert a license directly with full control over window and policy.
pub fn create_test_license(
    conn: &rusqlite::Connection,
    owner_id: &str,
    product_id: &str,
    valid_until: Option<i64>,
    policy: PolicySnapshot,
) -> License {
    let ts = now();
    let license = License {
        id: queries::gen_id(),
        license_key: format!(
            "TEST-{}-{}-{}",
            &queries::gen_id()[..4].to_uppercase(),
            &queries::gen_id()[..4].to_uppercase(),
            &queries::gen_id()[..4].to_uppercase()
        ),
        owner_kind: OwnerKind::Individual,
        owner_id: owner_id.to_string(),
        product_id: product_id.to_string(),
        plan_id: None,
        license_type: LicenseType::Subscription,
        usage_category: UsageCategory::Commercial,
        status: StoredStatus::Active,
        suspend_reason: None,
        revoke_reason: None,
        valid_from: ts - ONE_DAY,
        valid_until,
        policy,
        source_order_id: None,
        created_at: ts,
        updated_at: ts,
    };
    queries::insert_license(conn, &license).expect("Failed to insert test license");
    license
}

/// Bind a device with a controlled last_seen_at.
pub fn create_test_activation(
    conn: &rusqlite::Connection,
    license_id: &str,
    fingerprint: &str,
    display_name: &str,
    last_seen_at: i64,
) -> Activation {
    let activation = Activation {
        id: queries::gen_id(),
        license_id: license_id.to_string(),
        device_fingerprint: fingerprint.to_string(),
        status: ActivationStatus::Active,
        deactivated_reason: None,
        device_display_name: Some(display_name.to_string()),
        client_version: Some("1.0.0".to_string()),
        client_os: Some("macOS 14".to_string()),
        client_ip: None,
        offline_token: None,
        offline_token_expires_at: None,
        activated_at: last_seen_at,
        last_seen_at,
    };
    queries::insert_activation(conn, &activation).expect("Failed to insert test activation");
    activation
}

/// Campaign + generated codes, returning the display-formatted raw codes.
pub fn create_test_campaign_with_codes(
    conn: &rusqlite::Connection,
    hasher: &CodeHasher,
    product_id: &str,
    plan_id: &str,
    per_user_limit: i64,
    code_count: usize,
    max_redemptions: i64,
) -> (RedeemCampaign, Vec<String>) {
    let campaign = queries::create_campaign(
        conn,
        &CreateCampaign {
            name: "Test Campaign".to_string(),
            description: None,
            product_id: product_id.to_string(),
            plan_id: plan_id.to_string(),
            usage_category: UsageCategory::Commercial,
            seat_limit: None,
            per_user_limit,
            valid_from: None,
            valid_until: None,
        },
    )
    .expect("Failed to create test campaign");

    let codes = redeem::generate_codes(conn, hasher, &campaign.id, code_count, max_redemptions, None)
        .expect("Failed to generate test codes");
    (campaign, codes)
}
