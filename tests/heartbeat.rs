//! Tests for POST /api/v1/licenses/heartbeat: renews existing bindings only,
//! and distinguishes "never bound" from "kicked elsewhere".

use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::*;

#[tokio::test]
async fn heartbeat_renews_last_seen_and_returns_tokens() {
    let state = create_test_app_state();
    let license_id;
    let activation_id;
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license =
            create_test_license(&conn, "user-1", &product.id, Some(now() + ONE_DAY), policy(3, 2));
        let activation = create_test_activation(
            &conn,
            &license.id,
            "device-aaaa-1111",
            "MacBook",
            now() - 10 * ONE_MINUTE,
        );
        license_id = license.id;
        activation_id = activation.id;
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state.clone());

    let before = now();
    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/heartbeat",
        &auth,
        json!({
            "productCode": "EVAC_PRO",
            "deviceFingerprint": "device-aaaa-1111",
            "clientVersion": "2.0.0"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["licenseId"], license_id);
    assert!(body["sessionToken"].is_string());

    let conn = state.db.get().unwrap();
    let refreshed = queries::list_activations(&conn, &license_id)
        .unwrap()
        .into_iter()
        .find(|a| a.id == activation_id)
        .unwrap();
    assert!(refreshed.last_seen_at >= before);
    assert_eq!(refreshed.client_version.as_deref(), Some("2.0.0"));
}

#[tokio::test]
async fn heartbeat_without_binding_is_activation_not_found() {
    let state = create_test_app_state();
    let license_id;
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license =
            create_test_license(&conn, "user-1", &product.id, Some(now() + ONE_DAY), policy(3, 2));
        license_id = license.id;
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state.clone());

    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/heartbeat",
        &auth,
        json!({ "productCode": "EVAC_PRO", "deviceFingerprint": "device-never-seen" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ACTIVATION_NOT_FOUND");

    // heartbeat never creates a binding
    let conn = state.db.get().unwrap();
    assert!(queries::list_activations(&conn, &license_id).unwrap().is_empty());
}

#[tokio::test]
async fn heartbeat_after_kick_is_session_deactivated() {
    let state = create_test_app_state();
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license =
            create_test_license(&conn, "user-1", &product.id, Some(now() + ONE_DAY), policy(3, 2));
        let activation =
            create_test_activation(&conn, &license.id, "device-aaaa-1111", "MacBook", now());
        queries::deactivate_activation(&conn, &activation.id, "FORCE_VALIDATE").unwrap();
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state);

    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/heartbeat",
        &auth,
        json!({ "productCode": "EVAC_PRO", "deviceFingerprint": "device-aaaa-1111" }),
    )
    .await;

    // distinct from ACTIVATION_NOT_FOUND so the client can explain the kick
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "SESSION_DEACTIVATED");
}

#[tokio::test]
async fn heartbeat_on_hard_expired_license_reports_expiry() {
    let state = create_test_app_state();
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license = create_test_license(
            &conn,
            "user-1",
            &product.id,
            Some(now() - 30 * ONE_DAY),
            policy(3, 2),
        );
        create_test_activation(&conn, &license.id, "device-aaaa-1111", "MacBook", now());
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state);

    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/heartbeat",
        &auth,
        json!({ "productCode": "EVAC_PRO", "deviceFingerprint": "device-aaaa-1111" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["errorCode"], "LICENSE_EXPIRED");
}

#[tokio::test]
async fn heartbeat_with_lapsed_ttl_still_renews() {
    let state = create_test_app_state();
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license =
            create_test_license(&conn, "user-1", &product.id, Some(now() + ONE_DAY), policy(3, 2));
        // silent for two hours: slot lapsed, row still ACTIVE
        create_test_activation(
            &conn,
            &license.id,
            "device-aaaa-1111",
            "MacBook",
            now() - 2 * ONE_HOUR,
        );
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state);

    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/heartbeat",
        &auth,
        json!({ "productCode": "EVAC_PRO", "deviceFingerprint": "device-aaaa-1111" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}
