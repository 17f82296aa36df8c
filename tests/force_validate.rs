//! Tests for POST /api/v1/licenses/validate/force: the explicit-kick path
//! after an ALL_LICENSES_FULL conflict.

use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::*;

#[tokio::test]
async fn kick_then_activate_flow() {
    let state = create_test_app_state();
    let license_id;
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license =
            create_test_license(&conn, "user-1", &product.id, Some(now() + ONE_DAY), policy(3, 1));
        create_test_activation(
            &conn,
            &license.id,
            "device-aaaa-1111",
            "Desk Mac",
            now() - 5 * ONE_MINUTE,
        );
        license_id = license.id;
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state.clone());

    // 1. validate from the new device: conflict with the session list
    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/validate",
        &auth,
        json!({ "productCode": "EVAC_PRO", "deviceFingerprint": "device-bbbb-2222" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let victim_id = body["activeSessions"][0]["activationId"]
        .as_str()
        .expect("conflict must name a kickable session")
        .to_string();

    // 2. kick it and activate
    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/validate/force",
        &auth,
        json!({
            "licenseId": license_id,
            "deactivateActivationIds": [victim_id.clone()],
            "deviceFingerprint": "device-bbbb-2222"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["licenseId"], license_id);
    assert!(body["sessionToken"].is_string());

    let conn = state.db.get().unwrap();
    let activations = queries::list_activations(&conn, &license_id).unwrap();
    let victim = activations.iter().find(|a| a.id == victim_id).unwrap();
    assert_eq!(victim.status, ActivationStatus::Deactivated);
    assert_eq!(victim.deactivated_reason.as_deref(), Some("FORCE_VALIDATE"));

    let occupied = queries::count_occupied_slots(&conn, &license_id, now() - ONE_HOUR).unwrap();
    assert_eq!(occupied, 1, "only the new device holds a slot");
}

#[tokio::test]
async fn kicking_a_foreign_activation_is_rejected() {
    let state = create_test_app_state();
    let license_id;
    let foreign_activation_id;
    {
        let conn = state.db.get().unwrap();
        let product_a = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let product_b = create_test_product(&conn, "EVAC_LITE", "Evac Lite");
        let mine =
            create_test_license(&conn, "user-1", &product_a.id, Some(now() + ONE_DAY), policy(3, 1));
        let other =
            create_test_license(&conn, "user-2", &product_b.id, Some(now() + ONE_DAY), policy(3, 1));
        let foreign =
            create_test_activation(&conn, &other.id, "device-cccc-3333", "Their Mac", now());
        license_id = mine.id;
        foreign_activation_id = foreign.id;
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state.clone());

    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/validate/force",
        &auth,
        json!({
            "licenseId": license_id,
            "deactivateActivationIds": [foreign_activation_id],
            "deviceFingerprint": "device-bbbb-2222"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ACTIVATION_OWNERSHIP");

    // the foreign session survived
    let conn = state.db.get().unwrap();
    let foreign = queries::list_activations(&conn, &body_license_of(&conn, "user-2"))
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(foreign.status, ActivationStatus::Active);
}

fn body_license_of(conn: &rusqlite::Connection, owner_id: &str) -> String {
    queries::list_licenses_by_owner(conn, OwnerKind::Individual, owner_id, None)
        .unwrap()
        .pop()
        .unwrap()
        .id
}

#[tokio::test]
async fn force_without_freeing_a_slot_conflicts_again() {
    let state = create_test_app_state();
    let license_id;
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license =
            create_test_license(&conn, "user-1", &product.id, Some(now() + ONE_DAY), policy(3, 1));
        create_test_activation(&conn, &license.id, "device-aaaa-1111", "Desk Mac", now());
        license_id = license.id;
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state);

    // empty kick list models losing the race to a concurrent activation
    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/validate/force",
        &auth,
        json!({
            "licenseId": license_id,
            "deactivateActivationIds": [],
            "deviceFingerprint": "device-bbbb-2222"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorCode"], "ALL_LICENSES_FULL");
    assert_eq!(
        body["activeSessions"].as_array().unwrap().len(),
        1,
        "refreshed session list accompanies the retry conflict"
    );
}

#[tokio::test]
async fn force_on_foreign_license_is_denied() {
    let state = create_test_app_state();
    let license_id;
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license =
            create_test_license(&conn, "user-2", &product.id, Some(now() + ONE_DAY), policy(3, 1));
        license_id = license.id;
    }
    let auth = bearer_for(&state, "user-1");
    let app = app(state);

    let (status, body) = post_json(
        &app,
        "/api/v1/licenses/validate/force",
        &auth,
        json!({
            "licenseId": license_id,
            "deactivateActivationIds": [],
            "deviceFingerprint": "device-bbbb-2222"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "ACCESS_DENIED");
}
