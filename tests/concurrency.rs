//! Concurrency properties: seat exclusivity under simultaneous activations,
//! and redeem atomicity for one-shot codes. These run real threads against a
//! shared database file so every caller takes the same write lock the server
//! would.

use std::thread;

use keygate::licensing::resolve::{self, DeviceInfo, Owner, ResolveContext};
use keygate::redeem::RedeemClaim;

mod common;
use common::*;

#[test]
fn concurrent_activations_never_exceed_the_slot_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keygate-seats.db");
    let state = create_file_app_state(path.to_str().unwrap());

    let license_id;
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let license = create_test_license(
            &conn,
            "user-1",
            &product.id,
            Some(now() + ONE_DAY),
            policy(10, 2),
        );
        license_id = license.id;
    }

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let state = state.clone();
            thread::spawn(move || {
                let mut conn = state.db.get().unwrap();
                let ctx = ResolveContext {
                    session_tokens: &state.session_tokens,
                    offline_tokens: &state.offline_tokens,
                    stale_threshold_minutes: state.stale_threshold_minutes,
                };
                let device = DeviceInfo {
                    fingerprint: format!("device-{:04}-concurrent", i),
                    ..Default::default()
                };
                resolve::validate_and_activate(
                    &mut conn,
                    &ctx,
                    Owner {
                        kind: OwnerKind::Individual,
                        id: "user-1",
                    },
                    None,
                    None,
                    &device,
                )
                .expect("validate must not error, only report full")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.valid).count();
    assert_eq!(successes, 2, "exactly maxConcurrentSessions winners");
    for loser in results.iter().filter(|r| !r.valid) {
        assert!(loser.is_all_licenses_full());
        assert!(
            !loser.active_sessions.as_ref().unwrap().is_empty(),
            "every conflict answer names the occupants"
        );
    }

    let conn = state.db.get().unwrap();
    let occupied = queries::count_occupied_slots(&conn, &license_id, now() - ONE_HOUR).unwrap();
    assert_eq!(occupied, 2, "occupied slots never exceed the ceiling");
}

#[test]
fn one_shot_code_survives_concurrent_claims_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keygate-redeem.db");
    let state = create_file_app_state(path.to_str().unwrap());

    let code;
    {
        let conn = state.db.get().unwrap();
        let product = create_test_product(&conn, "EVAC_PRO", "Evac Pro");
        let plan = create_test_plan(&conn, &product.id, "promo");
        let (_, mut codes) = create_test_campaign_with_codes(
            &conn,
            &state.code_hasher,
            &product.id,
            &plan.id,
            1,
            1,
            1,
        );
        code = codes.pop().unwrap();
    }

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let state = state.clone();
            let code = code.clone();
            thread::spawn(move || {
                let conn = state.db.get().unwrap();
                let user_id = format!("user-{}", i);
                redeem::claim(
                    &conn,
                    &state.code_hasher,
                    &state.redeem_limiter,
                    RedeemClaim {
                        user_id: &user_id,
                        raw_code: &code,
                        ip_address: None,
                        user_agent: None,
                    },
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "a maxRedemptions=1 code is claimed exactly once");

    for failed in results.iter().filter(|r| r.is_err()) {
        match failed {
            Err(keygate::error::AppError::License { code, .. }) => {
                assert_eq!(*code, keygate::error::ErrorCode::RedeemCodeDepleted)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    // the code counter is spent exactly once as well
    let conn = state.db.get().unwrap();
    let redeemed: i64 = conn
        .query_row("SELECT current_redemptions FROM redeem_codes", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(redeemed, 1);
}
