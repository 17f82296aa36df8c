pub mod licenses;
pub mod redeem;

use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(rate_limit: RateLimitConfig) -> Router<AppState> {
    let api = Router::new()
        .route("/api/v1/licenses/validate", post(licenses::validate))
        .route("/api/v1/licenses/heartbeat", post(licenses::heartbeat))
        .route(
            "/api/v1/licenses/validate/force",
            post(licenses::force_validate),
        )
        .route("/api/v1/me/licenses", get(licenses::my_licenses))
        .route("/api/v1/licenses/{license_id}", get(licenses::get_license))
        .route(
            "/api/v1/licenses/{license_id}/activations/{device_fingerprint}",
            delete(licenses::deactivate_device),
        )
        .route("/api/v1/redeem", post(redeem::claim_code))
        .route_layer(rate_limit::standard_layer(rate_limit.standard_rpm));

    let misc = Router::new()
        .route("/health", get(health))
        .route_layer(rate_limit::relaxed_layer(rate_limit.relaxed_rpm));

    api.merge(misc)
}

/// Router without rate-limit layers, for tests driving the app via oneshot
/// (the IP key extractor needs connect info that oneshot does not provide).
pub fn router_without_rate_limits() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/licenses/validate", post(licenses::validate))
        .route("/api/v1/licenses/heartbeat", post(licenses::heartbeat))
        .route(
            "/api/v1/licenses/validate/force",
            post(licenses::force_validate),
        )
        .route("/api/v1/me/licenses", get(licenses::my_licenses))
        .route("/api/v1/licenses/{license_id}", get(licenses::get_license))
        .route(
            "/api/v1/licenses/{license_id}/activations/{device_fingerprint}",
            delete(licenses::deactivate_device),
        )
        .route("/api/v1/redeem", post(redeem::claim_code))
}
