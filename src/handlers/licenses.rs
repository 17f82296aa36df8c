//! License validation, heartbeat and session-management endpoints.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::AuthedUser;
use crate::db::{queries, AppState};
use crate::error::{AppError, ErrorCode, Result};
use crate::extractors::{Json, Query};
use crate::licensing::resolve::{self, DeviceInfo, Owner, ResolveContext};
use crate::licensing::ValidationResponse;
use crate::models::{LicenseStatus, OwnerKind};
use crate::util::extract_request_info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    /// Product identification: code preferred, id supported.
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,

    /// Pin one license explicitly; absent means server-side auto-resolve.
    #[serde(default)]
    pub license_id: Option<String>,

    pub device_fingerprint: String,

    #[serde(default)]
    pub client_version: Option<String>,
    #[serde(default)]
    pub client_os: Option<String>,
    #[serde(default)]
    pub device_display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceValidateRequest {
    pub license_id: String,
    /// Sessions the user chose to evict from the ALL_LICENSES_FULL list.
    #[serde(default)]
    pub deactivate_activation_ids: Vec<String>,

    pub device_fingerprint: String,

    #[serde(default)]
    pub client_version: Option<String>,
    #[serde(default)]
    pub client_os: Option<String>,
    #[serde(default)]
    pub device_display_name: Option<String>,
}

fn require_fingerprint(fingerprint: &str) -> Result<()> {
    if fingerprint.trim().is_empty() {
        return Err(AppError::BadRequest("deviceFingerprint is required".into()));
    }
    Ok(())
}

/// Map productCode/productId to the product id, erroring on unknown codes.
fn resolve_product_id(
    conn: &Connection,
    product_id: Option<&str>,
    product_code: Option<&str>,
) -> Result<Option<String>> {
    if let Some(id) = product_id {
        return Ok(Some(id.to_string()));
    }
    match product_code {
        Some(code) => {
            let product = queries::get_product_by_code(conn, code)?.ok_or_else(|| {
                AppError::license_with(
                    ErrorCode::LicenseNotFoundForProduct,
                    format!("unknown product: {}", code),
                )
            })?;
            Ok(Some(product.id))
        }
        None => Ok(None),
    }
}

fn resolve_ctx(state: &AppState) -> ResolveContext<'_> {
    ResolveContext {
        session_tokens: &state.session_tokens,
        offline_tokens: &state.offline_tokens,
        stale_threshold_minutes: state.stale_threshold_minutes,
    }
}

fn device_info(
    fingerprint: &str,
    client_version: Option<String>,
    client_os: Option<String>,
    display_name: Option<String>,
    headers: &HeaderMap,
) -> DeviceInfo {
    let (ip, _) = extract_request_info(headers);
    DeviceInfo {
        fingerprint: fingerprint.to_string(),
        client_version,
        client_os,
        client_ip: ip,
        display_name,
    }
}

/// ALL_LICENSES_FULL is a structured conflict; everything else rides on 200
/// with the outcome in the body.
fn respond(response: ValidationResponse) -> (StatusCode, axum::Json<ValidationResponse>) {
    let status = if response.is_all_licenses_full() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    (status, axum::Json(response))
}

/// POST /api/v1/licenses/validate
pub async fn validate(
    State(state): State<AppState>,
    user: AuthedUser,
    headers: HeaderMap,
    Json(req): Json<ValidateRequest>,
) -> Result<impl IntoResponse> {
    require_fingerprint(&req.device_fingerprint)?;
    let mut conn = state.db.get()?;

    let product_id =
        resolve_product_id(&conn, req.product_id.as_deref(), req.product_code.as_deref())?;
    let device = device_info(
        &req.device_fingerprint,
        req.client_version,
        req.client_os,
        req.device_display_name,
        &headers,
    );

    let response = resolve::validate_and_activate(
        &mut conn,
        &resolve_ctx(&state),
        Owner {
            kind: OwnerKind::Individual,
            id: &user.user_id,
        },
        product_id.as_deref(),
        req.license_id.as_deref(),
        &device,
    )?;

    Ok(respond(response))
}

/// POST /api/v1/licenses/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    user: AuthedUser,
    headers: HeaderMap,
    Json(req): Json<ValidateRequest>,
) -> Result<impl IntoResponse> {
    require_fingerprint(&req.device_fingerprint)?;
    let mut conn = state.db.get()?;

    let product_id =
        resolve_product_id(&conn, req.product_id.as_deref(), req.product_code.as_deref())?;
    let device = device_info(
        &req.device_fingerprint,
        req.client_version,
        req.client_os,
        req.device_display_name,
        &headers,
    );

    let response = resolve::heartbeat(
        &mut conn,
        &resolve_ctx(&state),
        Owner {
            kind: OwnerKind::Individual,
            id: &user.user_id,
        },
        product_id.as_deref(),
        req.license_id.as_deref(),
        &device,
    )?;

    Ok(respond(response))
}

/// POST /api/v1/licenses/validate/force
pub async fn force_validate(
    State(state): State<AppState>,
    user: AuthedUser,
    headers: HeaderMap,
    Json(req): Json<ForceValidateRequest>,
) -> Result<impl IntoResponse> {
    require_fingerprint(&req.device_fingerprint)?;
    let mut conn = state.db.get()?;

    let device = device_info(
        &req.device_fingerprint,
        req.client_version,
        req.client_os,
        req.device_display_name,
        &headers,
    );

    let response = resolve::force_validate(
        &mut conn,
        &resolve_ctx(&state),
        Owner {
            kind: OwnerKind::Individual,
            id: &user.user_id,
        },
        &req.license_id,
        &req.deactivate_activation_ids,
        &device,
    )?;

    Ok(respond(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyLicensesQuery {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyLicenseView {
    pub id: String,
    pub license_key: String,
    pub product_id: String,
    pub plan_id: Option<String>,
    pub status: LicenseStatus,
    pub valid_until: Option<i64>,
    pub active_devices: i64,
    pub max_activations: i64,
    pub max_concurrent_sessions: i64,
}

/// GET /api/v1/me/licenses
pub async fn my_licenses(
    State(state): State<AppState>,
    user: AuthedUser,
    Query(query): Query<MyLicensesQuery>,
) -> Result<Json<Vec<MyLicenseView>>> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();

    let status_filter: Option<LicenseStatus> = match &query.status {
        Some(raw) => Some(
            raw.parse()
                .map_err(|_| AppError::BadRequest(format!("unknown status: {}", raw)))?,
        ),
        None => None,
    };

    let licenses = queries::list_licenses_by_owner(
        &conn,
        OwnerKind::Individual,
        &user.user_id,
        query.product_id.as_deref(),
    )?;

    let mut views = Vec::with_capacity(licenses.len());
    for license in licenses {
        let status = license.calculate_effective_status(now);
        if status_filter.is_some_and(|wanted| wanted != status) {
            continue;
        }
        let active_devices = queries::count_seats(&conn, &license.id)?;
        views.push(MyLicenseView {
            id: license.id,
            license_key: license.license_key,
            product_id: license.product_id,
            plan_id: license.plan_id,
            status,
            valid_until: license.valid_until,
            active_devices,
            max_activations: license.policy.max_activations,
            max_concurrent_sessions: license.policy.max_concurrent_sessions,
        });
    }

    Ok(Json(views))
}

/// GET /api/v1/licenses/{license_id}, owner-checked detail.
pub async fn get_license(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(license_id): Path<String>,
) -> Result<Json<MyLicenseView>> {
    let conn = state.db.get()?;
    let license = resolve::load_owned_license(
        &conn,
        Owner {
            kind: OwnerKind::Individual,
            id: &user.user_id,
        },
        &license_id,
        None,
    )?;

    let now = Utc::now().timestamp();
    let active_devices = queries::count_seats(&conn, &license.id)?;

    Ok(Json(MyLicenseView {
        status: license.calculate_effective_status(now),
        id: license.id,
        license_key: license.license_key,
        product_id: license.product_id,
        plan_id: license.plan_id,
        valid_until: license.valid_until,
        active_devices,
        max_activations: license.policy.max_activations,
        max_concurrent_sessions: license.policy.max_concurrent_sessions,
    }))
}

/// DELETE /api/v1/licenses/{license_id}/activations/{device_fingerprint}
pub async fn deactivate_device(
    State(state): State<AppState>,
    user: AuthedUser,
    Path((license_id, device_fingerprint)): Path<(String, String)>,
) -> Result<StatusCode> {
    let conn = state.db.get()?;
    resolve::deactivate_device(
        &conn,
        Owner {
            kind: OwnerKind::Individual,
            id: &user.user_id,
        },
        &license_id,
        &device_fingerprint,
    )?;
    Ok(StatusCode::NO_CONTENT)
}
