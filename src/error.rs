use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use strum::{AsRefStr, IntoStaticStr};
use thiserror::Error;

/// Expected, typed licensing/redeem outcomes. Every named failure a caller
/// must handle gets its own code; none of these are retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // License lifecycle
    LicenseNotFound,
    LicenseNotFoundForProduct,
    LicenseExpired,
    LicenseSuspended,
    LicenseRevoked,
    LicenseAlreadyExists,
    InvalidLicenseState,
    PlanNotAvailable,

    // Activations / sessions
    ActivationLimitExceeded,
    ActivationNotFound,
    SessionDeactivated,
    InvalidActivationOwnership,
    AccessDenied,

    // Capacity (structured conflict, carries the session list in the response body)
    AllLicensesFull,

    // Redeem pipeline
    RedeemCodeInvalid,
    RedeemCodeNotFound,
    RedeemCodeExpired,
    RedeemCodeDisabled,
    RedeemCodeDepleted,
    RedeemCampaignNotFound,
    RedeemCampaignNotActive,
    RedeemCampaignFull,
    RedeemUserLimitExceeded,
    RedeemRateLimited,
}

impl ErrorCode {
    pub fn message(&self) -> &'static str {
        match self {
            Self::LicenseNotFound => "License not found",
            Self::LicenseNotFoundForProduct => "No license exists for this product",
            Self::LicenseExpired => "License has expired",
            Self::LicenseSuspended => "License is suspended",
            Self::LicenseRevoked => "License has been revoked",
            Self::LicenseAlreadyExists => "A license for this product already exists",
            Self::InvalidLicenseState => "License is not in a usable state",
            Self::PlanNotAvailable => "Plan is not available",
            Self::ActivationLimitExceeded => "Maximum number of activated devices reached",
            Self::ActivationNotFound => "No activation found for this device",
            Self::SessionDeactivated => "This session was deactivated from another device",
            Self::InvalidActivationOwnership => "Targeted session does not belong to this license",
            Self::AccessDenied => "Access denied",
            Self::AllLicensesFull => {
                "No license has a free session slot. Pick a session to terminate"
            }
            Self::RedeemCodeInvalid => "Redeem code format is invalid",
            Self::RedeemCodeNotFound => "Redeem code not found",
            Self::RedeemCodeExpired => "Redeem code has expired",
            Self::RedeemCodeDisabled => "Redeem code is disabled",
            Self::RedeemCodeDepleted => "Redeem code has no redemptions left",
            Self::RedeemCampaignNotFound => "Campaign not found",
            Self::RedeemCampaignNotActive => "Campaign is not active",
            Self::RedeemCampaignFull => "Campaign seat limit reached",
            Self::RedeemUserLimitExceeded => "Per-user claim limit exceeded",
            Self::RedeemRateLimited => "Too many attempts, try again later",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::LicenseNotFound
            | Self::LicenseNotFoundForProduct
            | Self::ActivationNotFound
            | Self::RedeemCodeNotFound
            | Self::RedeemCampaignNotFound => StatusCode::NOT_FOUND,

            Self::LicenseAlreadyExists
            | Self::AllLicensesFull
            | Self::RedeemCodeDepleted
            | Self::RedeemCampaignFull
            | Self::RedeemUserLimitExceeded => StatusCode::CONFLICT,

            Self::LicenseExpired
            | Self::LicenseSuspended
            | Self::LicenseRevoked
            | Self::ActivationLimitExceeded
            | Self::AccessDenied
            | Self::SessionDeactivated => StatusCode::FORBIDDEN,

            Self::InvalidLicenseState
            | Self::InvalidActivationOwnership
            | Self::PlanNotAvailable
            | Self::RedeemCodeInvalid
            | Self::RedeemCampaignNotActive => StatusCode::BAD_REQUEST,

            Self::RedeemCodeExpired | Self::RedeemCodeDisabled => StatusCode::GONE,

            Self::RedeemRateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{}", .code.message())]
    License {
        code: ErrorCode,
        detail: Option<String>,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn license(code: ErrorCode) -> Self {
        AppError::License { code, detail: None }
    }

    pub fn license_with(code: ErrorCode, detail: impl Into<String>) -> Self {
        AppError::License {
            code,
            detail: Some(detail.into()),
        }
    }
}

impl From<ErrorCode> for AppError {
    fn from(code: ErrorCode) -> Self {
        AppError::license(code)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    timestamp: i64,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::License { code, detail } => {
                let message = match detail {
                    Some(d) => format!("{}: {}", code.message(), d),
                    None => code.message().to_string(),
                };
                (code.status(), code.as_ref().to_string(), Some(message))
            }
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST".to_string(),
                Some(msg.clone()),
            ),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED".to_string(), None),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR".to_string(),
                    None,
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR".to_string(),
                    None,
                )
            }
            AppError::Json(e) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST".to_string(),
                Some(e.to_string()),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error,
            message,
            timestamp: Utc::now().timestamp(),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
