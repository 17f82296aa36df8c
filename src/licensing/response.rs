use chrono::Utc;
use serde::Serialize;

use crate::error::ErrorCode;
use crate::models::LicenseStatus;

/// How the server arrived at its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Ok,
    AutoRecovered,
    UserActionRequired,
}

/// One occupied slot, aggregated across every candidate license so the user
/// can pick a session to evict. Fingerprints are masked before leaving the
/// server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub license_id: String,
    pub product_name: String,
    pub plan_name: String,
    pub activation_id: String,
    pub device_display_name: Option<String>,
    pub device_fingerprint: String,
    pub last_seen_at: i64,
    pub client_os: Option<String>,
    pub client_version: Option<String>,
    pub is_stale: bool,
}

/// The session terminated by the stale-reclaim pass, echoed back so the
/// client can tell the user what happened.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedSession {
    pub device_display_name: String,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_required: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_session: Option<TerminatedSession>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LicenseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlements: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_token_expires_at: Option<i64>,

    /// Server clock, so clients can detect local clock tampering.
    pub server_time: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_sessions: Option<Vec<SessionInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_sessions: Option<i64>,
}

impl ValidationResponse {
    fn empty() -> Self {
        Self {
            valid: false,
            resolution: None,
            action_required: None,
            recovery_action: None,
            terminated_session: None,
            license_id: None,
            status: None,
            valid_until: None,
            entitlements: None,
            session_token: None,
            offline_token: None,
            offline_token_expires_at: None,
            server_time: Utc::now().timestamp(),
            error_code: None,
            error_message: None,
            active_sessions: None,
            max_concurrent_sessions: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn success(
        license_id: String,
        status: LicenseStatus,
        valid_until: Option<i64>,
        entitlements: Vec<String>,
        session_token: Option<String>,
        offline_token: Option<String>,
        offline_token_expires_at: Option<i64>,
    ) -> Self {
        Self {
            valid: true,
            resolution: Some(Resolution::Ok),
            license_id: Some(license_id),
            status: Some(status),
            valid_until,
            entitlements: Some(entitlements),
            session_token,
            offline_token,
            offline_token_expires_at,
            ..Self::empty()
        }
    }

    /// Success after the stale-reclaim pass freed a slot.
    pub fn with_recovery(mut self, terminated: TerminatedSession) -> Self {
        self.resolution = Some(Resolution::AutoRecovered);
        self.recovery_action = Some("STALE_SESSION_TERMINATED");
        self.terminated_session = Some(terminated);
        self
    }

    pub fn failure(code: ErrorCode) -> Self {
        Self {
            valid: false,
            error_code: Some(code_str(code)),
            error_message: Some(code.message()),
            ..Self::empty()
        }
    }

    /// Every candidate is at capacity: the caller must pick a session to kick.
    /// The session list is mandatory; an ALL_LICENSES_FULL answer without it
    /// is a contract violation.
    pub fn all_licenses_full(active_sessions: Vec<SessionInfo>) -> Self {
        Self {
            valid: false,
            resolution: Some(Resolution::UserActionRequired),
            action_required: Some("KICK_REQUIRED"),
            error_code: Some(code_str(ErrorCode::AllLicensesFull)),
            error_message: Some(ErrorCode::AllLicensesFull.message()),
            active_sessions: Some(active_sessions),
            ..Self::empty()
        }
    }

    pub fn is_all_licenses_full(&self) -> bool {
        self.error_code == Some(code_str(ErrorCode::AllLicensesFull))
    }
}

fn code_str(code: ErrorCode) -> &'static str {
    code.into()
}

/// Mask a device fingerprint for display: first and last four characters.
pub fn mask_fingerprint(fingerprint: &str) -> String {
    if fingerprint.len() <= 8 {
        return "****".to_string();
    }
    format!(
        "{}****{}",
        &fingerprint[..4],
        &fingerprint[fingerprint.len() - 4..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_all_but_edges() {
        assert_eq!(mask_fingerprint("abcd1234efgh"), "abcd****efgh");
        assert_eq!(mask_fingerprint("short"), "****");
        assert_eq!(mask_fingerprint("12345678"), "****");
    }

    #[test]
    fn resolution_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_value(Resolution::AutoRecovered).unwrap(),
            serde_json::json!("AUTO_RECOVERED")
        );
        assert_eq!(
            serde_json::to_value(Resolution::Ok).unwrap(),
            serde_json::json!("OK")
        );
    }

    #[test]
    fn full_response_carries_kick_contract() {
        let resp = ValidationResponse::all_licenses_full(vec![]);
        assert!(!resp.valid);
        assert_eq!(resp.resolution, Some(Resolution::UserActionRequired));
        assert_eq!(resp.action_required, Some("KICK_REQUIRED"));
        assert!(resp.is_all_licenses_full());
        assert!(resp.active_sessions.is_some());
    }
}
