use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActivationStatus {
    Active,
    Deactivated,
    Expired,
}

/// One device bound to a license. At most one row per
/// (license, device fingerprint); rebinding a known device refreshes the row.
#[derive(Debug, Clone, Serialize)]
pub struct Activation {
    pub id: String,
    pub license_id: String,
    /// Opaque stable device identifier supplied by the client.
    pub device_fingerprint: String,
    pub status: ActivationStatus,
    pub deactivated_reason: Option<String>,
    pub device_display_name: Option<String>,
    pub client_version: Option<String>,
    pub client_os: Option<String>,
    pub client_ip: Option<String>,
    /// Cache of the last issued offline token, so repeated heartbeats do not
    /// re-sign until the renewal policy triggers.
    pub offline_token: Option<String>,
    pub offline_token_expires_at: Option<i64>,
    pub activated_at: i64,
    pub last_seen_at: i64,
}

impl Activation {
    /// Whether this activation currently occupies a concurrency slot.
    /// Derived, never stored: ACTIVE and seen within the session TTL.
    pub fn occupies_slot(&self, session_threshold: i64) -> bool {
        self.status == ActivationStatus::Active && self.last_seen_at >= session_threshold
    }

    /// Whether this activation is eligible for automatic reclaim. Uses the
    /// longer stale threshold, not the session TTL.
    pub fn is_stale(&self, stale_threshold: i64) -> bool {
        self.status == ActivationStatus::Active && self.last_seen_at < stale_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation(status: ActivationStatus, last_seen_at: i64) -> Activation {
        Activation {
            id: "act-1".to_string(),
            license_id: "lic-1".to_string(),
            device_fingerprint: "fp-1".to_string(),
            status,
            deactivated_reason: None,
            device_display_name: None,
            client_version: None,
            client_os: None,
            client_ip: None,
            offline_token: None,
            offline_token_expires_at: None,
            activated_at: 0,
            last_seen_at,
        }
    }

    #[test]
    fn slot_occupancy_is_derived_from_ttl() {
        let a = activation(ActivationStatus::Active, 100);
        assert!(a.occupies_slot(100));
        assert!(!a.occupies_slot(101));
    }

    #[test]
    fn deactivated_rows_never_occupy_or_go_stale() {
        let a = activation(ActivationStatus::Deactivated, 0);
        assert!(!a.occupies_slot(0));
        assert!(!a.is_stale(100));
    }

    #[test]
    fn stale_uses_strictly_older_than_threshold() {
        let a = activation(ActivationStatus::Active, 50);
        assert!(a.is_stale(51));
        assert!(!a.is_stale(50));
    }
}
