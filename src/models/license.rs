use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

const SECONDS_PER_DAY: i64 = 86400;

/// Who a license is issued to. Closed set; the state machine switches
/// exhaustively over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OwnerKind {
    Individual,
    Organization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UsageCategory {
    Commercial,
    Education,
    Personal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseType {
    Subscription,
    Perpetual,
}

/// Stored lifecycle flag. Suspension and revocation are explicit and
/// orthogonal to time; the time-derived states live in [`LicenseStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StoredStatus {
    Pending,
    Active,
    Suspended,
    Revoked,
}

/// Effective status as evaluated at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseStatus {
    Pending,
    Active,
    ExpiredGrace,
    ExpiredHard,
    Suspended,
    Revoked,
}

impl LicenseStatus {
    /// Only these states permit activation and heartbeat.
    pub fn is_usable(&self) -> bool {
        matches!(self, LicenseStatus::Active | LicenseStatus::ExpiredGrace)
    }
}

/// Policy captured from the plan at issuance time. Immutable afterwards, so
/// later plan edits never retroactively change issued licenses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    pub max_activations: i64,
    pub max_concurrent_sessions: i64,
    pub session_ttl_minutes: i64,
    pub grace_period_days: i64,
    pub allow_offline_days: i64,
    pub entitlements: Vec<String>,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            max_activations: 3,
            max_concurrent_sessions: 2,
            session_ttl_minutes: 60,
            grace_period_days: 7,
            allow_offline_days: 30,
            entitlements: vec!["core".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct License {
    pub id: String,
    /// Human-shown key, `XXXX-XXXX-XXXX-XXXX`, globally unique.
    pub license_key: String,
    pub owner_kind: OwnerKind,
    pub owner_id: String,
    pub product_id: String,
    /// None for manually issued licenses.
    pub plan_id: Option<String>,
    pub license_type: LicenseType,
    pub usage_category: UsageCategory,
    pub status: StoredStatus,
    pub suspend_reason: Option<String>,
    pub revoke_reason: Option<String>,
    pub valid_from: i64,
    /// None = perpetual.
    pub valid_until: Option<i64>,
    pub policy: PolicySnapshot,
    pub source_order_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    /// Pure function of (stored flags, now, validity window, grace period).
    ///
    /// Precedence: revocation beats suspension beats the time axis; a license
    /// that was never activated stays `PENDING` regardless of its window.
    pub fn calculate_effective_status(&self, now: i64) -> LicenseStatus {
        match self.status {
            StoredStatus::Revoked => return LicenseStatus::Revoked,
            StoredStatus::Suspended => return LicenseStatus::Suspended,
            StoredStatus::Pending => return LicenseStatus::Pending,
            StoredStatus::Active => {}
        }

        if now < self.valid_from {
            return LicenseStatus::Pending;
        }

        let until = match self.valid_until {
            None => return LicenseStatus::Active,
            Some(until) => until,
        };

        if now <= until {
            LicenseStatus::Active
        } else if now <= until + self.policy.grace_period_days * SECONDS_PER_DAY {
            LicenseStatus::ExpiredGrace
        } else {
            LicenseStatus::ExpiredHard
        }
    }

    pub fn is_owned_by(&self, owner_kind: OwnerKind, owner_id: &str) -> bool {
        self.owner_kind == owner_kind && self.owner_id == owner_id
    }

    pub fn session_ttl_secs(&self) -> i64 {
        self.policy.session_ttl_minutes * 60
    }
}
