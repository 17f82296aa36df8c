use serde::{Deserialize, Serialize};

use super::{LicenseType, PolicySnapshot};

/// Catalog plan. The catalog domain is an external collaborator; this model
/// exists only for the two narrow lookups the core needs (policy by id/code)
/// and for capturing the policy snapshot at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub code: String,
    pub name: String,
    pub product_id: String,
    pub license_type: LicenseType,
    /// None for perpetual plans.
    pub duration_days: Option<i64>,
    pub max_activations: i64,
    pub max_concurrent_sessions: i64,
    pub session_ttl_minutes: i64,
    pub grace_period_days: i64,
    pub allow_offline_days: i64,
    pub entitlements: Vec<String>,
    pub is_active: bool,
    pub created_at: i64,
}

impl Plan {
    /// Capture the plan's policy at issuance time. Later plan edits do not
    /// affect the returned snapshot.
    pub fn policy_snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            max_activations: self.max_activations,
            max_concurrent_sessions: self.max_concurrent_sessions,
            session_ttl_minutes: self.session_ttl_minutes,
            grace_period_days: self.grace_period_days,
            allow_offline_days: self.allow_offline_days,
            entitlements: self.entitlements.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlan {
    pub code: String,
    pub name: String,
    pub product_id: String,
    pub license_type: LicenseType,
    #[serde(default)]
    pub duration_days: Option<i64>,
    pub max_activations: i64,
    pub max_concurrent_sessions: i64,
    pub session_ttl_minutes: i64,
    pub grace_period_days: i64,
    pub allow_offline_days: i64,
    pub entitlements: Vec<String>,
}

/// Catalog product, looked up only for its code (token audience claim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: i64,
}
