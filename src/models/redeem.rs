use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::UsageCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedeemCampaign {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub product_id: String,
    pub plan_id: String,
    pub usage_category: UsageCategory,
    /// None = uncapped campaign.
    pub seat_limit: Option<i64>,
    pub seats_used: i64,
    pub per_user_limit: i64,
    pub status: CampaignStatus,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RedeemCampaign {
    /// Claimable right now: ACTIVE, inside the validity window, seats left.
    pub fn is_available(&self, now: i64) -> bool {
        if self.status != CampaignStatus::Active {
            return false;
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return false;
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return false;
        }
        if self.seat_limit.is_some_and(|limit| self.seats_used >= limit) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaign {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub product_id: String,
    pub plan_id: String,
    pub usage_category: UsageCategory,
    #[serde(default)]
    pub seat_limit: Option<i64>,
    pub per_user_limit: i64,
    #[serde(default)]
    pub valid_from: Option<i64>,
    #[serde(default)]
    pub valid_until: Option<i64>,
}

/// Stores only the salted hash of a code; the raw value is never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RedeemCode {
    pub id: String,
    pub campaign_id: String,
    pub code_hash: String,
    pub max_redemptions: i64,
    pub current_redemptions: i64,
    pub active: bool,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Immutable audit row written after a successful claim.
#[derive(Debug, Clone, Serialize)]
pub struct RedeemRedemption {
    pub id: String,
    pub code_id: String,
    pub campaign_id: String,
    pub user_id: String,
    pub license_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
}
