//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt data.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse a JSON text column into a deserializable value.
fn parse_json<T: serde::de::DeserializeOwned>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw).map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const LICENSE_COLS: &str = "id, license_key, owner_kind, owner_id, product_id, plan_id, license_type, usage_category, status, suspend_reason, revoke_reason, valid_from, valid_until, policy_snapshot, source_order_id, created_at, updated_at";

pub const ACTIVATION_COLS: &str = "id, license_id, device_fingerprint, status, deactivated_reason, device_display_name, client_version, client_os, client_ip, offline_token, offline_token_expires_at, activated_at, last_seen_at";

pub const PLAN_COLS: &str = "id, code, name, product_id, license_type, duration_days, max_activations, max_concurrent_sessions, session_ttl_minutes, grace_period_days, allow_offline_days, entitlements, is_active, created_at";

pub const PRODUCT_COLS: &str = "id, code, name, is_active, created_at";

pub const CAMPAIGN_COLS: &str = "id, name, description, product_id, plan_id, usage_category, seat_limit, seats_used, per_user_limit, status, valid_from, valid_until, created_at, updated_at";

pub const REDEEM_CODE_COLS: &str = "id, campaign_id, code_hash, max_redemptions, current_redemptions, is_active, expires_at, created_at, updated_at";

pub const REDEMPTION_COLS: &str =
    "id, code_id, campaign_id, user_id, license_id, ip_address, user_agent, created_at";

// ============ FromRow Implementations ============

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            license_key: row.get(1)?,
            owner_kind: parse_enum(row, 2, "owner_kind")?,
            owner_id: row.get(3)?,
            product_id: row.get(4)?,
            plan_id: row.get(5)?,
            license_type: parse_enum(row, 6, "license_type")?,
            usage_category: parse_enum(row, 7, "usage_category")?,
            status: parse_enum(row, 8, "status")?,
            suspend_reason: row.get(9)?,
            revoke_reason: row.get(10)?,
            valid_from: row.get(11)?,
            valid_until: row.get(12)?,
            policy: parse_json(row, 13, "policy_snapshot")?,
            source_order_id: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

impl FromRow for Activation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Activation {
            id: row.get(0)?,
            license_id: row.get(1)?,
            device_fingerprint: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            deactivated_reason: row.get(4)?,
            device_display_name: row.get(5)?,
            client_version: row.get(6)?,
            client_os: row.get(7)?,
            client_ip: row.get(8)?,
            offline_token: row.get(9)?,
            offline_token_expires_at: row.get(10)?,
            activated_at: row.get(11)?,
            last_seen_at: row.get(12)?,
        })
    }
}

impl FromRow for Plan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Plan {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            product_id: row.get(3)?,
            license_type: parse_enum(row, 4, "license_type")?,
            duration_days: row.get(5)?,
            max_activations: row.get(6)?,
            max_concurrent_sessions: row.get(7)?,
            session_ttl_minutes: row.get(8)?,
            grace_period_days: row.get(9)?,
            allow_offline_days: row.get(10)?,
            entitlements: parse_json(row, 11, "entitlements")?,
            is_active: row.get(12)?,
            created_at: row.get(13)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            is_active: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for RedeemCampaign {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RedeemCampaign {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            product_id: row.get(3)?,
            plan_id: row.get(4)?,
            usage_category: parse_enum(row, 5, "usage_category")?,
            seat_limit: row.get(6)?,
            seats_used: row.get(7)?,
            per_user_limit: row.get(8)?,
            status: parse_enum(row, 9, "status")?,
            valid_from: row.get(10)?,
            valid_until: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl FromRow for RedeemCode {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RedeemCode {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            code_hash: row.get(2)?,
            max_redemptions: row.get(3)?,
            current_redemptions: row.get(4)?,
            active: row.get(5)?,
            expires_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl FromRow for RedeemRedemption {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RedeemRedemption {
            id: row.get(0)?,
            code_id: row.get(1)?,
            campaign_id: row.get(2)?,
            user_id: row.get(3)?,
            license_id: row.get(4)?,
            ip_address: row.get(5)?,
            user_agent: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}
