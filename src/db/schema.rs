use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Catalog collaborators (read-only from the core's perspective):
        -- plans supply the policy snapshot at issuance, products supply the
        -- token audience code.
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            product_id TEXT NOT NULL REFERENCES products(id),
            license_type TEXT NOT NULL CHECK (license_type IN ('subscription', 'perpetual')),
            duration_days INTEGER,
            max_activations INTEGER NOT NULL,
            max_concurrent_sessions INTEGER NOT NULL,
            session_ttl_minutes INTEGER NOT NULL,
            grace_period_days INTEGER NOT NULL,
            allow_offline_days INTEGER NOT NULL,
            entitlements TEXT NOT NULL,          -- JSON array
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_plans_product ON plans(product_id);

        -- Licenses. policy_snapshot is the plan policy frozen at issuance.
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL UNIQUE,
            owner_kind TEXT NOT NULL CHECK (owner_kind IN ('individual', 'organization')),
            owner_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            plan_id TEXT,
            license_type TEXT NOT NULL CHECK (license_type IN ('subscription', 'perpetual')),
            usage_category TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'suspended', 'revoked')),
            suspend_reason TEXT,
            revoke_reason TEXT,
            valid_from INTEGER NOT NULL,
            valid_until INTEGER,                 -- NULL = perpetual
            policy_snapshot TEXT NOT NULL,       -- JSON
            source_order_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_owner ON licenses(owner_kind, owner_id);
        -- At most one non-revoked license per (owner, product)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_licenses_owner_product
            ON licenses(owner_kind, owner_id, product_id) WHERE status != 'revoked';

        -- Device bindings. One row per (license, fingerprint); rebinding a
        -- known device updates the row instead of inserting.
        CREATE TABLE IF NOT EXISTS activations (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
            device_fingerprint TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('active', 'deactivated', 'expired')),
            deactivated_reason TEXT,
            device_display_name TEXT,
            client_version TEXT,
            client_os TEXT,
            client_ip TEXT,
            offline_token TEXT,
            offline_token_expires_at INTEGER,
            activated_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            UNIQUE(license_id, device_fingerprint)
        );
        CREATE INDEX IF NOT EXISTS idx_activations_license ON activations(license_id);
        CREATE INDEX IF NOT EXISTS idx_activations_session
            ON activations(license_id, status, last_seen_at);

        -- Redeem subsystem
        CREATE TABLE IF NOT EXISTS redeem_campaigns (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            product_id TEXT NOT NULL,
            plan_id TEXT NOT NULL,
            usage_category TEXT NOT NULL,
            seat_limit INTEGER,                  -- NULL = uncapped
            seats_used INTEGER NOT NULL DEFAULT 0,
            per_user_limit INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL CHECK (status IN ('active', 'paused', 'ended')),
            valid_from INTEGER,
            valid_until INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Codes store only the peppered hash, never the raw value.
        CREATE TABLE IF NOT EXISTS redeem_codes (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES redeem_campaigns(id) ON DELETE CASCADE,
            code_hash TEXT NOT NULL UNIQUE,
            max_redemptions INTEGER NOT NULL DEFAULT 1,
            current_redemptions INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            expires_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_redeem_codes_campaign ON redeem_codes(campaign_id);

        CREATE TABLE IF NOT EXISTS redeem_user_counters (
            user_id TEXT NOT NULL,
            campaign_id TEXT NOT NULL REFERENCES redeem_campaigns(id) ON DELETE CASCADE,
            claim_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, campaign_id)
        );

        -- Immutable audit trail of successful claims
        CREATE TABLE IF NOT EXISTS redeem_redemptions (
            id TEXT PRIMARY KEY,
            code_id TEXT NOT NULL,
            campaign_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            license_id TEXT NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_redemptions_campaign ON redeem_redemptions(campaign_id);
        CREATE INDEX IF NOT EXISTS idx_redemptions_user ON redeem_redemptions(user_id);
        "#,
    )
}
