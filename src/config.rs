use std::env;

/// Rate limit tiers for public endpoints, in requests per minute.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub standard_rpm: u32,
    pub relaxed_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            standard_rpm: 30,
            relaxed_rpm: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,

    /// Path to a base64-encoded Ed25519 signing seed. Required in prod;
    /// absent in dev means token issuance is disabled.
    pub signing_key_path: Option<String>,
    pub signing_key_id: String,
    pub token_issuer: String,
    pub session_token_ttl_minutes: i64,

    /// Auto-resolve reclaim threshold. Distinct from (and longer than) the
    /// per-license session TTL.
    pub stale_threshold_minutes: i64,

    pub offline_renewal_threshold_ratio: f64,
    pub offline_renewal_threshold_days: i64,

    /// Server-side pepper mixed into redeem code hashes.
    pub redeem_pepper: String,
    pub redeem_max_attempts: u32,
    pub redeem_window_secs: u64,

    pub rate_limit: RateLimitConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("KEYGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(true);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("PORT", 3000);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "keygate.db".to_string()),
            dev_mode,
            signing_key_path: env::var("SIGNING_KEY_PATH").ok().filter(|p| !p.is_empty()),
            signing_key_id: env::var("SIGNING_KEY_ID")
                .unwrap_or_else(|_| "keygate-prod-v1".to_string()),
            token_issuer: env::var("TOKEN_ISSUER").unwrap_or_else(|_| "keygate".to_string()),
            session_token_ttl_minutes: env_parse("SESSION_TOKEN_TTL_MINUTES", 15),
            stale_threshold_minutes: env_parse("STALE_THRESHOLD_MINUTES", 30),
            offline_renewal_threshold_ratio: env_parse("OFFLINE_RENEWAL_THRESHOLD_RATIO", 0.5),
            offline_renewal_threshold_days: env_parse("OFFLINE_RENEWAL_THRESHOLD_DAYS", 3),
            redeem_pepper: env::var("REDEEM_CODE_PEPPER")
                .unwrap_or_else(|_| "dev-redeem-pepper".to_string()),
            redeem_max_attempts: env_parse("REDEEM_MAX_ATTEMPTS", 5),
            redeem_window_secs: env_parse("REDEEM_WINDOW_SECS", 60),
            rate_limit: RateLimitConfig {
                standard_rpm: env_parse("RATE_LIMIT_STANDARD_RPM", 30),
                relaxed_rpm: env_parse("RATE_LIMIT_RELAXED_RPM", 60),
            },
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
