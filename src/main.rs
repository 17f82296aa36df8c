use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keygate::auth;
use keygate::config::Config;
use keygate::db::{create_pool, init_db, queries, AppState};
use keygate::handlers;
use keygate::models::{CreateCampaign, CreatePlan, LicenseType, UsageCategory};
use keygate::rate_limit::SlidingWindowLimiter;
use keygate::redeem::{self, CodeHasher};
use keygate::tokens::{OfflineTokenIssuer, SessionTokenIssuer, SigningKeyProvider};

#[derive(Parser, Debug)]
#[command(name = "keygate")]
#[command(about = "License activation and session-concurrency server")]
struct Cli {
    /// Seed the database with dev data (product, plan, campaign, codes)
    #[arg(long)]
    seed: bool,
}

/// Seeds the database with dev data for local testing.
/// Only runs in dev mode and when the catalog is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
        .expect("Failed to count products");
    if existing > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let product =
        queries::create_product(&conn, "EVAC_PRO", "Evac Pro").expect("Failed to create product");

    let plan = queries::create_plan(
        &conn,
        &CreatePlan {
            code: "pro-annual".to_string(),
            name: "Pro Annual".to_string(),
            product_id: product.id.clone(),
            license_type: LicenseType::Subscription,
            duration_days: Some(365),
            max_activations: 3,
            max_concurrent_sessions: 2,
            session_ttl_minutes: 60,
            grace_period_days: 7,
            allow_offline_days: 30,
            entitlements: vec!["core".to_string(), "export".to_string()],
        },
    )
    .expect("Failed to create plan");

    let campaign = queries::create_campaign(
        &conn,
        &CreateCampaign {
            name: "Dev Launch".to_string(),
            description: Some("Local development campaign".to_string()),
            product_id: product.id.clone(),
            plan_id: plan.id.clone(),
            usage_category: UsageCategory::Commercial,
            seat_limit: Some(100),
            per_user_limit: 1,
            valid_from: None,
            valid_until: None,
        },
    )
    .expect("Failed to create campaign");

    let codes = redeem::generate_codes(&conn, &state.code_hasher, &campaign.id, 5, 1, None)
        .expect("Failed to generate redeem codes");

    tracing::info!("Product: {} ({})", product.name, product.code);
    tracing::info!("Plan: {} ({})", plan.name, plan.code);
    tracing::info!("Campaign: {} ({})", campaign.name, campaign.id);
    for code in &codes {
        tracing::info!("Redeem code: {}", code);
    }

    match auth::issue_account_token(&state.signing, "dev-user-1") {
        Ok(Some(token)) => {
            tracing::info!("Dev account token (user dev-user-1):");
            tracing::info!("{}", token);
        }
        Ok(None) => {
            tracing::info!("No signing key: authenticate with the x-debug-user header instead");
        }
        Err(e) => tracing::warn!("Failed to mint dev account token: {}", e),
    }
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keygate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    // Fails fast in prod when no signing key is configured.
    let signing = Arc::new(
        SigningKeyProvider::from_config(&config).expect("Failed to initialize signing key"),
    );

    let state = AppState {
        db: db_pool,
        signing: signing.clone(),
        session_tokens: Arc::new(SessionTokenIssuer::new(
            signing.clone(),
            config.token_issuer.clone(),
            config.session_token_ttl_minutes,
        )),
        offline_tokens: Arc::new(OfflineTokenIssuer::new(
            signing.clone(),
            config.token_issuer.clone(),
            config.offline_renewal_threshold_ratio,
            config.offline_renewal_threshold_days,
        )),
        code_hasher: Arc::new(CodeHasher::new(config.redeem_pepper.clone())),
        redeem_limiter: Arc::new(SlidingWindowLimiter::new(
            config.redeem_max_attempts,
            config.redeem_window_secs,
        )),
        stale_threshold_minutes: config.stale_threshold_minutes,
        dev_mode: config.dev_mode,
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set KEYGATE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app: Router = handlers::router(config.rate_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Keygate server listening on {}", addr);

    // Connect info enables the IP-based rate limiter key extractor.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
