// Main entry point for the automation engine

use std::sync::Arc;

use anyhow::{Context, Result};
use conveyor::RateLimiter;
use server_core::domains::{AffiliateProcessor, ArtifactDeleter, CommentProcessor, PostProcessor};
use server_core::kernel::jobs::{PostgresJobStore, ProcessorRegistry, Scheduler};
use server_core::kernel::{
    BrowserGatewayClient, HttpCaptchaSolver, OpenAiGenerator, PartnerHttpClient, ServerDeps,
};
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting content automation engine");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Build external clients
    let captcha = Arc::new(
        HttpCaptchaSolver::new(config.captcha_api_url.clone(), config.captcha_api_key.clone())
            .context("Failed to create captcha client")?,
    );
    let browser = Arc::new(
        BrowserGatewayClient::new(config.browser_gateway_url.clone(), captcha.clone())
            .context("Failed to create browser gateway client")?,
    );
    let partner_api = Arc::new(
        PartnerHttpClient::new(
            config.partner_api_url.clone(),
            config.partner_access_key.clone(),
            RateLimiter::new(
                config.partner_rate_capacity,
                config.partner_rate_capacity,
                config.partner_rate_window,
            ),
        )
        .context("Failed to create partner API client")?,
    );
    let generator = Arc::new(
        OpenAiGenerator::new(
            config.openai_api_url.clone(),
            config.openai_api_key.clone(),
            config.openai_model.clone(),
        )
        .context("Failed to create LLM client")?,
    );

    let store = Arc::new(PostgresJobStore::new(pool));
    let deps = ServerDeps {
        store: store.clone(),
        browser,
        captcha,
        partner_api,
        generator,
        session_mode: config.session_mode,
        default_session_id: config.default_session_id.clone(),
    };

    // Register processors
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(PostProcessor::new(deps.clone())));
    registry.register(Arc::new(CommentProcessor::new(deps.clone())));
    registry.register(Arc::new(AffiliateProcessor::new(deps.clone())));
    let registry = Arc::new(registry);

    let deleter = Arc::new(ArtifactDeleter::new(deps.clone()));
    let scheduler = Scheduler::new(store, registry, deleter, config.scheduler_config());

    // Convert anything left in-flight by the previous run before claiming
    // new work.
    let recovered = scheduler
        .recover_interrupted()
        .await
        .context("Recovery sweep failed")?;
    tracing::info!(recovered, "recovery sweep complete");

    // Run until ctrl-c
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    scheduler.run(shutdown).await;
    tracing::info!("Engine stopped");

    Ok(())
}
