use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fixit_backend::{
    auth::jwt::JwtService, clock::SystemClock, config::AppConfig, db, mailer, routes, sms,
    state::AppState, storage::S3Storage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        email_enabled = config.email_api_url.is_some(),
        sms_enabled = config.sms_api_url.is_some(),
        "loaded backend configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let storage = Arc::new(S3Storage::from_config(&config).await?);
    let mailer = mailer::from_config(&config);
    let sms_sender = sms::from_config(&config);
    let jwt = JwtService::from_config(&config)?;

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(
        pool,
        config,
        storage,
        mailer,
        sms_sender,
        Arc::new(SystemClock),
        jwt,
    );
    let router = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
