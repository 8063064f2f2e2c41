use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use fixit_backend::{
    auth::jwt::JwtService, clock::SystemClock, config::AppConfig, db, default_handlers, mailer,
    sms, state::AppState, storage::S3Storage, Scheduler, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 2,
        s3_bucket = %config.s3_bucket,
        email_enabled = config.email_api_url.is_some(),
        sms_enabled = config.sms_api_url.is_some(),
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 2)?;
    let storage = Arc::new(S3Storage::from_config(&config).await?);
    let mailer = mailer::from_config(&config);
    let sms_sender = sms::from_config(&config);
    let jwt = JwtService::from_config(&config)?;

    let state = Arc::new(AppState::new(
        pool,
        config,
        storage,
        mailer,
        sms_sender,
        Arc::new(SystemClock),
        jwt,
    ));
    let worker = Worker::new(state.clone(), default_handlers(), Duration::from_secs(2));
    let scheduler = Scheduler::new(state, Duration::from_secs(30));

    tokio::select! {
        _ = worker.run() => {}
        _ = scheduler.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

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
