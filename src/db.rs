use std::time::Duration;

use anyhow::Context;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 4;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_pool_with_size(database_url: &str, max_size: u32) -> anyhow::Result<PgPool> {
    Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(CONNECT_TIMEOUT)
        .build(ConnectionManager::new(database_url))
        .context("failed to build database pool")
}
