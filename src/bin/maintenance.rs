use std::collections::HashSet;
use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use diesel::prelude::*;
use uuid::Uuid;

use fixit_backend::{
    config::AppConfig,
    db,
    enums::ResourceKind,
    models::Media,
    schema::{leases, maintenance_requests, media, properties, scheduled_tasks, units, users},
    storage::{ObjectStorage, S3Storage},
};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("purge-media") => purge_orphaned_media().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance purge-media");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance purge-media");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Delete media rows (and their object-store bytes) whose parent resource no
/// longer exists. Byte deletes are idempotent by key, so re-running after a
/// partial failure is safe.
async fn purge_orphaned_media() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;

    let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::from_config(&config).await?);

    let mut conn = pool.get().context("failed to get database connection")?;

    let rows: Vec<Media> = media::table
        .load(&mut conn)
        .context("failed to load media rows")?;

    if rows.is_empty() {
        println!("No media rows found.");
        return Ok(());
    }

    let request_ids: HashSet<Uuid> = maintenance_requests::table
        .select(maintenance_requests::id)
        .load::<Uuid>(&mut conn)?
        .into_iter()
        .collect();
    let schedule_ids: HashSet<Uuid> = scheduled_tasks::table
        .select(scheduled_tasks::id)
        .load::<Uuid>(&mut conn)?
        .into_iter()
        .collect();
    let lease_ids: HashSet<Uuid> = leases::table
        .select(leases::id)
        .load::<Uuid>(&mut conn)?
        .into_iter()
        .collect();
    let property_ids: HashSet<Uuid> = properties::table
        .select(properties::id)
        .load::<Uuid>(&mut conn)?
        .into_iter()
        .collect();
    let unit_ids: HashSet<Uuid> = units::table
        .select(units::id)
        .load::<Uuid>(&mut conn)?
        .into_iter()
        .collect();
    let user_ids: HashSet<Uuid> = users::table
        .select(users::id)
        .load::<Uuid>(&mut conn)?
        .into_iter()
        .collect();

    let orphaned: Vec<Media> = rows
        .into_iter()
        .filter(|row| {
            let parent_exists = match ResourceKind::parse(&row.related_to) {
                Some(ResourceKind::Request) => request_ids.contains(&row.related_id),
                Some(ResourceKind::ScheduledMaintenance) => schedule_ids.contains(&row.related_id),
                Some(ResourceKind::Lease) => lease_ids.contains(&row.related_id),
                Some(ResourceKind::Property) => property_ids.contains(&row.related_id),
                Some(ResourceKind::Unit) => unit_ids.contains(&row.related_id),
                Some(ResourceKind::User) => user_ids.contains(&row.related_id),
                _ => true,
            };
            !parent_exists
        })
        .collect();

    if orphaned.is_empty() {
        println!("No orphaned media found.");
        return Ok(());
    }

    println!("Purging {} orphaned media rows…", orphaned.len());

    for row in &orphaned {
        if let Err(err) = storage.remove(&row.s3_key).await {
            eprintln!("Failed to delete object {} from storage: {err}", row.s3_key);
        }
        if let Some(thumbnail_key) = row.thumbnail_key.as_deref() {
            if let Err(err) = storage.remove(thumbnail_key).await {
                eprintln!("Failed to delete thumbnail {thumbnail_key} from storage: {err}");
            }
        }
    }

    let orphan_ids: Vec<Uuid> = orphaned.iter().map(|row| row.id).collect();
    diesel::delete(media::table.filter(media::id.eq_any(orphan_ids)))
        .execute(&mut conn)
        .context("failed to remove media rows")?;

    println!("Orphaned media removed.");
    Ok(())
}
