use std::time::Duration;

use diesel::prelude::*;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::enums::ResourceKind;
use crate::error::{AppError, AppResult};
use crate::models::{Media, NewMedia};
use crate::schema::media;
use crate::state::AppState;
use crate::storage::ObjectPut;

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

#[derive(Serialize, Clone)]
pub struct MediaResponse {
    pub id: Uuid,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub mime_type: String,
    pub size_bytes: i64,
    pub is_public: bool,
    pub tags: Vec<String>,
    pub created_at: String,
}

pub struct MediaUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub is_public: bool,
    pub tags: Vec<String>,
}

fn object_key(related_to: ResourceKind, related_id: Uuid, media_id: Uuid, file_name: &str) -> String {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("bin");
    format!(
        "media/{}/{related_id}/{media_id}.{extension}",
        related_to.as_str()
    )
}

fn inline_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}

/// Store the bytes, then record the metadata row. The row is the source of
/// truth for later deletes; the key never leaves the backend unsigned.
pub async fn store_upload(
    state: &AppState,
    upload: MediaUpload,
    related_to: ResourceKind,
    related_id: Uuid,
    uploaded_by: Option<Uuid>,
) -> AppResult<Media> {
    if upload.bytes.is_empty() {
        return Err(AppError::bad_request("file must not be empty"));
    }

    let media_id = Uuid::new_v4();
    let key = object_key(related_to, related_id, media_id, &upload.file_name);
    let size_bytes = upload.bytes.len() as i64;

    state
        .storage
        .store(ObjectPut {
            key: key.clone(),
            body: upload.bytes,
            content_type: Some(upload.mime_type.clone()),
            content_disposition: inline_content_disposition(&upload.file_name),
        })
        .await
        .map_err(|err| AppError::internal(format!("failed to store media: {err}")))?;

    let mut conn = state.db()?;
    let row = NewMedia {
        id: media_id,
        s3_key: key,
        thumbnail_key: None,
        mime_type: upload.mime_type,
        size_bytes,
        uploaded_by,
        related_to: related_to.as_str().to_string(),
        related_id,
        is_public: upload.is_public,
        tags: upload.tags,
    };
    diesel::insert_into(media::table).values(&row).execute(&mut conn)?;
    let stored: Media = media::table.find(media_id).first(&mut conn)?;
    Ok(stored)
}

pub async fn to_response(state: &AppState, row: Media) -> AppResult<MediaResponse> {
    let url = state
        .storage
        .presign(
            &row.s3_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to presign media URL: {err}")))?;

    let thumbnail_url = match row.thumbnail_key.as_deref() {
        Some(key) => Some(
            state
                .storage
                .presign(key, Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS))
                .await
                .map_err(|err| AppError::internal(format!("failed to presign thumbnail: {err}")))?,
        ),
        None => None,
    };

    Ok(MediaResponse {
        id: row.id,
        url,
        thumbnail_url,
        mime_type: row.mime_type,
        size_bytes: row.size_bytes,
        is_public: row.is_public,
        tags: row.tags,
        created_at: row.created_at.and_utc().to_rfc3339(),
    })
}

pub fn list_for(
    conn: &mut diesel::PgConnection,
    related_to: ResourceKind,
    related_id: Uuid,
) -> QueryResult<Vec<Media>> {
    media::table
        .filter(media::related_to.eq(related_to.as_str()))
        .filter(media::related_id.eq(related_id))
        .filter(media::is_active.eq(true))
        .order(media::created_at.asc())
        .load(conn)
}

/// Object-store deletes are best-effort: a failed byte delete is logged and
/// the metadata delete proceeds, since orphaned bytes are reclaimed by the
/// maintenance binary.
pub async fn delete_bytes(state: &AppState, rows: &[Media]) {
    for row in rows {
        if let Err(err) = state.storage.remove(&row.s3_key).await {
            warn!(media_id = %row.id, key = %row.s3_key, error = %err, "failed to delete media object");
        }
        if let Some(thumbnail_key) = row.thumbnail_key.as_deref() {
            if let Err(err) = state.storage.remove(thumbnail_key).await {
                warn!(media_id = %row.id, key = %thumbnail_key, error = %err, "failed to delete thumbnail object");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_keeps_the_extension() {
        let media_id = Uuid::new_v4();
        let related_id = Uuid::new_v4();
        let key = object_key(ResourceKind::Request, related_id, media_id, "sink.JPG");
        assert!(key.starts_with("media/request/"));
        assert!(key.ends_with(".JPG"));
    }

    #[test]
    fn object_key_defaults_unknown_extension() {
        let key = object_key(
            ResourceKind::Lease,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "document",
        );
        assert!(key.ends_with(".bin"));
    }
}
