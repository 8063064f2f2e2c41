use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::Notification;
use crate::schema::notifications;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct NotificationListQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub notification_type: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub related_resource_type: Option<String>,
    pub related_resource_id: Option<Uuid>,
    pub sent_at: Option<String>,
    pub context_data: Value,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct MarkAllResponse {
    pub updated: usize,
}

fn to_response(notification: &Notification) -> NotificationResponse {
    NotificationResponse {
        id: notification.id,
        notification_type: notification.notification_type.clone(),
        message: notification.message.clone(),
        link: notification.link.clone(),
        is_read: notification.is_read,
        related_resource_type: notification.related_resource_type.clone(),
        related_resource_id: notification.related_resource_id,
        sent_at: notification.sent_at.map(|ts| ts.and_utc().to_rfc3339()),
        context_data: notification.context_data.clone(),
        created_at: notification.created_at.and_utc().to_rfc3339(),
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let mut conn = state.db()?;

    let mut query = notifications::table
        .filter(notifications::recipient_id.eq(user.user_id))
        .into_boxed();
    if params.unread_only {
        query = query.filter(notifications::is_read.eq(false));
    }

    let rows: Vec<Notification> = query
        .order(notifications::created_at.desc())
        .limit(200)
        .load(&mut conn)?;

    Ok(Json(rows.iter().map(to_response).collect()))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<NotificationResponse>> {
    let mut conn = state.db()?;

    let notification: Notification = notifications::table
        .find(notification_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if notification.recipient_id != user.user_id {
        return Err(AppError::not_found());
    }

    diesel::update(notifications::table.find(notification_id))
        .set((
            notifications::is_read.eq(true),
            notifications::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)?;

    let updated: Notification = notifications::table.find(notification_id).first(&mut conn)?;
    Ok(Json(to_response(&updated)))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<(StatusCode, Json<MarkAllResponse>)> {
    let mut conn = state.db()?;

    let updated = diesel::update(
        notifications::table
            .filter(notifications::recipient_id.eq(user.user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set((
        notifications::is_read.eq(true),
        notifications::updated_at.eq(state.clock.now_naive()),
    ))
    .execute(&mut conn)?;

    Ok((StatusCode::OK, Json(MarkAllResponse { updated })))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;

    let deleted = diesel::delete(
        notifications::table
            .find(notification_id)
            .filter(notifications::recipient_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;

    if deleted == 0 {
        return Err(AppError::not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}
