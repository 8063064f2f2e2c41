use axum::extract::{Json, Path, State};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{password, RequestMeta};
use crate::enums::{
    AuditAction, GlobalRole, NotificationKind, RegistrationStatus, RequestStatus, ResourceKind,
};
use crate::error::{AppError, AppResult};
use crate::media;
use crate::models::{
    Comment, MaintenanceRequest, NewComment, NewUser, Property, ScheduledTask, Unit, User,
};
use crate::notify::{self, Fanout};
use crate::routes::requests::{apply_status_change, visible_comments};
use crate::schema::{comments, maintenance_requests, properties, scheduled_tasks, units, users};
use crate::state::AppState;
use crate::utils::digits;

pub const EXTERNAL_VENDOR_DOMAIN: &str = "external.vendor";

#[derive(Deserialize)]
pub struct PublicUpdatePayload {
    pub name: String,
    pub phone: String,
    pub status: Option<RequestStatus>,
    pub comment_message: Option<String>,
}

#[derive(Deserialize)]
pub struct PublicCommentPayload {
    pub name: String,
    pub phone: String,
    pub comment_message: String,
}

#[derive(Serialize)]
pub struct PublicAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Serialize)]
pub struct PublicCommentView {
    pub message: String,
    pub sender_name: String,
    pub is_external: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct PublicRequestView {
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub created_at: String,
    pub property_name: String,
    pub address: PublicAddress,
    pub unit_name: Option<String>,
    pub comments: Vec<PublicCommentView>,
    pub media: Vec<String>,
}

#[derive(Serialize)]
pub struct PublicScheduleView {
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub scheduled_date: String,
    pub next_due_date: Option<String>,
    pub property_name: String,
    pub address: PublicAddress,
    pub unit_name: Option<String>,
    pub comments: Vec<PublicCommentView>,
}

fn fmt_ts(ts: chrono::NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339()
}

/// Token lookup for requests. Disabled, expired, and unknown tokens are all
/// the same NotFound so a prober learns nothing about which check failed.
fn find_request_by_token(
    state: &AppState,
    conn: &mut PgConnection,
    token: &str,
) -> AppResult<MaintenanceRequest> {
    let request: Option<MaintenanceRequest> = maintenance_requests::table
        .filter(maintenance_requests::public_token.eq(token))
        .filter(maintenance_requests::public_link_enabled.eq(true))
        .filter(maintenance_requests::is_active.eq(true))
        .first(conn)
        .optional()
        .map_err(|_| AppError::not_found())?;

    let request = request.ok_or_else(AppError::not_found)?;
    match request.public_link_expires_at {
        Some(expires_at) if state.clock.now_naive() < expires_at => Ok(request),
        _ => Err(AppError::not_found()),
    }
}

fn find_schedule_by_token(
    state: &AppState,
    conn: &mut PgConnection,
    token: &str,
) -> AppResult<ScheduledTask> {
    let task: Option<ScheduledTask> = scheduled_tasks::table
        .filter(scheduled_tasks::public_link_token.eq(token))
        .filter(scheduled_tasks::public_link_enabled.eq(true))
        .filter(scheduled_tasks::is_active.eq(true))
        .first(conn)
        .optional()
        .map_err(|_| AppError::not_found())?;

    let task = task.ok_or_else(AppError::not_found)?;
    match task.public_link_expires {
        Some(expires_at) if state.clock.now_naive() < expires_at => Ok(task),
        _ => Err(AppError::not_found()),
    }
}

fn public_address(property: &Property) -> PublicAddress {
    PublicAddress {
        street: property.street.clone(),
        city: property.city.clone(),
        state: property.state.clone(),
        zip_code: property.zip_code.clone(),
        country: property.country.clone(),
    }
}

fn comment_views(conn: &mut PgConnection, rows: Vec<Comment>) -> Vec<PublicCommentView> {
    rows.into_iter()
        .map(|comment| {
            let sender_name = if comment.is_external {
                comment
                    .external_user_name
                    .clone()
                    .unwrap_or_else(|| "External vendor".to_string())
            } else {
                comment
                    .sender_id
                    .and_then(|sender| {
                        users::table
                            .find(sender)
                            .first::<User>(conn)
                            .optional()
                            .ok()
                            .flatten()
                    })
                    .map(|user| user.display_name())
                    .unwrap_or_else(|| "Staff".to_string())
            };
            PublicCommentView {
                message: comment.message,
                sender_name,
                is_external: comment.is_external,
                created_at: fmt_ts(comment.created_at),
            }
        })
        .collect()
}

async fn build_request_view(
    state: &AppState,
    request: &MaintenanceRequest,
) -> AppResult<PublicRequestView> {
    let mut conn = state.db()?;
    let property: Property = properties::table.find(request.property_id).first(&mut conn)?;
    let unit_name = match request.unit_id {
        Some(unit_id) => units::table
            .find(unit_id)
            .first::<Unit>(&mut conn)
            .optional()?
            .map(|unit| unit.name),
        None => None,
    };

    // Internal notes never cross the public boundary.
    let comment_rows = visible_comments(&mut conn, request, false)?;
    let comments = comment_views(&mut conn, comment_rows);

    let media_rows = media::list_for(&mut conn, ResourceKind::Request, request.id)?;
    drop(conn);

    let mut media_urls = Vec::new();
    for row in media_rows.into_iter().filter(|row| row.is_public) {
        media_urls.push(media::to_response(state, row).await?.url);
    }

    Ok(PublicRequestView {
        title: request.title.clone(),
        description: request.description.clone(),
        category: request.category.clone(),
        priority: request.priority.clone(),
        status: request.status.clone(),
        created_at: fmt_ts(request.created_at),
        property_name: property.name.clone(),
        address: public_address(&property),
        unit_name,
        comments,
        media: media_urls,
    })
}

pub async fn get_public_request(
    State(state): State<AppState>,
    Path(token): Path<String>,
    meta: RequestMeta,
) -> AppResult<Json<PublicRequestView>> {
    let mut conn = state.db()?;
    let request = find_request_by_token(&state, &mut conn, &token)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::External(token.clone()),
            AuditAction::PublicView,
            ResourceKind::Request,
            request.id,
        ),
    );
    drop(conn);

    let view = build_request_view(&state, &request).await?;
    Ok(Json(view))
}

/// Find or synthesize the pseudo-user behind an external vendor acting
/// through a public link. Identity is keyed on the digits of the phone
/// number; repeat visits reuse the same row.
fn resolve_pseudo_user(conn: &mut PgConnection, name: &str, phone: &str) -> AppResult<User> {
    let phone_digits = digits(phone);
    if phone_digits.is_empty() {
        return Err(AppError::bad_request("phone must contain digits"));
    }
    let email = format!("{phone_digits}@{EXTERNAL_VENDOR_DOMAIN}");

    let existing: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(conn)
        .optional()?;
    if let Some(user) = existing {
        return Ok(user);
    }

    let row = NewUser {
        id: Uuid::new_v4(),
        first_name: name.trim().to_string(),
        last_name: String::new(),
        email,
        phone: Some(phone_digits),
        password_hash: password::hash_password(&password::random_password())
            .map_err(AppError::internal)?,
        role: GlobalRole::Vendor.as_str().to_string(),
        registration_status: RegistrationStatus::Active.as_str().to_string(),
        notification_preferences: json!({}),
    };
    diesel::insert_into(users::table).values(&row).execute(conn)?;
    Ok(users::table.find(row.id).first(conn)?)
}

pub async fn public_request_update(
    State(state): State<AppState>,
    Path(token): Path<String>,
    meta: RequestMeta,
    Json(payload): Json<PublicUpdatePayload>,
) -> AppResult<Json<PublicRequestView>> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::bad_request("phone is required"));
    }
    if payload.status.is_none() && payload.comment_message.is_none() {
        return Err(AppError::bad_request(
            "provide a status update, a comment, or both",
        ));
    }

    if let Some(status) = payload.status {
        if !matches!(status, RequestStatus::InProgress | RequestStatus::Completed) {
            return Err(AppError::bad_request(
                "external updates may only set in_progress or completed",
            ));
        }
    }

    let mut conn = state.db()?;
    let request = find_request_by_token(&state, &mut conn, &token)?;

    let current = RequestStatus::parse(&request.status)
        .ok_or_else(|| AppError::internal("corrupt request status"))?;
    if current.is_terminal() {
        return Err(AppError::bad_request("request is already closed"));
    }

    let pseudo_user = resolve_pseudo_user(&mut conn, &payload.name, &payload.phone)?;

    let mut updated = request.clone();
    if let Some(status) = payload.status {
        updated = apply_status_change(
            &state,
            &mut conn,
            &request,
            status,
            Some(pseudo_user.id),
            Some("Updated via public link"),
        )?;
    }

    if let Some(message) = payload
        .comment_message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
    {
        let comment = NewComment {
            id: Uuid::new_v4(),
            context_type: ResourceKind::Request.as_str().to_string(),
            context_id: request.id,
            sender_id: Some(pseudo_user.id),
            message: message.to_string(),
            is_external: true,
            external_user_name: Some(payload.name.trim().to_string()),
            external_user_email: Some(pseudo_user.email.clone()),
            is_internal_note: false,
        };
        diesel::insert_into(comments::table)
            .values(&comment)
            .execute(&mut conn)?;
    }

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::External(format!("{} <{}>", payload.name.trim(), pseudo_user.email)),
            AuditAction::PublicUpdate,
            ResourceKind::Request,
            request.id,
        )
        .with_metadata(json!({
            "status": payload.status.map(|s| s.as_str()),
            "commented": payload.comment_message.is_some(),
        })),
    );
    drop(conn);

    info!(request_id = %request.id, "public link update applied");

    let kind = if payload.status.is_some() {
        NotificationKind::RequestStatusChanged
    } else {
        NotificationKind::RequestCommented
    };
    notify::dispatch(
        &state,
        Fanout::new(
            kind,
            format!(
                "External vendor {} updated \"{}\"",
                payload.name.trim(),
                updated.title
            ),
            ResourceKind::Request,
            updated.id,
            updated.property_id,
        )
        .unit(updated.unit_id)
        .creator(updated.created_by_property_user)
        .actor(pseudo_user.id)
        .context(json!({ "title": updated.title, "status": updated.status })),
    );

    let view = build_request_view(&state, &updated).await?;
    Ok(Json(view))
}

pub async fn get_public_schedule(
    State(state): State<AppState>,
    Path(token): Path<String>,
    meta: RequestMeta,
) -> AppResult<Json<PublicScheduleView>> {
    let mut conn = state.db()?;
    let task = find_schedule_by_token(&state, &mut conn, &token)?;

    let property: Property = properties::table.find(task.property_id).first(&mut conn)?;
    let unit_name = match task.unit_id {
        Some(unit_id) => units::table
            .find(unit_id)
            .first::<Unit>(&mut conn)
            .optional()?
            .map(|unit| unit.name),
        None => None,
    };

    let comment_rows: Vec<Comment> = comments::table
        .filter(comments::context_type.eq(ResourceKind::ScheduledMaintenance.as_str()))
        .filter(comments::context_id.eq(task.id))
        .filter(comments::is_active.eq(true))
        .filter(comments::is_internal_note.eq(false))
        .order(comments::created_at.asc())
        .load(&mut conn)?;
    let comment_list = comment_views(&mut conn, comment_rows);

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::External(token.clone()),
            AuditAction::PublicView,
            ResourceKind::ScheduledMaintenance,
            task.id,
        ),
    );

    Ok(Json(PublicScheduleView {
        title: task.title.clone(),
        description: task.description.clone(),
        category: task.category.clone(),
        priority: task.priority.clone(),
        status: task.status.clone(),
        scheduled_date: fmt_ts(task.scheduled_date),
        next_due_date: task.next_due_date.map(fmt_ts),
        property_name: property.name.clone(),
        address: public_address(&property),
        unit_name,
        comments: comment_list,
    }))
}

/// External vendors can comment on a shared schedule; status stays internal.
pub async fn public_schedule_comment(
    State(state): State<AppState>,
    Path(token): Path<String>,
    meta: RequestMeta,
    Json(payload): Json<PublicCommentPayload>,
) -> AppResult<axum::http::StatusCode> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::bad_request("phone is required"));
    }
    let message = payload.comment_message.trim();
    if message.is_empty() {
        return Err(AppError::bad_request("comment_message must not be empty"));
    }

    let mut conn = state.db()?;
    let task = find_schedule_by_token(&state, &mut conn, &token)?;
    let pseudo_user = resolve_pseudo_user(&mut conn, &payload.name, &payload.phone)?;

    let comment = NewComment {
        id: Uuid::new_v4(),
        context_type: ResourceKind::ScheduledMaintenance.as_str().to_string(),
        context_id: task.id,
        sender_id: Some(pseudo_user.id),
        message: message.to_string(),
        is_external: true,
        external_user_name: Some(payload.name.trim().to_string()),
        external_user_email: Some(pseudo_user.email.clone()),
        is_internal_note: false,
    };
    diesel::insert_into(comments::table)
        .values(&comment)
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::External(format!("{} <{}>", payload.name.trim(), pseudo_user.email)),
            AuditAction::PublicUpdate,
            ResourceKind::ScheduledMaintenance,
            task.id,
        ),
    );
    drop(conn);

    notify::dispatch(
        &state,
        Fanout::new(
            NotificationKind::RequestCommented,
            format!(
                "External vendor {} commented on \"{}\"",
                payload.name.trim(),
                task.title
            ),
            ResourceKind::ScheduledMaintenance,
            task.id,
            task.property_id,
        )
        .unit(task.unit_id)
        .creator(task.created_by_property_user)
        .actor(pseudo_user.id),
    );

    Ok(axum::http::StatusCode::CREATED)
}
