use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{AuthenticatedUser, RequestMeta};
use crate::authz::{self, Action};
use crate::enums::{AuditAction, CommentContext, NotificationKind, ResourceKind};
use crate::error::{AppError, AppResult};
use crate::models::{Comment, NewComment};
use crate::notify::{self, Fanout};
use crate::routes::{requests, scheduled, units};
use crate::schema::comments;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateCommentPayload {
    pub context_type: CommentContext,
    pub context_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub is_internal_note: bool,
}

#[derive(Deserialize)]
pub struct CommentListQuery {
    pub context_type: CommentContext,
    pub context_id: Uuid,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub context_type: String,
    pub context_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub message: String,
    pub is_external: bool,
    pub external_user_name: Option<String>,
    pub is_internal_note: bool,
    pub created_at: String,
}

fn to_response(comment: &Comment) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        context_type: comment.context_type.clone(),
        context_id: comment.context_id,
        sender_id: comment.sender_id,
        message: comment.message.clone(),
        is_external: comment.is_external,
        external_user_name: comment.external_user_name.clone(),
        is_internal_note: comment.is_internal_note,
        created_at: comment.created_at.and_utc().to_rfc3339(),
    }
}

/// The comment layer never dereferences its context beyond authorization;
/// each owning service decides who may write there. Returns the property the
/// context lives under together with whether the caller holds management
/// access on it.
fn authorize_context(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    context_type: CommentContext,
    context_id: Uuid,
) -> AppResult<(Uuid, Option<Uuid>)> {
    match context_type {
        CommentContext::Request => {
            let request = requests::load_request(conn, context_id)?;
            let creator = requests::creator_user_id(conn, &request);
            authz::authorize_work_item(
                conn,
                user,
                Action::Comment,
                &requests::scope_of(&request, creator),
            )?;
            Ok((request.property_id, request.unit_id))
        }
        CommentContext::ScheduledMaintenance => {
            let task = scheduled::load_task(conn, context_id)?;
            let creator = scheduled::creator_user_id(conn, &task);
            authz::authorize_work_item(
                conn,
                user,
                Action::Comment,
                &scheduled::scope_of(&task, creator),
            )?;
            Ok((task.property_id, task.unit_id))
        }
        CommentContext::Property => {
            let property = crate::routes::properties::load_property(conn, context_id)?;
            if !user.is_admin() {
                let associations =
                    authz::load_active_associations(conn, user.user_id, property.id)
                        .map_err(|_| AppError::forbidden())?;
                if associations.is_empty() {
                    return Err(AppError::forbidden());
                }
            }
            Ok((property.id, None))
        }
        CommentContext::Unit => {
            let unit = units::load_unit(conn, context_id)?;
            if !user.is_admin() {
                let associations =
                    authz::load_active_associations(conn, user.user_id, unit.property_id)
                        .map_err(|_| AppError::forbidden())?;
                if associations.is_empty() {
                    return Err(AppError::forbidden());
                }
            }
            Ok((unit.property_id, Some(unit.id)))
        }
    }
}

pub async fn create_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<CreateCommentPayload>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let message = payload.message.trim();
    if message.is_empty() {
        return Err(AppError::bad_request("message must not be empty"));
    }

    let mut conn = state.db()?;
    let (property_id, unit_id) =
        authorize_context(&mut conn, &user, payload.context_type, payload.context_id)?;

    // Internal notes are management-only; everyone else posts publicly.
    if payload.is_internal_note && !authz::has_management_access(&mut conn, &user, property_id) {
        return Err(AppError::forbidden());
    }

    let row = NewComment {
        id: Uuid::new_v4(),
        context_type: payload.context_type.as_str().to_string(),
        context_id: payload.context_id,
        sender_id: Some(user.user_id),
        message: message.to_string(),
        is_external: false,
        external_user_name: None,
        external_user_email: None,
        is_internal_note: payload.is_internal_note,
    };
    diesel::insert_into(comments::table).values(&row).execute(&mut conn)?;
    let created: Comment = comments::table.find(row.id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::Comment,
            created.id,
        )
        .with_metadata(json!({
            "context_type": created.context_type,
            "context_id": created.context_id,
        })),
    );
    drop(conn);

    if payload.context_type == CommentContext::Request && !payload.is_internal_note {
        notify::dispatch(
            &state,
            Fanout::new(
                NotificationKind::RequestCommented,
                format!("New comment: {message}"),
                ResourceKind::Request,
                payload.context_id,
                property_id,
            )
            .unit(unit_id)
            .actor(user.user_id),
        );
    }

    Ok((StatusCode::CREATED, Json(to_response(&created))))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Query(params): Query<CommentListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let mut conn = state.db()?;
    let (property_id, _unit_id) =
        authorize_context(&mut conn, &user, params.context_type, params.context_id)?;

    let include_internal = authz::has_management_access(&mut conn, &user, property_id);

    let mut query = comments::table
        .filter(comments::context_type.eq(params.context_type.as_str()))
        .filter(comments::context_id.eq(params.context_id))
        .filter(comments::is_active.eq(true))
        .into_boxed();
    if !include_internal {
        query = query.filter(comments::is_internal_note.eq(false));
    }

    let rows: Vec<Comment> = query.order(comments::created_at.asc()).load(&mut conn)?;
    Ok(Json(rows.iter().map(to_response).collect()))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let comment: Comment = comments::table
        .find(comment_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !comment.is_active {
        return Err(AppError::not_found());
    }

    if comment.sender_id != Some(user.user_id) {
        let context_type = CommentContext::parse(&comment.context_type)
            .ok_or_else(|| AppError::internal("corrupt comment context"))?;
        let (property_id, _) =
            authorize_context(&mut conn, &user, context_type, comment.context_id)?;
        if !authz::has_management_access(&mut conn, &user, property_id) {
            return Err(AppError::forbidden());
        }
    }

    diesel::update(comments::table.find(comment_id))
        .set((
            comments::is_active.eq(false),
            comments::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::Comment,
            comment_id,
        ),
    );

    Ok(StatusCode::NO_CONTENT)
}
