use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{AuthenticatedUser, RequestMeta};
use crate::authz::{self, Action, WorkItemScope};
use crate::enums::{
    AssigneeKind, AuditAction, GlobalRole, NotificationKind, Priority, PropertyRole,
    RequestCategory, RequestStatus, ResourceKind,
};
use crate::error::{AppError, AppResult};
use crate::history;
use crate::media::{self, MediaResponse, MediaUpload};
use crate::models::{
    Comment, MaintenanceRequest, Media, NewMaintenanceRequest, NewPropertyUser, PropertyUser, User,
    Vendor,
};
use crate::notify::{self, Fanout};
use crate::schema::{
    comments, generated_requests, maintenance_requests, media as media_table, notifications,
    property_users, units, users, vendors,
};
use crate::state::AppState;
use crate::utils::generate_public_token;

pub const DEFAULT_PUBLIC_LINK_DAYS: i64 = 7;

#[derive(Deserialize)]
pub struct CreateRequestPayload {
    pub title: String,
    pub description: String,
    pub category: RequestCategory,
    pub priority: Priority,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct RequestListQuery {
    pub property_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct UpdateRequestPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<RequestCategory>,
    pub priority: Option<Priority>,
}

#[derive(Deserialize)]
pub struct AssignRequestPayload {
    pub assignee_id: Uuid,
    pub assignee_kind: AssigneeKind,
}

#[derive(Deserialize)]
pub struct UpdateStatusPayload {
    pub status: RequestStatus,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct FeedbackPayload {
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct EnablePublicLinkPayload {
    pub expires_in_days: Option<i64>,
    #[serde(default)]
    pub rotate: bool,
}

#[derive(Serialize)]
pub struct PublicLinkResponse {
    pub url: String,
    pub token: String,
    pub expires_at: String,
}

#[derive(Serialize, Clone)]
pub struct StatusHistoryResponse {
    pub status: String,
    pub changed_at: String,
    pub changed_by: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Serialize, Clone)]
pub struct FeedbackResponse {
    pub rating: i32,
    pub comment: Option<String>,
    pub submitted_at: String,
    pub submitted_by: Option<Uuid>,
}

#[derive(Serialize)]
pub struct RequestResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub created_by_property_user: Uuid,
    pub assigned_to_id: Option<Uuid>,
    pub assigned_to_model: Option<String>,
    pub assigned_at: Option<String>,
    pub resolved_at: Option<String>,
    pub verified_by: Option<Uuid>,
    pub public_link_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackResponse>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct RequestDetailResponse {
    #[serde(flatten)]
    pub request: RequestResponse,
    pub status_history: Vec<StatusHistoryResponse>,
    pub media: Vec<MediaResponse>,
}

fn fmt_ts(ts: chrono::NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339()
}

pub(crate) fn to_response(request: &MaintenanceRequest) -> RequestResponse {
    RequestResponse {
        id: request.id,
        title: request.title.clone(),
        description: request.description.clone(),
        category: request.category.clone(),
        priority: request.priority.clone(),
        status: request.status.clone(),
        property_id: request.property_id,
        unit_id: request.unit_id,
        created_by_property_user: request.created_by_property_user,
        assigned_to_id: request.assigned_to_id,
        assigned_to_model: request.assigned_to_model.clone(),
        assigned_at: request.assigned_at.map(fmt_ts),
        resolved_at: request.resolved_at.map(fmt_ts),
        verified_by: request.verified_by,
        public_link_enabled: request.public_link_enabled,
        feedback: request.feedback_submitted_at.map(|submitted_at| FeedbackResponse {
            rating: request.feedback_rating.unwrap_or_default(),
            comment: request.feedback_comment.clone(),
            submitted_at: fmt_ts(submitted_at),
            submitted_by: request.feedback_submitted_by,
        }),
        created_at: fmt_ts(request.created_at),
        updated_at: fmt_ts(request.updated_at),
    }
}

pub(crate) fn load_request(
    conn: &mut PgConnection,
    request_id: Uuid,
) -> AppResult<MaintenanceRequest> {
    let request: MaintenanceRequest = maintenance_requests::table
        .find(request_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !request.is_active {
        return Err(AppError::not_found());
    }
    Ok(request)
}

pub(crate) fn creator_user_id(
    conn: &mut PgConnection,
    request: &MaintenanceRequest,
) -> Option<Uuid> {
    property_users::table
        .find(request.created_by_property_user)
        .select(property_users::user_id)
        .first(conn)
        .optional()
        .ok()
        .flatten()
}

pub(crate) fn scope_of(request: &MaintenanceRequest, creator_user: Option<Uuid>) -> WorkItemScope {
    let assignee_user = match request.assigned_to_model.as_deref() {
        Some("User") => request.assigned_to_id,
        _ => None,
    };
    WorkItemScope {
        property_id: request.property_id,
        unit_id: request.unit_id,
        creator_user_id: creator_user,
        assignee_user_id: assignee_user,
    }
}

fn status_of(request: &MaintenanceRequest) -> AppResult<RequestStatus> {
    RequestStatus::parse(&request.status)
        .ok_or_else(|| AppError::internal(format!("corrupt request status '{}'", request.status)))
}

/// Resolve the acting user's association on a property, creating an
/// admin_access row for global admins that have none so every request keeps a
/// valid creator association.
fn resolve_actor_association(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    property_id: Uuid,
    unit_id: Option<Uuid>,
) -> AppResult<PropertyUser> {
    let associations = authz::load_active_associations(conn, user.user_id, property_id)?;

    if let Some(on_unit) = associations
        .iter()
        .find(|pu| unit_id.is_some() && pu.unit_id == unit_id)
    {
        return Ok(on_unit.clone());
    }
    if let Some(managing) = associations.iter().find(|pu| pu.has_management_role()) {
        return Ok(managing.clone());
    }
    if let Some(any) = associations.first() {
        return Ok(any.clone());
    }

    if user.role != GlobalRole::Admin {
        return Err(AppError::forbidden());
    }

    let now = chrono::Utc::now().naive_utc();
    let row = NewPropertyUser {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        property_id,
        unit_id: None,
        roles: vec![PropertyRole::AdminAccess.as_str().to_string()],
        start_date: now,
        lease_id: None,
    };
    diesel::insert_into(property_users::table)
        .values(&row)
        .execute(conn)?;
    Ok(property_users::table.find(row.id).first(conn)?)
}

async fn build_detail(
    state: &AppState,
    request: MaintenanceRequest,
) -> AppResult<RequestDetailResponse> {
    let mut conn = state.db()?;
    let entries = history::for_context(&mut conn, ResourceKind::Request, request.id)?;
    let media_rows = media::list_for(&mut conn, ResourceKind::Request, request.id)?;
    drop(conn);

    let mut media_responses = Vec::with_capacity(media_rows.len());
    for row in media_rows {
        media_responses.push(media::to_response(state, row).await?);
    }

    Ok(RequestDetailResponse {
        request: to_response(&request),
        status_history: entries
            .into_iter()
            .map(|entry| StatusHistoryResponse {
                status: entry.status,
                changed_at: fmt_ts(entry.changed_at),
                changed_by: entry.changed_by,
                notes: entry.notes,
            })
            .collect(),
        media: media_responses,
    })
}

pub async fn create_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<CreateRequestPayload>,
) -> AppResult<(StatusCode, Json<RequestDetailResponse>)> {
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    let description = payload.description.trim().to_string();
    if description.is_empty() {
        return Err(AppError::bad_request("description must not be empty"));
    }

    let mut conn = state.db()?;

    if let Some(unit_id) = payload.unit_id {
        let belongs: Option<Uuid> = units::table
            .find(unit_id)
            .filter(units::is_active.eq(true))
            .select(units::property_id)
            .first(&mut conn)
            .optional()?;
        if belongs != Some(payload.property_id) {
            return Err(AppError::bad_request(
                "unit does not belong to the given property",
            ));
        }
    }

    // Tenants may only open requests on their own unit; managers and admins
    // create anywhere they manage.
    if user.role == GlobalRole::Tenant {
        let unit_id = payload
            .unit_id
            .ok_or_else(|| AppError::bad_request("unit_id is required for tenant requests"))?;
        if !authz::is_tenant_on_unit(&mut conn, user.user_id, payload.property_id, unit_id) {
            return Err(AppError::forbidden());
        }
    } else if user.role != GlobalRole::Admin
        && !authz::has_management_access(&mut conn, &user, payload.property_id)
    {
        return Err(AppError::forbidden());
    }

    let creator = resolve_actor_association(&mut conn, &user, payload.property_id, payload.unit_id)?;

    let now = state.clock.now_naive();
    let request_id = Uuid::new_v4();
    let request = conn.transaction::<MaintenanceRequest, AppError, _>(|conn| {
        let row = NewMaintenanceRequest {
            id: request_id,
            title: title.clone(),
            description: description.clone(),
            category: payload.category.as_str().to_string(),
            priority: payload.priority.as_str().to_string(),
            status: RequestStatus::New.as_str().to_string(),
            property_id: payload.property_id,
            unit_id: payload.unit_id,
            created_by_property_user: creator.id,
        };
        diesel::insert_into(maintenance_requests::table)
            .values(&row)
            .execute(conn)?;

        history::append(
            conn,
            ResourceKind::Request,
            request_id,
            RequestStatus::New.as_str(),
            now,
            Some(user.user_id),
            Some("Request created"),
        )?;

        Ok(maintenance_requests::table.find(request_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::Request,
            request.id,
        )
        .with_change(None, Some(json!({ "title": request.title, "status": request.status }))),
    );
    drop(conn);

    info!(request_id = %request.id, property_id = %request.property_id, "maintenance request created");

    notify::dispatch(
        &state,
        Fanout::new(
            NotificationKind::RequestCreated,
            format!("New maintenance request: {}", request.title),
            ResourceKind::Request,
            request.id,
            request.property_id,
        )
        .unit(request.unit_id)
        .creator(request.created_by_property_user)
        .actor(user.user_id)
        .context(json!({ "title": request.title, "status": request.status })),
    );

    let detail = build_detail(&state, request).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn list_requests(
    State(state): State<AppState>,
    Query(params): Query<RequestListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<RequestResponse>>> {
    let mut conn = state.db()?;

    let mut query = maintenance_requests::table.into_boxed();

    if !params.include_inactive {
        query = query.filter(maintenance_requests::is_active.eq(true));
    }
    if let Some(property_id) = params.property_id {
        query = query.filter(maintenance_requests::property_id.eq(property_id));
    }
    if let Some(unit_id) = params.unit_id {
        query = query.filter(maintenance_requests::unit_id.eq(unit_id));
    }
    if let Some(status) = params.status {
        query = query.filter(maintenance_requests::status.eq(status.as_str()));
    }

    if !user.is_admin() {
        let property_ids = authz::associated_property_ids(&mut conn, user.user_id)?;
        query = query.filter(maintenance_requests::property_id.eq_any(property_ids));
    }

    let rows: Vec<MaintenanceRequest> = query
        .order(maintenance_requests::created_at.desc())
        .load(&mut conn)?;

    // Bulk-resolve creators so the per-row visibility check stays pure.
    let creator_ids: Vec<Uuid> = rows.iter().map(|r| r.created_by_property_user).collect();
    let creators: Vec<PropertyUser> = property_users::table
        .filter(property_users::id.eq_any(&creator_ids))
        .load(&mut conn)?;
    let creator_map: std::collections::HashMap<Uuid, Uuid> =
        creators.into_iter().map(|pu| (pu.id, pu.user_id)).collect();

    let mut visible = Vec::with_capacity(rows.len());
    for request in rows {
        let creator_user = creator_map.get(&request.created_by_property_user).copied();
        let scope = scope_of(&request, creator_user);
        if authz::authorize_work_item(&mut conn, &user, Action::Read, &scope).is_ok() {
            visible.push(to_response(&request));
        }
    }

    Ok(Json(visible))
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<RequestDetailResponse>> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Read, &scope_of(&request, creator_user))?;
    drop(conn);

    let detail = build_detail(&state, request).await?;
    Ok(Json(detail))
}

pub async fn update_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdateRequestPayload>,
) -> AppResult<Json<RequestDetailResponse>> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Update, &scope_of(&request, creator_user))?;

    let is_management =
        user.is_admin() || authz::has_management_access(&mut conn, &user, request.property_id);

    // Tenant creators may only retitle/redescribe while the request is new.
    if !is_management {
        if status_of(&request)? != RequestStatus::New {
            return Err(AppError::forbidden());
        }
        if payload.category.is_some() || payload.priority.is_some() {
            return Err(AppError::forbidden());
        }
    }

    let title = match payload.title {
        Some(ref title) => {
            let trimmed = title.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("title must not be empty"));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    if title.is_none()
        && payload.description.is_none()
        && payload.category.is_none()
        && payload.priority.is_none()
    {
        return Err(AppError::bad_request("no changes provided"));
    }

    let old_snapshot = json!({
        "title": request.title,
        "description": request.description,
        "category": request.category,
        "priority": request.priority,
    });

    let now = state.clock.now_naive();
    let updated = conn.transaction::<MaintenanceRequest, AppError, _>(|conn| {
        if let Some(title) = &title {
            diesel::update(maintenance_requests::table.find(request_id))
                .set(maintenance_requests::title.eq(title))
                .execute(conn)?;
        }
        if let Some(description) = &payload.description {
            diesel::update(maintenance_requests::table.find(request_id))
                .set(maintenance_requests::description.eq(description.trim()))
                .execute(conn)?;
        }
        if let Some(category) = payload.category {
            diesel::update(maintenance_requests::table.find(request_id))
                .set(maintenance_requests::category.eq(category.as_str()))
                .execute(conn)?;
        }
        if let Some(priority) = payload.priority {
            diesel::update(maintenance_requests::table.find(request_id))
                .set(maintenance_requests::priority.eq(priority.as_str()))
                .execute(conn)?;
        }
        diesel::update(maintenance_requests::table.find(request_id))
            .set(maintenance_requests::updated_at.eq(now))
            .execute(conn)?;
        Ok(maintenance_requests::table.find(request_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::Request,
            updated.id,
        )
        .with_change(
            Some(old_snapshot),
            Some(json!({
                "title": updated.title,
                "description": updated.description,
                "category": updated.category,
                "priority": updated.priority,
            })),
        ),
    );
    drop(conn);

    let detail = build_detail(&state, updated).await?;
    Ok(Json(detail))
}

pub async fn delete_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Delete, &scope_of(&request, creator_user))?;

    let media_rows: Vec<Media> = media::list_for(&mut conn, ResourceKind::Request, request_id)?;

    conn.transaction::<(), AppError, _>(|conn| {
        diesel::delete(
            comments::table
                .filter(comments::context_type.eq(ResourceKind::Request.as_str()))
                .filter(comments::context_id.eq(request_id)),
        )
        .execute(conn)?;

        diesel::delete(
            notifications::table
                .filter(notifications::related_resource_type.eq(ResourceKind::Request.as_str()))
                .filter(notifications::related_resource_id.eq(request_id)),
        )
        .execute(conn)?;

        diesel::delete(
            media_table::table
                .filter(media_table::related_to.eq(ResourceKind::Request.as_str()))
                .filter(media_table::related_id.eq(request_id)),
        )
        .execute(conn)?;

        history::delete_for_context(conn, ResourceKind::Request, request_id)?;

        diesel::delete(
            generated_requests::table.filter(generated_requests::request_id.eq(request_id)),
        )
        .execute(conn)?;

        diesel::delete(maintenance_requests::table.find(request_id)).execute(conn)?;
        Ok(())
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::Request,
            request_id,
        )
        .with_change(Some(json!({ "title": request.title })), None),
    );
    drop(conn);

    // Bytes go last; a failed object delete is logged, never surfaced.
    media::delete_bytes(&state, &media_rows).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<AssignRequestPayload>,
) -> AppResult<Json<RequestDetailResponse>> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Assign, &scope_of(&request, creator_user))?;

    let current = status_of(&request)?;
    if current.is_terminal() {
        return Err(AppError::bad_request(
            "cannot assign an archived or cancelled request",
        ));
    }

    let assignee_name = match payload.assignee_kind {
        AssigneeKind::User => {
            let assignee: Option<User> = users::table
                .find(payload.assignee_id)
                .filter(users::is_active.eq(true))
                .first(&mut conn)
                .optional()?;
            assignee
                .map(|u| u.display_name())
                .ok_or_else(|| AppError::bad_request("assignee user does not exist"))?
        }
        AssigneeKind::Vendor => {
            let vendor: Option<Vendor> = vendors::table
                .find(payload.assignee_id)
                .filter(vendors::is_active.eq(true))
                .first(&mut conn)
                .optional()?;
            vendor
                .map(|v| v.name)
                .ok_or_else(|| AppError::bad_request("assignee vendor does not exist"))?
        }
    };

    let now = state.clock.now_naive();
    let already_assigned = request.assigned_to_id == Some(payload.assignee_id)
        && request.assigned_to_model.as_deref() == Some(payload.assignee_kind.as_str());

    let updated = if already_assigned {
        // Re-assigning the same target refreshes the timestamp only.
        diesel::update(maintenance_requests::table.find(request_id))
            .set((
                maintenance_requests::assigned_at.eq(Some(now)),
                maintenance_requests::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        maintenance_requests::table.find(request_id).first(&mut conn)?
    } else {
        let assigner = authz::load_active_associations(&mut conn, user.user_id, request.property_id)?
            .into_iter()
            .find(PropertyUser::has_management_role)
            .map(|pu| pu.id);

        conn.transaction::<MaintenanceRequest, AppError, _>(|conn| {
            diesel::update(maintenance_requests::table.find(request_id))
                .set((
                    maintenance_requests::assigned_to_id.eq(Some(payload.assignee_id)),
                    maintenance_requests::assigned_to_model
                        .eq(Some(payload.assignee_kind.as_str())),
                    maintenance_requests::assigned_by_property_user.eq(assigner),
                    maintenance_requests::assigned_at.eq(Some(now)),
                    maintenance_requests::updated_at.eq(now),
                ))
                .execute(conn)?;

            if current == RequestStatus::New {
                diesel::update(maintenance_requests::table.find(request_id))
                    .set(maintenance_requests::status.eq(RequestStatus::Assigned.as_str()))
                    .execute(conn)?;
                history::append(
                    conn,
                    ResourceKind::Request,
                    request_id,
                    RequestStatus::Assigned.as_str(),
                    now,
                    Some(user.user_id),
                    Some(&format!("Assigned to {assignee_name}")),
                )?;
            }

            Ok(maintenance_requests::table.find(request_id).first(conn)?)
        })?
    };

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Assign,
            ResourceKind::Request,
            request_id,
        )
        .with_metadata(json!({
            "assignee_id": payload.assignee_id,
            "assignee_kind": payload.assignee_kind.as_str(),
        })),
    );
    drop(conn);

    if !already_assigned {
        let assignee_user = match payload.assignee_kind {
            AssigneeKind::User => Some(payload.assignee_id),
            AssigneeKind::Vendor => None,
        };
        notify::dispatch(
            &state,
            Fanout::new(
                NotificationKind::RequestAssigned,
                format!("Request \"{}\" assigned to {assignee_name}", updated.title),
                ResourceKind::Request,
                updated.id,
                updated.property_id,
            )
            .unit(updated.unit_id)
            .creator(updated.created_by_property_user)
            .assignee(assignee_user)
            .actor(user.user_id)
            .context(json!({ "title": updated.title, "status": updated.status })),
        );
    }

    let detail = build_detail(&state, updated).await?;
    Ok(Json(detail))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdateStatusPayload>,
) -> AppResult<Json<RequestDetailResponse>> {
    if !matches!(
        payload.status,
        RequestStatus::InProgress | RequestStatus::Completed | RequestStatus::Cancelled
    ) {
        return Err(AppError::bad_request(
            "use the verify, reopen, or archive endpoints for that transition",
        ));
    }

    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    let scope = scope_of(&request, creator_user);

    let action = if payload.status == RequestStatus::Cancelled {
        Action::Cancel
    } else {
        Action::AdvanceStatus
    };
    authz::authorize_work_item(&mut conn, &user, action, &scope)?;

    let current = status_of(&request)?;
    if payload.status != RequestStatus::Cancelled && !current.can_transition_to(payload.status) {
        return Err(AppError::bad_request(format!(
            "cannot move request from {current} to {}",
            payload.status
        )));
    }
    if payload.status == RequestStatus::Cancelled && current.is_terminal() {
        return Err(AppError::bad_request("request is already closed"));
    }

    let updated = apply_status_change(
        &state,
        &mut conn,
        &request,
        payload.status,
        Some(user.user_id),
        payload.notes.as_deref(),
    )?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::StatusChange,
            ResourceKind::Request,
            request_id,
        )
        .with_change(
            Some(json!({ "status": current.as_str() })),
            Some(json!({ "status": updated.status })),
        ),
    );
    drop(conn);

    notify_status_change(&state, &updated, user.user_id);

    let detail = build_detail(&state, updated).await?;
    Ok(Json(detail))
}

/// One status transition inside a transaction: row update, resolution
/// bookkeeping, and exactly one history entry.
pub(crate) fn apply_status_change(
    state: &AppState,
    conn: &mut PgConnection,
    request: &MaintenanceRequest,
    next: RequestStatus,
    changed_by: Option<Uuid>,
    notes: Option<&str>,
) -> AppResult<MaintenanceRequest> {
    let now = state.clock.now_naive();
    let request_id = request.id;

    conn.transaction::<MaintenanceRequest, AppError, _>(|conn| {
        diesel::update(maintenance_requests::table.find(request_id))
            .set((
                maintenance_requests::status.eq(next.as_str()),
                maintenance_requests::updated_at.eq(now),
            ))
            .execute(conn)?;

        if next == RequestStatus::Completed {
            diesel::update(maintenance_requests::table.find(request_id))
                .set(maintenance_requests::resolved_at.eq(Some(now)))
                .execute(conn)?;
        }

        history::append(
            conn,
            ResourceKind::Request,
            request_id,
            next.as_str(),
            now,
            changed_by,
            notes,
        )?;

        Ok(maintenance_requests::table.find(request_id).first(conn)?)
    })
}

pub(crate) fn notify_status_change(state: &AppState, request: &MaintenanceRequest, actor: Uuid) {
    notify::dispatch(
        state,
        Fanout::new(
            NotificationKind::RequestStatusChanged,
            format!("Request \"{}\" is now {}", request.title, request.status),
            ResourceKind::Request,
            request.id,
            request.property_id,
        )
        .unit(request.unit_id)
        .creator(request.created_by_property_user)
        .assignee(match request.assigned_to_model.as_deref() {
            Some("User") => request.assigned_to_id,
            _ => None,
        })
        .actor(actor)
        .context(json!({ "title": request.title, "status": request.status })),
    );
}

pub async fn verify_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<Json<RequestDetailResponse>> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Verify, &scope_of(&request, creator_user))?;

    if status_of(&request)? != RequestStatus::Completed {
        return Err(AppError::bad_request(
            "only completed requests can be verified",
        ));
    }

    let now = state.clock.now_naive();
    let updated = conn.transaction::<MaintenanceRequest, AppError, _>(|conn| {
        diesel::update(maintenance_requests::table.find(request_id))
            .set((
                maintenance_requests::status.eq(RequestStatus::Verified.as_str()),
                maintenance_requests::verified_by.eq(Some(user.user_id)),
                maintenance_requests::updated_at.eq(now),
            ))
            .execute(conn)?;
        history::append(
            conn,
            ResourceKind::Request,
            request_id,
            RequestStatus::Verified.as_str(),
            now,
            Some(user.user_id),
            None,
        )?;
        Ok(maintenance_requests::table.find(request_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::StatusChange,
            ResourceKind::Request,
            request_id,
        )
        .with_change(
            Some(json!({ "status": "completed" })),
            Some(json!({ "status": "verified" })),
        ),
    );
    drop(conn);

    notify_status_change(&state, &updated, user.user_id);
    let detail = build_detail(&state, updated).await?;
    Ok(Json(detail))
}

pub async fn reopen_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<Json<RequestDetailResponse>> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Reopen, &scope_of(&request, creator_user))?;

    let current = status_of(&request)?;
    if !matches!(current, RequestStatus::Completed | RequestStatus::Verified) {
        return Err(AppError::bad_request(
            "only completed or verified requests can be reopened",
        ));
    }

    let now = state.clock.now_naive();
    let updated = conn.transaction::<MaintenanceRequest, AppError, _>(|conn| {
        diesel::update(maintenance_requests::table.find(request_id))
            .set((
                maintenance_requests::status.eq(RequestStatus::Reopened.as_str()),
                maintenance_requests::resolved_at.eq(None::<chrono::NaiveDateTime>),
                maintenance_requests::verified_by.eq(None::<Uuid>),
                maintenance_requests::updated_at.eq(now),
            ))
            .execute(conn)?;
        history::append(
            conn,
            ResourceKind::Request,
            request_id,
            RequestStatus::Reopened.as_str(),
            now,
            Some(user.user_id),
            None,
        )?;
        Ok(maintenance_requests::table.find(request_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::StatusChange,
            ResourceKind::Request,
            request_id,
        )
        .with_change(
            Some(json!({ "status": current.as_str() })),
            Some(json!({ "status": "reopened" })),
        ),
    );
    drop(conn);

    notify_status_change(&state, &updated, user.user_id);
    let detail = build_detail(&state, updated).await?;
    Ok(Json(detail))
}

pub async fn archive_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<Json<RequestDetailResponse>> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Archive, &scope_of(&request, creator_user))?;

    let current = status_of(&request)?;
    if !matches!(
        current,
        RequestStatus::Completed | RequestStatus::Verified | RequestStatus::Reopened
    ) {
        return Err(AppError::bad_request(
            "only completed, verified, or reopened requests can be archived",
        ));
    }

    let now = state.clock.now_naive();
    let updated = conn.transaction::<MaintenanceRequest, AppError, _>(|conn| {
        diesel::update(maintenance_requests::table.find(request_id))
            .set((
                maintenance_requests::status.eq(RequestStatus::Archived.as_str()),
                maintenance_requests::updated_at.eq(now),
            ))
            .execute(conn)?;
        history::append(
            conn,
            ResourceKind::Request,
            request_id,
            RequestStatus::Archived.as_str(),
            now,
            Some(user.user_id),
            None,
        )?;
        Ok(maintenance_requests::table.find(request_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::StatusChange,
            ResourceKind::Request,
            request_id,
        )
        .with_change(
            Some(json!({ "status": current.as_str() })),
            Some(json!({ "status": "archived" })),
        ),
    );
    drop(conn);

    let detail = build_detail(&state, updated).await?;
    Ok(Json(detail))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<FeedbackPayload>,
) -> AppResult<Json<RequestDetailResponse>> {
    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::unprocessable("rating must be between 1 and 5"));
    }

    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);

    // Feedback belongs to the tenant who opened the request, nobody else.
    if creator_user != Some(user.user_id) {
        return Err(AppError::forbidden());
    }

    let current = status_of(&request)?;
    if !matches!(current, RequestStatus::Completed | RequestStatus::Verified) {
        return Err(AppError::bad_request(
            "feedback can only be submitted once work is completed",
        ));
    }

    if request.feedback_submitted_at.is_some() {
        return Err(AppError::conflict("feedback has already been submitted"));
    }

    let now = state.clock.now_naive();
    let updated: MaintenanceRequest = {
        diesel::update(maintenance_requests::table.find(request_id))
            .set((
                maintenance_requests::feedback_rating.eq(Some(payload.rating)),
                maintenance_requests::feedback_comment.eq(payload.comment.as_deref()),
                maintenance_requests::feedback_submitted_at.eq(Some(now)),
                maintenance_requests::feedback_submitted_by.eq(Some(user.user_id)),
                maintenance_requests::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        maintenance_requests::table.find(request_id).first(&mut conn)?
    };

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Feedback,
            ResourceKind::Request,
            request_id,
        )
        .with_metadata(json!({ "rating": payload.rating })),
    );
    drop(conn);

    notify::dispatch(
        &state,
        Fanout::new(
            NotificationKind::FeedbackSubmitted,
            format!(
                "Feedback received on \"{}\": {}/5",
                updated.title, payload.rating
            ),
            ResourceKind::Request,
            updated.id,
            updated.property_id,
        )
        .unit(updated.unit_id)
        .actor(user.user_id)
        .context(json!({ "title": updated.title, "rating": payload.rating })),
    );

    let detail = build_detail(&state, updated).await?;
    Ok(Json(detail))
}

pub async fn upload_request_media(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<MediaResponse>)> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Comment, &scope_of(&request, creator_user))?;
    drop(conn);

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut mime_type: Option<String> = None;
    let mut is_public = false;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(|n| n.to_string());
                mime_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("is_public") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid is_public: {err}")))?;
                is_public = value == "1" || value.eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let file_name = file_name.ok_or_else(|| AppError::bad_request("filename is required"))?;
    let mime_type = mime_type.unwrap_or_else(|| {
        mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string()
    });

    let upload = MediaUpload {
        bytes,
        file_name,
        mime_type,
        is_public,
        tags: Vec::new(),
    };
    let stored = media::store_upload(
        &state,
        upload,
        ResourceKind::Request,
        request_id,
        Some(user.user_id),
    )
    .await?;

    let mut conn = state.db()?;
    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::Media,
            stored.id,
        )
        .with_metadata(json!({ "request_id": request_id })),
    );
    drop(conn);

    let response = media::to_response(&state, stored).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn delete_request_media(
    State(state): State<AppState>,
    Path((request_id, media_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(&mut conn, &user, Action::Update, &scope_of(&request, creator_user))?;

    let row: Media = media_table::table
        .find(media_id)
        .filter(media_table::related_to.eq(ResourceKind::Request.as_str()))
        .filter(media_table::related_id.eq(request_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    diesel::delete(media_table::table.find(media_id)).execute(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::Media,
            media_id,
        )
        .with_metadata(json!({ "request_id": request_id })),
    );
    drop(conn);

    media::delete_bytes(&state, std::slice::from_ref(&row)).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn enable_public_link(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<EnablePublicLinkPayload>,
) -> AppResult<Json<PublicLinkResponse>> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(
        &mut conn,
        &user,
        Action::ManagePublicLink,
        &scope_of(&request, creator_user),
    )?;

    let days = payload.expires_in_days.unwrap_or(DEFAULT_PUBLIC_LINK_DAYS);
    if days <= 0 {
        return Err(AppError::bad_request("expires_in_days must be positive"));
    }

    // Token is sticky across disable/enable; rotation is opt-in.
    let token = match (&request.public_token, payload.rotate) {
        (Some(existing), false) => existing.clone(),
        _ => generate_public_token(),
    };
    let expires_at = state.clock.now_naive() + chrono::Duration::days(days);

    diesel::update(maintenance_requests::table.find(request_id))
        .set((
            maintenance_requests::public_token.eq(Some(token.clone())),
            maintenance_requests::public_link_enabled.eq(true),
            maintenance_requests::public_link_expires_at.eq(Some(expires_at)),
            maintenance_requests::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::PublicLinkEnabled,
            ResourceKind::Request,
            request_id,
        )
        .with_metadata(json!({ "expires_in_days": days, "rotated": payload.rotate })),
    );

    Ok(Json(PublicLinkResponse {
        url: state.config.public_request_url(&token),
        token,
        expires_at: fmt_ts(expires_at),
    }))
}

pub async fn disable_public_link(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let request = load_request(&mut conn, request_id)?;
    let creator_user = creator_user_id(&mut conn, &request);
    authz::authorize_work_item(
        &mut conn,
        &user,
        Action::ManagePublicLink,
        &scope_of(&request, creator_user),
    )?;

    diesel::update(maintenance_requests::table.find(request_id))
        .set((
            maintenance_requests::public_link_enabled.eq(false),
            maintenance_requests::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::PublicLinkDisabled,
            ResourceKind::Request,
            request_id,
        ),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Comments attached to a request, internal notes included only for callers
/// with management access. Used by the comments route module.
pub(crate) fn visible_comments(
    conn: &mut PgConnection,
    request: &MaintenanceRequest,
    include_internal: bool,
) -> AppResult<Vec<Comment>> {
    let mut query = comments::table
        .filter(comments::context_type.eq(ResourceKind::Request.as_str()))
        .filter(comments::context_id.eq(request.id))
        .filter(comments::is_active.eq(true))
        .into_boxed();
    if !include_internal {
        query = query.filter(comments::is_internal_note.eq(false));
    }
    Ok(query.order(comments::created_at.asc()).load(conn)?)
}
