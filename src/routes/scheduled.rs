use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::NaiveDateTime;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{AuthenticatedUser, RequestMeta};
use crate::authz::{self, Action, WorkItemScope};
use crate::enums::{
    AuditAction, GlobalRole, Priority, PropertyRole, RequestCategory, ResourceKind,
    ScheduledStatus,
};
use crate::error::{AppError, AppResult};
use crate::history;
use crate::models::{NewPropertyUser, NewScheduledTask, PropertyUser, ScheduledTask};
use crate::recurrence::Frequency;
use crate::routes::requests::{PublicLinkResponse, StatusHistoryResponse, DEFAULT_PUBLIC_LINK_DAYS};
use crate::schema::{
    comments, generated_requests, notifications, property_users, scheduled_tasks, units,
};
use crate::state::AppState;
use crate::utils::generate_public_token;

#[derive(Deserialize)]
pub struct CreateScheduledPayload {
    pub title: String,
    pub description: String,
    pub category: RequestCategory,
    pub priority: Priority,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub scheduled_date: NaiveDateTime,
    #[serde(default)]
    pub recurring: bool,
    pub frequency: Option<Frequency>,
}

#[derive(Deserialize)]
pub struct ScheduledListQuery {
    pub property_id: Option<Uuid>,
    pub status: Option<ScheduledStatus>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct UpdateScheduledPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<RequestCategory>,
    pub priority: Option<Priority>,
    pub scheduled_date: Option<NaiveDateTime>,
    pub recurring: Option<bool>,
    pub frequency: Option<Frequency>,
}

#[derive(Deserialize)]
pub struct ScheduledStatusPayload {
    pub status: ScheduledStatus,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct EnableScheduleLinkPayload {
    pub expires_in_days: Option<i64>,
    #[serde(default)]
    pub rotate: bool,
}

#[derive(Serialize)]
pub struct ScheduledResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub scheduled_date: String,
    pub recurring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    pub occurrences_spawned: i32,
    pub next_due_date: Option<String>,
    pub last_executed_at: Option<String>,
    pub last_generated_request: Option<Uuid>,
    pub public_link_enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct ScheduledDetailResponse {
    #[serde(flatten)]
    pub task: ScheduledResponse,
    pub status_history: Vec<StatusHistoryResponse>,
    pub generated_requests: Vec<Uuid>,
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339()
}

pub(crate) fn to_response(task: &ScheduledTask) -> ScheduledResponse {
    ScheduledResponse {
        id: task.id,
        title: task.title.clone(),
        description: task.description.clone(),
        category: task.category.clone(),
        priority: task.priority.clone(),
        status: task.status.clone(),
        property_id: task.property_id,
        unit_id: task.unit_id,
        scheduled_date: fmt_ts(task.scheduled_date),
        recurring: task.recurring,
        frequency: task.parsed_frequency(),
        occurrences_spawned: task.occurrences_spawned,
        next_due_date: task.next_due_date.map(fmt_ts),
        last_executed_at: task.last_executed_at.map(fmt_ts),
        last_generated_request: task.last_generated_request,
        public_link_enabled: task.public_link_enabled,
        created_at: fmt_ts(task.created_at),
        updated_at: fmt_ts(task.updated_at),
    }
}

pub(crate) fn load_task(conn: &mut PgConnection, task_id: Uuid) -> AppResult<ScheduledTask> {
    let task: ScheduledTask = scheduled_tasks::table
        .find(task_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !task.is_active {
        return Err(AppError::not_found());
    }
    Ok(task)
}

pub(crate) fn creator_user_id(conn: &mut PgConnection, task: &ScheduledTask) -> Option<Uuid> {
    property_users::table
        .find(task.created_by_property_user)
        .select(property_users::user_id)
        .first(conn)
        .optional()
        .ok()
        .flatten()
}

pub(crate) fn scope_of(task: &ScheduledTask, creator_user: Option<Uuid>) -> WorkItemScope {
    let assignee_user = match task.assigned_to_model.as_deref() {
        Some("User") => task.assigned_to_id,
        _ => None,
    };
    WorkItemScope {
        property_id: task.property_id,
        unit_id: task.unit_id,
        creator_user_id: creator_user,
        assignee_user_id: assignee_user,
    }
}

fn build_detail(conn: &mut PgConnection, task: ScheduledTask) -> AppResult<ScheduledDetailResponse> {
    let entries = history::for_context(conn, ResourceKind::ScheduledMaintenance, task.id)?;
    let spawned: Vec<Uuid> = generated_requests::table
        .filter(generated_requests::scheduled_task_id.eq(task.id))
        .order(generated_requests::created_at.asc())
        .select(generated_requests::request_id)
        .load(conn)?;

    Ok(ScheduledDetailResponse {
        task: to_response(&task),
        status_history: entries
            .into_iter()
            .map(|entry| StatusHistoryResponse {
                status: entry.status,
                changed_at: fmt_ts(entry.changed_at),
                changed_by: entry.changed_by,
                notes: entry.notes,
            })
            .collect(),
        generated_requests: spawned,
    })
}

fn creator_association(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    property_id: Uuid,
) -> AppResult<PropertyUser> {
    let associations = authz::load_active_associations(conn, user.user_id, property_id)?;
    if let Some(managing) = associations.iter().find(|pu| pu.has_management_role()) {
        return Ok(managing.clone());
    }
    if let Some(any) = associations.into_iter().next() {
        return Ok(any);
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

pub async fn create_scheduled(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<CreateScheduledPayload>,
) -> AppResult<(StatusCode, Json<ScheduledDetailResponse>)> {
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }

    let mut conn = state.db()?;
    authz::ensure_management(&mut conn, &user, payload.property_id)?;

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

    // Recurring tasks without an explicit rule default to monthly; one-shot
    // tasks never carry a rule.
    let frequency = if payload.recurring {
        Some(payload.frequency.unwrap_or_else(Frequency::monthly))
    } else {
        None
    };

    let creator = creator_association(&mut conn, &user, payload.property_id)?;
    let now = state.clock.now_naive();
    let task_id = Uuid::new_v4();

    let task = conn.transaction::<ScheduledTask, AppError, _>(|conn| {
        let row = NewScheduledTask {
            id: task_id,
            title: title.clone(),
            description: payload.description.trim().to_string(),
            category: payload.category.as_str().to_string(),
            priority: payload.priority.as_str().to_string(),
            status: ScheduledStatus::Scheduled.as_str().to_string(),
            property_id: payload.property_id,
            unit_id: payload.unit_id,
            created_by_property_user: creator.id,
            scheduled_date: payload.scheduled_date,
            recurring: payload.recurring,
            frequency: frequency
                .as_ref()
                .map(|f| serde_json::to_value(f))
                .transpose()
                .map_err(AppError::internal)?,
            next_due_date: Some(payload.scheduled_date),
            next_execution_attempt: Some(payload.scheduled_date),
        };
        diesel::insert_into(scheduled_tasks::table)
            .values(&row)
            .execute(conn)?;

        history::append(
            conn,
            ResourceKind::ScheduledMaintenance,
            task_id,
            ScheduledStatus::Scheduled.as_str(),
            now,
            Some(user.user_id),
            Some("Task created"),
        )?;

        Ok(scheduled_tasks::table.find(task_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::ScheduledMaintenance,
            task.id,
        )
        .with_change(None, Some(json!({ "title": task.title, "status": task.status }))),
    );

    let detail = build_detail(&mut conn, task)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn list_scheduled(
    State(state): State<AppState>,
    Query(params): Query<ScheduledListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ScheduledResponse>>> {
    let mut conn = state.db()?;

    let mut query = scheduled_tasks::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(scheduled_tasks::is_active.eq(true));
    }
    if let Some(property_id) = params.property_id {
        query = query.filter(scheduled_tasks::property_id.eq(property_id));
    }
    if let Some(status) = params.status {
        query = query.filter(scheduled_tasks::status.eq(status.as_str()));
    }
    if !user.is_admin() {
        let property_ids = authz::associated_property_ids(&mut conn, user.user_id)?;
        query = query.filter(scheduled_tasks::property_id.eq_any(property_ids));
    }

    let rows: Vec<ScheduledTask> = query
        .order(scheduled_tasks::created_at.desc())
        .load(&mut conn)?;

    let mut visible = Vec::with_capacity(rows.len());
    for task in rows {
        let creator_user = creator_user_id(&mut conn, &task);
        let scope = scope_of(&task, creator_user);
        if authz::authorize_work_item(&mut conn, &user, Action::Read, &scope).is_ok() {
            visible.push(to_response(&task));
        }
    }

    Ok(Json(visible))
}

pub async fn get_scheduled(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<ScheduledDetailResponse>> {
    let mut conn = state.db()?;
    let task = load_task(&mut conn, task_id)?;
    let creator_user = creator_user_id(&mut conn, &task);
    authz::authorize_work_item(&mut conn, &user, Action::Read, &scope_of(&task, creator_user))?;

    let detail = build_detail(&mut conn, task)?;
    Ok(Json(detail))
}

pub async fn update_scheduled(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdateScheduledPayload>,
) -> AppResult<Json<ScheduledDetailResponse>> {
    let mut conn = state.db()?;
    let task = load_task(&mut conn, task_id)?;
    authz::ensure_management(&mut conn, &user, task.property_id)?;

    let old_snapshot = json!({
        "title": task.title,
        "scheduled_date": fmt_ts(task.scheduled_date),
        "recurring": task.recurring,
    });

    let recurring = payload.recurring.unwrap_or(task.recurring);
    let frequency_value = if recurring {
        match (&payload.frequency, &task.frequency) {
            (Some(new_rule), _) => Some(serde_json::to_value(new_rule).map_err(AppError::internal)?),
            (None, Some(existing)) => Some(existing.clone()),
            (None, None) => {
                Some(serde_json::to_value(Frequency::monthly()).map_err(AppError::internal)?)
            }
        }
    } else {
        None
    };

    let now = state.clock.now_naive();
    let updated = conn.transaction::<ScheduledTask, AppError, _>(|conn| {
        if let Some(title) = payload.title.as_deref().map(str::trim) {
            if title.is_empty() {
                return Err(AppError::bad_request("title must not be empty"));
            }
            diesel::update(scheduled_tasks::table.find(task_id))
                .set(scheduled_tasks::title.eq(title))
                .execute(conn)?;
        }
        if let Some(description) = payload.description.as_deref() {
            diesel::update(scheduled_tasks::table.find(task_id))
                .set(scheduled_tasks::description.eq(description.trim()))
                .execute(conn)?;
        }
        if let Some(category) = payload.category {
            diesel::update(scheduled_tasks::table.find(task_id))
                .set(scheduled_tasks::category.eq(category.as_str()))
                .execute(conn)?;
        }
        if let Some(priority) = payload.priority {
            diesel::update(scheduled_tasks::table.find(task_id))
                .set(scheduled_tasks::priority.eq(priority.as_str()))
                .execute(conn)?;
        }
        if let Some(scheduled_date) = payload.scheduled_date {
            // Moving the anchor re-arms the schedule from the new date.
            diesel::update(scheduled_tasks::table.find(task_id))
                .set((
                    scheduled_tasks::scheduled_date.eq(scheduled_date),
                    scheduled_tasks::next_due_date.eq(Some(scheduled_date)),
                    scheduled_tasks::next_execution_attempt.eq(Some(scheduled_date)),
                ))
                .execute(conn)?;
        }
        diesel::update(scheduled_tasks::table.find(task_id))
            .set((
                scheduled_tasks::recurring.eq(recurring),
                scheduled_tasks::frequency.eq(frequency_value.clone()),
                scheduled_tasks::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(scheduled_tasks::table.find(task_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::ScheduledMaintenance,
            task_id,
        )
        .with_change(
            Some(old_snapshot),
            Some(json!({
                "title": updated.title,
                "scheduled_date": fmt_ts(updated.scheduled_date),
                "recurring": updated.recurring,
            })),
        ),
    );

    let detail = build_detail(&mut conn, updated)?;
    Ok(Json(detail))
}

pub async fn update_scheduled_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<ScheduledStatusPayload>,
) -> AppResult<Json<ScheduledDetailResponse>> {
    if !matches!(
        payload.status,
        ScheduledStatus::Scheduled
            | ScheduledStatus::Active
            | ScheduledStatus::Paused
            | ScheduledStatus::Cancelled
    ) {
        return Err(AppError::bad_request(
            "in_progress and completed are set by the maintenance driver",
        ));
    }

    let mut conn = state.db()?;
    let task = load_task(&mut conn, task_id)?;
    authz::ensure_management(&mut conn, &user, task.property_id)?;

    let current = ScheduledStatus::parse(&task.status)
        .ok_or_else(|| AppError::internal("corrupt schedule status"))?;
    if matches!(current, ScheduledStatus::Completed | ScheduledStatus::Cancelled) {
        return Err(AppError::bad_request("schedule is already closed"));
    }

    let now = state.clock.now_naive();
    let updated = conn.transaction::<ScheduledTask, AppError, _>(|conn| {
        diesel::update(scheduled_tasks::table.find(task_id))
            .set((
                scheduled_tasks::status.eq(payload.status.as_str()),
                scheduled_tasks::updated_at.eq(now),
            ))
            .execute(conn)?;
        history::append(
            conn,
            ResourceKind::ScheduledMaintenance,
            task_id,
            payload.status.as_str(),
            now,
            Some(user.user_id),
            payload.notes.as_deref(),
        )?;
        Ok(scheduled_tasks::table.find(task_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::StatusChange,
            ResourceKind::ScheduledMaintenance,
            task_id,
        )
        .with_change(
            Some(json!({ "status": current.as_str() })),
            Some(json!({ "status": updated.status })),
        ),
    );

    let detail = build_detail(&mut conn, updated)?;
    Ok(Json(detail))
}

pub async fn delete_scheduled(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let task = load_task(&mut conn, task_id)?;
    authz::ensure_management(&mut conn, &user, task.property_id)?;

    conn.transaction::<(), AppError, _>(|conn| {
        diesel::delete(
            comments::table
                .filter(comments::context_type.eq(ResourceKind::ScheduledMaintenance.as_str()))
                .filter(comments::context_id.eq(task_id)),
        )
        .execute(conn)?;

        diesel::delete(
            notifications::table
                .filter(
                    notifications::related_resource_type
                        .eq(ResourceKind::ScheduledMaintenance.as_str()),
                )
                .filter(notifications::related_resource_id.eq(task_id)),
        )
        .execute(conn)?;

        history::delete_for_context(conn, ResourceKind::ScheduledMaintenance, task_id)?;

        diesel::delete(
            generated_requests::table.filter(generated_requests::scheduled_task_id.eq(task_id)),
        )
        .execute(conn)?;

        diesel::delete(scheduled_tasks::table.find(task_id)).execute(conn)?;
        Ok(())
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::ScheduledMaintenance,
            task_id,
        )
        .with_change(Some(json!({ "title": task.title })), None),
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn enable_public_link(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<EnableScheduleLinkPayload>,
) -> AppResult<Json<PublicLinkResponse>> {
    let mut conn = state.db()?;
    let task = load_task(&mut conn, task_id)?;
    authz::ensure_management(&mut conn, &user, task.property_id)?;

    let days = payload.expires_in_days.unwrap_or(DEFAULT_PUBLIC_LINK_DAYS);
    if days <= 0 {
        return Err(AppError::bad_request("expires_in_days must be positive"));
    }

    let token = match (&task.public_link_token, payload.rotate) {
        (Some(existing), false) => existing.clone(),
        _ => generate_public_token(),
    };
    let expires_at = state.clock.now_naive() + chrono::Duration::days(days);

    diesel::update(scheduled_tasks::table.find(task_id))
        .set((
            scheduled_tasks::public_link_token.eq(Some(token.clone())),
            scheduled_tasks::public_link_enabled.eq(true),
            scheduled_tasks::public_link_expires.eq(Some(expires_at)),
            scheduled_tasks::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::PublicLinkEnabled,
            ResourceKind::ScheduledMaintenance,
            task_id,
        )
        .with_metadata(json!({ "expires_in_days": days, "rotated": payload.rotate })),
    );

    Ok(Json(PublicLinkResponse {
        url: state.config.public_schedule_url(&token),
        token,
        expires_at: fmt_ts(expires_at),
    }))
}

pub async fn disable_public_link(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let task = load_task(&mut conn, task_id)?;
    authz::ensure_management(&mut conn, &user, task.property_id)?;

    diesel::update(scheduled_tasks::table.find(task_id))
        .set((
            scheduled_tasks::public_link_enabled.eq(false),
            scheduled_tasks::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::PublicLinkDisabled,
            ResourceKind::ScheduledMaintenance,
            task_id,
        ),
    );

    Ok(StatusCode::NO_CONTENT)
}
