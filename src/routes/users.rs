use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{password, AuthenticatedUser, RequestMeta};
use crate::authz;
use crate::enums::{AuditAction, GlobalRole, RegistrationStatus, ResourceKind};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::schema::{property_users, refresh_tokens, users};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateUserPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: GlobalRole,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct UserListQuery {
    pub role: Option<GlobalRole>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct UpdateUserPayload {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdatePreferencesPayload {
    pub preferences: Value,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub registration_status: String,
    pub notification_preferences: Value,
    pub is_active: bool,
    pub created_at: String,
}

fn to_response(user: &User) -> UserResponse {
    UserResponse {
        id: user.id,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        email: user.email.clone(),
        phone: user.phone.clone(),
        role: user.role.clone(),
        registration_status: user.registration_status.clone(),
        notification_preferences: user.notification_preferences.clone(),
        is_active: user.is_active,
        created_at: user.created_at.and_utc().to_rfc3339(),
    }
}

fn load_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<User> {
    let user: User = users::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    Ok(user)
}

/// Managers can administer accounts that share a property with them; only
/// admins reach beyond that.
fn can_administer(conn: &mut PgConnection, actor: &AuthenticatedUser, target_id: Uuid) -> bool {
    if actor.is_admin() || actor.user_id == target_id {
        return true;
    }
    let managed: Vec<Uuid> = match authz::associated_property_ids(conn, actor.user_id) {
        Ok(ids) => ids
            .into_iter()
            .filter(|property_id| authz::has_management_access(conn, actor, *property_id))
            .collect(),
        Err(_) => return false,
    };
    if managed.is_empty() {
        return false;
    }
    matches!(
        property_users::table
            .filter(property_users::user_id.eq(target_id))
            .filter(property_users::property_id.eq_any(&managed))
            .filter(property_users::is_active.eq(true))
            .count()
            .get_result::<i64>(conn),
        Ok(count) if count > 0
    )
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<CreateUserPayload>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let can_create = user.is_admin()
        || (matches!(user.role, GlobalRole::Landlord | GlobalRole::PropertyManager)
            && matches!(payload.role, GlobalRole::Tenant | GlobalRole::Vendor));
    if !can_create {
        return Err(AppError::forbidden());
    }

    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if payload.first_name.trim().is_empty() {
        return Err(AppError::bad_request("first_name must not be empty"));
    }

    let (password_hash, registration_status) = match payload.password.as_deref() {
        Some(plain) if !plain.is_empty() => (
            password::hash_password(plain).map_err(AppError::internal)?,
            RegistrationStatus::Active,
        ),
        // Invited accounts set their password on first login.
        _ => (
            password::hash_password(&password::random_password()).map_err(AppError::internal)?,
            RegistrationStatus::PendingPasswordSet,
        ),
    };

    let mut conn = state.db()?;
    let row = NewUser {
        id: Uuid::new_v4(),
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        email,
        phone: payload.phone.clone(),
        password_hash,
        role: payload.role.as_str().to_string(),
        registration_status: registration_status.as_str().to_string(),
        notification_preferences: json!({}),
    };
    diesel::insert_into(users::table).values(&row).execute(&mut conn)?;
    let created: User = users::table.find(row.id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::User,
            created.id,
        )
        .with_change(None, Some(json!({ "email": created.email, "role": created.role }))),
    );

    Ok((StatusCode::CREATED, Json(to_response(&created))))
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<UserListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    let mut conn = state.db()?;

    let mut query = users::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(users::is_active.eq(true));
    }
    if let Some(role) = params.role {
        query = query.filter(users::role.eq(role.as_str()));
    }

    if !user.is_admin() {
        // Managers only see accounts attached to properties they manage.
        let managed: Vec<Uuid> = authz::associated_property_ids(&mut conn, user.user_id)?
            .into_iter()
            .filter(|property_id| authz::has_management_access(&mut conn, &user, *property_id))
            .collect();
        if managed.is_empty() {
            return Err(AppError::forbidden());
        }
        let visible_ids: Vec<Uuid> = property_users::table
            .filter(property_users::property_id.eq_any(&managed))
            .filter(property_users::is_active.eq(true))
            .select(property_users::user_id)
            .distinct()
            .load(&mut conn)?;
        query = query.filter(users::id.eq_any(visible_ids));
    }

    let rows: Vec<User> = query.order(users::created_at.asc()).load(&mut conn)?;
    Ok(Json(rows.iter().map(to_response).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let target = load_user(&mut conn, user_id)?;
    if !target.is_active && !user.is_admin() {
        return Err(AppError::not_found());
    }
    if !can_administer(&mut conn, &user, user_id) {
        return Err(AppError::forbidden());
    }
    Ok(Json(to_response(&target)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdateUserPayload>,
) -> AppResult<Json<UserResponse>> {
    if user.user_id != user_id && !user.is_admin() {
        return Err(AppError::forbidden());
    }

    let mut conn = state.db()?;
    let target = load_user(&mut conn, user_id)?;

    let now = state.clock.now_naive();
    if let Some(first_name) = payload.first_name.as_deref().map(str::trim) {
        if first_name.is_empty() {
            return Err(AppError::bad_request("first_name must not be empty"));
        }
        diesel::update(users::table.find(user_id))
            .set(users::first_name.eq(first_name))
            .execute(&mut conn)?;
    }
    if let Some(last_name) = payload.last_name.as_deref().map(str::trim) {
        diesel::update(users::table.find(user_id))
            .set(users::last_name.eq(last_name))
            .execute(&mut conn)?;
    }
    if let Some(phone) = payload.phone.as_deref() {
        diesel::update(users::table.find(user_id))
            .set(users::phone.eq(Some(phone.trim())))
            .execute(&mut conn)?;
    }
    diesel::update(users::table.find(user_id))
        .set(users::updated_at.eq(now))
        .execute(&mut conn)?;

    let updated: User = users::table.find(user_id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::User,
            user_id,
        )
        .with_change(
            Some(json!({ "first_name": target.first_name, "last_name": target.last_name })),
            Some(json!({ "first_name": updated.first_name, "last_name": updated.last_name })),
        ),
    );

    Ok(Json(to_response(&updated)))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdatePreferencesPayload>,
) -> AppResult<Json<UserResponse>> {
    if user.user_id != user_id && !user.is_admin() {
        return Err(AppError::forbidden());
    }
    if !payload.preferences.is_object() {
        return Err(AppError::unprocessable(
            "preferences must be an object mapping notification types to booleans",
        ));
    }
    if let Some(map) = payload.preferences.as_object() {
        if map.values().any(|value| !value.is_boolean()) {
            return Err(AppError::unprocessable(
                "preference values must be booleans",
            ));
        }
    }

    let mut conn = state.db()?;
    load_user(&mut conn, user_id)?;

    diesel::update(users::table.find(user_id))
        .set((
            users::notification_preferences.eq(payload.preferences.clone()),
            users::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)?;

    let updated: User = users::table.find(user_id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::User,
            user_id,
        )
        .with_metadata(json!({ "preferences": true })),
    );

    Ok(Json(to_response(&updated)))
}

/// Accounts are never hard-deleted; deactivation retires the login, the
/// associations, and any outstanding refresh tokens in one pass.
pub async fn deactivate_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(AppError::forbidden());
    }

    let mut conn = state.db()?;
    let target = load_user(&mut conn, user_id)?;
    if !target.is_active {
        return Err(AppError::conflict("user is already deactivated"));
    }

    let now = state.clock.now_naive();
    conn.transaction::<(), AppError, _>(|conn| {
        diesel::update(users::table.find(user_id))
            .set((
                users::is_active.eq(false),
                users::registration_status.eq(RegistrationStatus::Deactivated.as_str()),
                users::updated_at.eq(now),
            ))
            .execute(conn)?;

        diesel::update(
            property_users::table
                .filter(property_users::user_id.eq(user_id))
                .filter(property_users::is_active.eq(true)),
        )
        .set((
            property_users::is_active.eq(false),
            property_users::end_date.eq(Some(now)),
            property_users::updated_at.eq(now),
        ))
        .execute(conn)?;

        diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(conn)?;
        Ok(())
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::User,
            user_id,
        )
        .with_change(
            Some(json!({ "is_active": true })),
            Some(json!({ "is_active": false })),
        ),
    );

    Ok(StatusCode::NO_CONTENT)
}
