use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use diesel::dsl::exists;
use diesel::{prelude::*, select, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{AuthenticatedUser, RequestMeta};
use crate::authz;
use crate::enums::{AuditAction, GlobalRole, NotificationKind, PropertyRole, ResourceKind, UnitStatus};
use crate::error::{AppError, AppResult};
use crate::models::{NewProperty, NewPropertyUser, NewUnitTenant, Property, PropertyUser, User};
use crate::notify::{self, Fanout};
use crate::schema::{
    maintenance_requests, properties, property_users, unit_tenants, units, users,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreatePropertyPayload {
    pub name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Deserialize)]
pub struct UpdatePropertyPayload {
    pub name: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Deserialize)]
pub struct PropertyListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct AddPropertyUserPayload {
    pub user_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub roles: Vec<PropertyRole>,
    pub start_date: Option<chrono::NaiveDateTime>,
}

#[derive(Deserialize)]
pub struct UpdatePropertyUserPayload {
    pub roles: Option<Vec<PropertyRole>>,
    pub is_active: Option<bool>,
}

#[derive(Serialize)]
pub struct PropertyResponse {
    pub id: Uuid,
    pub name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct PropertyUserResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub is_active: bool,
    pub start_date: String,
    pub end_date: Option<String>,
    pub lease_id: Option<Uuid>,
}

fn fmt_ts(ts: chrono::NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339()
}

fn to_response(property: &Property) -> PropertyResponse {
    PropertyResponse {
        id: property.id,
        name: property.name.clone(),
        street: property.street.clone(),
        city: property.city.clone(),
        state: property.state.clone(),
        zip_code: property.zip_code.clone(),
        country: property.country.clone(),
        is_active: property.is_active,
        created_at: fmt_ts(property.created_at),
        updated_at: fmt_ts(property.updated_at),
    }
}

pub(crate) fn to_property_user_response(row: &PropertyUser) -> PropertyUserResponse {
    PropertyUserResponse {
        id: row.id,
        user_id: row.user_id,
        property_id: row.property_id,
        unit_id: row.unit_id,
        roles: row.roles.clone(),
        is_active: row.is_active,
        start_date: fmt_ts(row.start_date),
        end_date: row.end_date.map(fmt_ts),
        lease_id: row.lease_id,
    }
}

pub(crate) fn load_property(conn: &mut PgConnection, property_id: Uuid) -> AppResult<Property> {
    let property: Property = properties::table
        .find(property_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !property.is_active {
        return Err(AppError::not_found());
    }
    Ok(property)
}

pub async fn create_property(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<CreatePropertyPayload>,
) -> AppResult<(StatusCode, Json<PropertyResponse>)> {
    if !matches!(
        user.role,
        GlobalRole::Admin | GlobalRole::Landlord | GlobalRole::PropertyManager
    ) {
        return Err(AppError::forbidden());
    }
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let creator_role = match user.role {
        GlobalRole::Landlord => PropertyRole::Landlord,
        GlobalRole::PropertyManager => PropertyRole::PropertyManager,
        _ => PropertyRole::AdminAccess,
    };

    let mut conn = state.db()?;
    let property_id = Uuid::new_v4();
    let now = state.clock.now_naive();

    let property = conn.transaction::<Property, AppError, _>(|conn| {
        let row = NewProperty {
            id: property_id,
            name: payload.name.trim().to_string(),
            street: payload.street.trim().to_string(),
            city: payload.city.trim().to_string(),
            state: payload.state.trim().to_string(),
            zip_code: payload.zip_code.trim().to_string(),
            country: payload.country.trim().to_string(),
        };
        diesel::insert_into(properties::table)
            .values(&row)
            .execute(conn)?;

        let association = NewPropertyUser {
            id: Uuid::new_v4(),
            user_id: user.user_id,
            property_id,
            unit_id: None,
            roles: vec![creator_role.as_str().to_string()],
            start_date: now,
            lease_id: None,
        };
        diesel::insert_into(property_users::table)
            .values(&association)
            .execute(conn)?;

        Ok(properties::table.find(property_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::Property,
            property.id,
        )
        .with_change(None, Some(json!({ "name": property.name }))),
    );

    Ok((StatusCode::CREATED, Json(to_response(&property))))
}

pub async fn list_properties(
    State(state): State<AppState>,
    Query(params): Query<PropertyListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<PropertyResponse>>> {
    let mut conn = state.db()?;

    let mut query = properties::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(properties::is_active.eq(true));
    }
    if !user.is_admin() {
        let property_ids = authz::associated_property_ids(&mut conn, user.user_id)?;
        query = query.filter(properties::id.eq_any(property_ids));
    }

    let rows: Vec<Property> = query.order(properties::name.asc()).load(&mut conn)?;
    Ok(Json(rows.iter().map(to_response).collect()))
}

pub async fn get_property(
    State(state): State<AppState>,
    Path(property_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<PropertyResponse>> {
    let mut conn = state.db()?;
    let property = load_property(&mut conn, property_id)?;

    if !user.is_admin() {
        let associations = authz::load_active_associations(&mut conn, user.user_id, property_id)
            .map_err(|_| AppError::forbidden())?;
        if associations.is_empty() {
            return Err(AppError::forbidden());
        }
    }

    Ok(Json(to_response(&property)))
}

pub async fn update_property(
    State(state): State<AppState>,
    Path(property_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdatePropertyPayload>,
) -> AppResult<Json<PropertyResponse>> {
    let mut conn = state.db()?;
    let property = load_property(&mut conn, property_id)?;
    authz::ensure_management(&mut conn, &user, property_id)?;

    let old_snapshot = json!({ "name": property.name, "street": property.street });

    macro_rules! apply {
        ($field:ident, $column:expr) => {
            if let Some(value) = payload.$field.as_deref().map(str::trim) {
                if value.is_empty() {
                    return Err(AppError::bad_request(concat!(
                        stringify!($field),
                        " must not be empty"
                    )));
                }
                diesel::update(properties::table.find(property_id))
                    .set($column.eq(value))
                    .execute(&mut conn)?;
            }
        };
    }

    apply!(name, properties::name);
    apply!(street, properties::street);
    apply!(city, properties::city);
    apply!(state, properties::state);
    apply!(zip_code, properties::zip_code);
    apply!(country, properties::country);

    diesel::update(properties::table.find(property_id))
        .set(properties::updated_at.eq(state.clock.now_naive()))
        .execute(&mut conn)?;

    let updated: Property = properties::table.find(property_id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::Property,
            property_id,
        )
        .with_change(
            Some(old_snapshot),
            Some(json!({ "name": updated.name, "street": updated.street })),
        ),
    );

    Ok(Json(to_response(&updated)))
}

pub async fn delete_property(
    State(state): State<AppState>,
    Path(property_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let property = load_property(&mut conn, property_id)?;
    authz::ensure_management(&mut conn, &user, property_id)?;

    let now = state.clock.now_naive();
    conn.transaction::<(), AppError, _>(|conn| {
        diesel::update(properties::table.find(property_id))
            .set((
                properties::is_active.eq(false),
                properties::updated_at.eq(now),
            ))
            .execute(conn)?;

        diesel::update(units::table.filter(units::property_id.eq(property_id)))
            .set((units::is_active.eq(false), units::updated_at.eq(now)))
            .execute(conn)?;

        diesel::update(property_users::table.filter(property_users::property_id.eq(property_id)))
            .set((
                property_users::is_active.eq(false),
                property_users::end_date.eq(Some(now)),
                property_users::updated_at.eq(now),
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
            ResourceKind::Property,
            property_id,
        )
        .with_change(Some(json!({ "name": property.name })), None),
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_property_users(
    State(state): State<AppState>,
    Path(property_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<PropertyUserResponse>>> {
    let mut conn = state.db()?;
    load_property(&mut conn, property_id)?;
    authz::ensure_management(&mut conn, &user, property_id)?;

    let rows: Vec<PropertyUser> = property_users::table
        .filter(property_users::property_id.eq(property_id))
        .filter(property_users::is_active.eq(true))
        .order(property_users::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(rows.iter().map(to_property_user_response).collect()))
}

pub async fn add_property_user(
    State(state): State<AppState>,
    Path(property_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<AddPropertyUserPayload>,
) -> AppResult<(StatusCode, Json<PropertyUserResponse>)> {
    if payload.roles.is_empty() {
        return Err(AppError::bad_request("roles must not be empty"));
    }

    let mut conn = state.db()?;
    load_property(&mut conn, property_id)?;
    authz::ensure_management(&mut conn, &user, property_id)?;

    let target: Option<User> = users::table
        .find(payload.user_id)
        .filter(users::is_active.eq(true))
        .first(&mut conn)
        .optional()?;
    let target = target.ok_or_else(|| AppError::bad_request("user does not exist"))?;

    if let Some(unit_id) = payload.unit_id {
        let belongs: bool = select(exists(
            units::table
                .find(unit_id)
                .filter(units::property_id.eq(property_id))
                .filter(units::is_active.eq(true)),
        ))
        .get_result(&mut conn)?;
        if !belongs {
            return Err(AppError::bad_request(
                "unit does not belong to the given property",
            ));
        }
    }

    let now = state.clock.now_naive();
    let is_tenant_assignment =
        payload.roles.contains(&PropertyRole::Tenant) && payload.unit_id.is_some();

    let row = NewPropertyUser {
        id: Uuid::new_v4(),
        user_id: payload.user_id,
        property_id,
        unit_id: payload.unit_id,
        roles: payload.roles.iter().map(|r| r.as_str().to_string()).collect(),
        start_date: payload.start_date.unwrap_or(now),
        lease_id: None,
    };

    let created = conn.transaction::<PropertyUser, AppError, _>(|conn| {
        // The unique (user, property, unit) index turns the duplicate insert
        // race into a clean conflict.
        diesel::insert_into(property_users::table)
            .values(&row)
            .execute(conn)?;

        if is_tenant_assignment {
            let unit_id = payload.unit_id.expect("tenant assignment has a unit");
            diesel::insert_into(unit_tenants::table)
                .values(&NewUnitTenant {
                    unit_id,
                    user_id: payload.user_id,
                    assigned_by: Some(user.user_id),
                })
                .on_conflict_do_nothing()
                .execute(conn)?;

            diesel::update(units::table.find(unit_id))
                .set((
                    units::status.eq(UnitStatus::Occupied.as_str()),
                    units::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        Ok(property_users::table.find(row.id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::PropertyUser,
            created.id,
        )
        .with_metadata(json!({
            "user_id": payload.user_id,
            "unit_id": payload.unit_id,
            "roles": created.roles,
        })),
    );
    drop(conn);

    if is_tenant_assignment {
        notify::dispatch(
            &state,
            Fanout::new(
                NotificationKind::UnitAssigned,
                format!("{} was assigned to a unit", target.display_name()),
                ResourceKind::PropertyUser,
                created.id,
                property_id,
            )
            .unit(payload.unit_id)
            .actor(user.user_id),
        );
    }

    Ok((StatusCode::CREATED, Json(to_property_user_response(&created))))
}

pub async fn update_property_user(
    State(state): State<AppState>,
    Path((property_id, association_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdatePropertyUserPayload>,
) -> AppResult<Json<PropertyUserResponse>> {
    let mut conn = state.db()?;
    load_property(&mut conn, property_id)?;
    authz::ensure_management(&mut conn, &user, property_id)?;

    let existing: PropertyUser = property_users::table
        .find(association_id)
        .filter(property_users::property_id.eq(property_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let now = state.clock.now_naive();
    if let Some(roles) = &payload.roles {
        if roles.is_empty() {
            return Err(AppError::bad_request("roles must not be empty"));
        }
        let role_strings: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();
        diesel::update(property_users::table.find(association_id))
            .set(property_users::roles.eq(role_strings))
            .execute(&mut conn)?;
    }
    if let Some(is_active) = payload.is_active {
        diesel::update(property_users::table.find(association_id))
            .set((
                property_users::is_active.eq(is_active),
                property_users::end_date.eq(if is_active { None } else { Some(now) }),
            ))
            .execute(&mut conn)?;
    }
    diesel::update(property_users::table.find(association_id))
        .set(property_users::updated_at.eq(now))
        .execute(&mut conn)?;

    let updated: PropertyUser = property_users::table.find(association_id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::PropertyUser,
            association_id,
        )
        .with_change(
            Some(json!({ "roles": existing.roles, "is_active": existing.is_active })),
            Some(json!({ "roles": updated.roles, "is_active": updated.is_active })),
        ),
    );

    Ok(Json(to_property_user_response(&updated)))
}

/// Deactivation is preferred over deletion once anything references the
/// association; a hard delete only happens for rows no request or lease ever
/// pointed at.
pub async fn remove_property_user(
    State(state): State<AppState>,
    Path((property_id, association_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    load_property(&mut conn, property_id)?;
    authz::ensure_management(&mut conn, &user, property_id)?;

    let existing: PropertyUser = property_users::table
        .find(association_id)
        .filter(property_users::property_id.eq(property_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let referenced: bool = select(exists(
        maintenance_requests::table.filter(
            maintenance_requests::created_by_property_user
                .eq(association_id)
                .or(maintenance_requests::assigned_by_property_user.eq(Some(association_id))),
        ),
    ))
    .get_result(&mut conn)?;
    let referenced = referenced || existing.lease_id.is_some();

    let now = state.clock.now_naive();
    let was_tenant = existing.has_role(PropertyRole::Tenant);

    conn.transaction::<(), AppError, _>(|conn| {
        if referenced {
            diesel::update(property_users::table.find(association_id))
                .set((
                    property_users::is_active.eq(false),
                    property_users::end_date.eq(Some(now)),
                    property_users::lease_id.eq(None::<Uuid>),
                    property_users::updated_at.eq(now),
                ))
                .execute(conn)?;
        } else {
            diesel::delete(property_users::table.find(association_id)).execute(conn)?;
        }

        if was_tenant {
            if let Some(unit_id) = existing.unit_id {
                diesel::delete(
                    unit_tenants::table
                        .filter(unit_tenants::unit_id.eq(unit_id))
                        .filter(unit_tenants::user_id.eq(existing.user_id)),
                )
                .execute(conn)?;

                let remaining: i64 = unit_tenants::table
                    .filter(unit_tenants::unit_id.eq(unit_id))
                    .count()
                    .get_result(conn)?;
                if remaining == 0 {
                    diesel::update(units::table.find(unit_id))
                        .set((
                            units::status.eq(UnitStatus::Vacant.as_str()),
                            units::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }
            }
        }
        Ok(())
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::PropertyUser,
            association_id,
        )
        .with_metadata(json!({ "soft_deleted": referenced })),
    );

    Ok(StatusCode::NO_CONTENT)
}
