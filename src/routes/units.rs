use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{AuthenticatedUser, RequestMeta};
use crate::authz;
use crate::enums::{AuditAction, NotificationKind, PropertyRole, ResourceKind, UnitStatus};
use crate::error::{AppError, AppResult};
use crate::models::{NewPropertyUser, NewUnit, NewUnitTenant, Unit, User};
use crate::notify::{self, Fanout};
use crate::schema::{leases, property_users, unit_tenants, units, users};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateUnitPayload {
    pub property_id: Uuid,
    pub name: String,
    pub floor: Option<i32>,
    #[serde(default)]
    pub bedrooms: i32,
    #[serde(default)]
    pub bathrooms: i32,
    #[serde(default)]
    pub rent_amount_cents: i64,
}

#[derive(Deserialize)]
pub struct UnitListQuery {
    pub property_id: Uuid,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct UpdateUnitPayload {
    pub name: Option<String>,
    pub floor: Option<i32>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub rent_amount_cents: Option<i64>,
    pub status: Option<UnitStatus>,
}

#[derive(Deserialize)]
pub struct AssignTenantPayload {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct UnitResponse {
    pub id: Uuid,
    pub property_id: Uuid,
    pub name: String,
    pub floor: Option<i32>,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub rent_amount_cents: i64,
    pub status: String,
    pub tenants: Vec<Uuid>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

fn fmt_ts(ts: chrono::NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339()
}

fn to_response(conn: &mut PgConnection, unit: &Unit) -> AppResult<UnitResponse> {
    let tenants: Vec<Uuid> = unit_tenants::table
        .filter(unit_tenants::unit_id.eq(unit.id))
        .select(unit_tenants::user_id)
        .load(conn)?;

    Ok(UnitResponse {
        id: unit.id,
        property_id: unit.property_id,
        name: unit.name.clone(),
        floor: unit.floor,
        bedrooms: unit.bedrooms,
        bathrooms: unit.bathrooms,
        rent_amount_cents: unit.rent_amount_cents,
        status: unit.status.clone(),
        tenants,
        is_active: unit.is_active,
        created_at: fmt_ts(unit.created_at),
        updated_at: fmt_ts(unit.updated_at),
    })
}

pub(crate) fn load_unit(conn: &mut PgConnection, unit_id: Uuid) -> AppResult<Unit> {
    let unit: Unit = units::table
        .find(unit_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !unit.is_active {
        return Err(AppError::not_found());
    }
    Ok(unit)
}

fn ensure_member(conn: &mut PgConnection, user: &AuthenticatedUser, property_id: Uuid) -> AppResult<()> {
    if user.is_admin() {
        return Ok(());
    }
    let associations = authz::load_active_associations(conn, user.user_id, property_id)
        .map_err(|_| AppError::forbidden())?;
    if associations.is_empty() {
        return Err(AppError::forbidden());
    }
    Ok(())
}

pub async fn create_unit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<CreateUnitPayload>,
) -> AppResult<(StatusCode, Json<UnitResponse>)> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    crate::routes::properties::load_property(&mut conn, payload.property_id)?;
    authz::ensure_management(&mut conn, &user, payload.property_id)?;

    let row = NewUnit {
        id: Uuid::new_v4(),
        property_id: payload.property_id,
        name: payload.name.trim().to_string(),
        floor: payload.floor,
        bedrooms: payload.bedrooms,
        bathrooms: payload.bathrooms,
        rent_amount_cents: payload.rent_amount_cents,
        status: UnitStatus::Vacant.as_str().to_string(),
    };
    diesel::insert_into(units::table).values(&row).execute(&mut conn)?;
    let unit: Unit = units::table.find(row.id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::Unit,
            unit.id,
        )
        .with_change(None, Some(json!({ "name": unit.name }))),
    );

    let response = to_response(&mut conn, &unit)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_units(
    State(state): State<AppState>,
    Query(params): Query<UnitListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UnitResponse>>> {
    let mut conn = state.db()?;
    ensure_member(&mut conn, &user, params.property_id)?;

    let mut query = units::table
        .filter(units::property_id.eq(params.property_id))
        .into_boxed();
    if !params.include_inactive {
        query = query.filter(units::is_active.eq(true));
    }

    let rows: Vec<Unit> = query.order(units::name.asc()).load(&mut conn)?;
    let mut response = Vec::with_capacity(rows.len());
    for unit in &rows {
        response.push(to_response(&mut conn, unit)?);
    }
    Ok(Json(response))
}

pub async fn get_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UnitResponse>> {
    let mut conn = state.db()?;
    let unit = load_unit(&mut conn, unit_id)?;
    ensure_member(&mut conn, &user, unit.property_id)?;

    let response = to_response(&mut conn, &unit)?;
    Ok(Json(response))
}

pub async fn update_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdateUnitPayload>,
) -> AppResult<Json<UnitResponse>> {
    let mut conn = state.db()?;
    let unit = load_unit(&mut conn, unit_id)?;
    authz::ensure_management(&mut conn, &user, unit.property_id)?;

    let now = state.clock.now_naive();
    if let Some(name) = payload.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        diesel::update(units::table.find(unit_id))
            .set(units::name.eq(name))
            .execute(&mut conn)?;
    }
    if let Some(floor) = payload.floor {
        diesel::update(units::table.find(unit_id))
            .set(units::floor.eq(Some(floor)))
            .execute(&mut conn)?;
    }
    if let Some(bedrooms) = payload.bedrooms {
        diesel::update(units::table.find(unit_id))
            .set(units::bedrooms.eq(bedrooms))
            .execute(&mut conn)?;
    }
    if let Some(bathrooms) = payload.bathrooms {
        diesel::update(units::table.find(unit_id))
            .set(units::bathrooms.eq(bathrooms))
            .execute(&mut conn)?;
    }
    if let Some(rent) = payload.rent_amount_cents {
        diesel::update(units::table.find(unit_id))
            .set(units::rent_amount_cents.eq(rent))
            .execute(&mut conn)?;
    }
    if let Some(status) = payload.status {
        diesel::update(units::table.find(unit_id))
            .set(units::status.eq(status.as_str()))
            .execute(&mut conn)?;
    }
    diesel::update(units::table.find(unit_id))
        .set(units::updated_at.eq(now))
        .execute(&mut conn)?;

    let updated: Unit = units::table.find(unit_id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::Unit,
            unit_id,
        )
        .with_change(
            Some(json!({ "name": unit.name, "status": unit.status })),
            Some(json!({ "name": updated.name, "status": updated.status })),
        ),
    );

    let response = to_response(&mut conn, &updated)?;
    Ok(Json(response))
}

pub async fn delete_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let unit = load_unit(&mut conn, unit_id)?;
    authz::ensure_management(&mut conn, &user, unit.property_id)?;

    let active_lease: i64 = leases::table
        .filter(leases::unit_id.eq(unit_id))
        .filter(leases::status.eq("active"))
        .filter(leases::is_active.eq(true))
        .count()
        .get_result(&mut conn)?;
    if active_lease > 0 {
        return Err(AppError::conflict(
            "cannot delete a unit with an active lease",
        ));
    }

    diesel::update(units::table.find(unit_id))
        .set((
            units::is_active.eq(false),
            units::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::Unit,
            unit_id,
        )
        .with_change(Some(json!({ "name": unit.name })), None),
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_tenant(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<AssignTenantPayload>,
) -> AppResult<(StatusCode, Json<UnitResponse>)> {
    let mut conn = state.db()?;
    let unit = load_unit(&mut conn, unit_id)?;
    authz::ensure_management(&mut conn, &user, unit.property_id)?;

    let tenant: Option<User> = users::table
        .find(payload.user_id)
        .filter(users::is_active.eq(true))
        .first(&mut conn)
        .optional()?;
    let tenant = tenant.ok_or_else(|| AppError::bad_request("user does not exist"))?;

    let now = state.clock.now_naive();
    conn.transaction::<(), AppError, _>(|conn| {
        // Concurrent double-assignment loses here on the unique triple.
        let association = NewPropertyUser {
            id: Uuid::new_v4(),
            user_id: payload.user_id,
            property_id: unit.property_id,
            unit_id: Some(unit_id),
            roles: vec![PropertyRole::Tenant.as_str().to_string()],
            start_date: now,
            lease_id: None,
        };
        diesel::insert_into(property_users::table)
            .values(&association)
            .execute(conn)?;

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
        Ok(())
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Assign,
            ResourceKind::Unit,
            unit_id,
        )
        .with_metadata(json!({ "tenant_id": payload.user_id })),
    );

    let updated: Unit = units::table.find(unit_id).first(&mut conn)?;
    let response = to_response(&mut conn, &updated)?;
    drop(conn);

    notify::dispatch(
        &state,
        Fanout::new(
            NotificationKind::UnitAssigned,
            format!("{} was assigned to unit {}", tenant.display_name(), unit.name),
            ResourceKind::Unit,
            unit_id,
            unit.property_id,
        )
        .unit(Some(unit_id))
        .actor(user.user_id),
    );

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn remove_tenant(
    State(state): State<AppState>,
    Path((unit_id, tenant_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let unit = load_unit(&mut conn, unit_id)?;
    authz::ensure_management(&mut conn, &user, unit.property_id)?;

    let now = state.clock.now_naive();
    let removed = conn.transaction::<usize, AppError, _>(|conn| {
        let removed = diesel::delete(
            unit_tenants::table
                .filter(unit_tenants::unit_id.eq(unit_id))
                .filter(unit_tenants::user_id.eq(tenant_id)),
        )
        .execute(conn)?;

        diesel::update(
            property_users::table
                .filter(property_users::user_id.eq(tenant_id))
                .filter(property_users::property_id.eq(unit.property_id))
                .filter(property_users::unit_id.eq(Some(unit_id)))
                .filter(property_users::is_active.eq(true)),
        )
        .set((
            property_users::is_active.eq(false),
            property_users::end_date.eq(Some(now)),
            property_users::lease_id.eq(None::<Uuid>),
            property_users::updated_at.eq(now),
        ))
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
        Ok(removed)
    })?;

    if removed == 0 {
        return Err(AppError::not_found());
    }

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::Unit,
            unit_id,
        )
        .with_metadata(json!({ "removed_tenant_id": tenant_id })),
    );

    Ok(StatusCode::NO_CONTENT)
}
