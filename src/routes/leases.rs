use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{AuthenticatedUser, RequestMeta};
use crate::authz;
use crate::docgen;
use crate::enums::{
    AuditAction, GlobalRole, LeaseStatus, NotificationKind, PropertyRole, ResourceKind, UnitStatus,
};
use crate::error::{AppError, AppResult};
use crate::history;
use crate::models::{
    Lease, NewLease, NewLeaseAmendment, NewPropertyUser, NewRent, NewUnitTenant, PropertyUser,
    Unit, User,
};
use crate::notify::{self, Fanout};
use crate::schema::{
    lease_amendments, leases, property_users, rents, unit_tenants, units, users,
};
use crate::state::AppState;

const MAX_RENT_ROWS: usize = 120;

#[derive(Deserialize)]
pub struct CreateLeasePayload {
    pub property_id: Uuid,
    pub unit_id: Uuid,
    pub tenant_id: Uuid,
    pub landlord_id: Uuid,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub monthly_rent_cents: i64,
    pub currency: Option<String>,
    pub payment_due_day: Option<i32>,
    pub deposit_cents: Option<i64>,
}

#[derive(Deserialize)]
pub struct LeaseListQuery {
    pub property_id: Option<Uuid>,
    pub status: Option<LeaseStatus>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct UpdateLeasePayload {
    pub end_date: Option<NaiveDateTime>,
    pub monthly_rent_cents: Option<i64>,
    pub payment_due_day: Option<i32>,
    pub status: Option<LeaseStatus>,
}

#[derive(Deserialize)]
pub struct AmendLeasePayload {
    pub description: String,
    #[serde(default)]
    pub changes: serde_json::Value,
    pub effective_date: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct LeaseResponse {
    pub id: Uuid,
    pub property_id: Uuid,
    pub unit_id: Uuid,
    pub tenant_id: Uuid,
    pub landlord_id: Uuid,
    pub start_date: String,
    pub end_date: String,
    pub monthly_rent_cents: i64,
    pub currency: String,
    pub payment_due_day: i32,
    pub deposit_cents: i64,
    pub status: String,
    pub version: i32,
    pub renewal_notice_sent: bool,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct AmendmentResponse {
    pub id: Uuid,
    pub description: String,
    pub changes: serde_json::Value,
    pub effective_date: Option<String>,
    pub created_at: String,
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339()
}

fn to_response(lease: &Lease) -> LeaseResponse {
    LeaseResponse {
        id: lease.id,
        property_id: lease.property_id,
        unit_id: lease.unit_id,
        tenant_id: lease.tenant_id,
        landlord_id: lease.landlord_id,
        start_date: fmt_ts(lease.start_date),
        end_date: fmt_ts(lease.end_date),
        monthly_rent_cents: lease.monthly_rent_cents,
        currency: lease.currency.clone(),
        payment_due_day: lease.payment_due_day,
        deposit_cents: lease.deposit_cents,
        status: lease.status.clone(),
        version: lease.version,
        renewal_notice_sent: lease.renewal_notice_sent,
        is_active: lease.is_active,
        created_at: fmt_ts(lease.created_at),
        updated_at: fmt_ts(lease.updated_at),
    }
}

fn load_lease(conn: &mut PgConnection, lease_id: Uuid) -> AppResult<Lease> {
    let lease: Lease = leases::table
        .find(lease_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !lease.is_active {
        return Err(AppError::not_found());
    }
    Ok(lease)
}

fn ensure_lease_access(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    lease: &Lease,
) -> AppResult<()> {
    if user.is_admin() || lease.tenant_id == user.user_id || lease.landlord_id == user.user_id {
        return Ok(());
    }
    authz::ensure_management(conn, user, lease.property_id)
}

fn clamp_day(year: i32, month: u32, day: u32) -> NaiveDate {
    let last_day = match NaiveDate::from_ymd_opt(year, month, 1) {
        Some(first) => {
            let (next_year, next_month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            NaiveDate::from_ymd_opt(next_year, next_month, 1)
                .map(|next| next.pred_opt().unwrap_or(first).day())
                .unwrap_or(28)
        }
        None => 28,
    };
    NaiveDate::from_ymd_opt(year, month, day.min(last_day))
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 1).expect("valid month"))
}

/// One due date per month of the lease term, on the payment day (clamped to
/// the month's length), bounded so a malformed term cannot flood the table.
fn rent_due_dates(start: NaiveDateTime, end: NaiveDateTime, due_day: i32) -> Vec<NaiveDateTime> {
    let due_day = due_day.clamp(1, 31) as u32;
    let mut dates = Vec::new();
    let mut year = start.year();
    let mut month = start.month();

    loop {
        let candidate = clamp_day(year, month, due_day)
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists");
        if candidate >= start && candidate <= end {
            dates.push(candidate);
            if dates.len() >= MAX_RENT_ROWS {
                break;
            }
        }
        if candidate > end {
            break;
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    dates
}

pub async fn create_lease(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<CreateLeasePayload>,
) -> AppResult<(StatusCode, Json<LeaseResponse>)> {
    if payload.end_date <= payload.start_date {
        return Err(AppError::bad_request("end_date must be after start_date"));
    }
    if payload.monthly_rent_cents <= 0 {
        return Err(AppError::bad_request("monthly_rent_cents must be positive"));
    }
    let payment_due_day = payload.payment_due_day.unwrap_or(1);
    if !(1..=31).contains(&payment_due_day) {
        return Err(AppError::bad_request("payment_due_day must be 1-31"));
    }

    let mut conn = state.db()?;
    authz::ensure_management(&mut conn, &user, payload.property_id)?;

    let unit: Unit = units::table
        .find(payload.unit_id)
        .filter(units::is_active.eq(true))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request("unit does not exist"))?;
    if unit.property_id != payload.property_id {
        return Err(AppError::bad_request(
            "unit does not belong to the given property",
        ));
    }

    let tenant: User = users::table
        .find(payload.tenant_id)
        .filter(users::is_active.eq(true))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request("tenant does not exist"))?;
    let landlord: User = users::table
        .find(payload.landlord_id)
        .filter(users::is_active.eq(true))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request("landlord does not exist"))?;

    let now = state.clock.now_naive();
    let lease_id = Uuid::new_v4();

    let lease = conn.transaction::<Lease, AppError, _>(|conn| {
        let row = NewLease {
            id: lease_id,
            property_id: payload.property_id,
            unit_id: payload.unit_id,
            tenant_id: payload.tenant_id,
            landlord_id: payload.landlord_id,
            start_date: payload.start_date,
            end_date: payload.end_date,
            monthly_rent_cents: payload.monthly_rent_cents,
            currency: payload.currency.clone().unwrap_or_else(|| "USD".to_string()),
            payment_due_day,
            deposit_cents: payload.deposit_cents.unwrap_or(0),
            status: LeaseStatus::Active.as_str().to_string(),
        };
        // The partial unique index rejects a second active lease on the unit.
        diesel::insert_into(leases::table).values(&row).execute(conn)?;

        for due_date in rent_due_dates(payload.start_date, payload.end_date, payment_due_day) {
            diesel::insert_into(rents::table)
                .values(&NewRent {
                    id: Uuid::new_v4(),
                    lease_id,
                    tenant_id: payload.tenant_id,
                    amount_cents: payload.monthly_rent_cents,
                    due_date,
                    status: "pending".to_string(),
                })
                .execute(conn)?;
        }

        // Bind the tenant to the unit: association with the lease attached,
        // the materialized tenant list, and the occupancy flag.
        let existing: Option<PropertyUser> = property_users::table
            .filter(property_users::user_id.eq(payload.tenant_id))
            .filter(property_users::property_id.eq(payload.property_id))
            .filter(property_users::unit_id.eq(Some(payload.unit_id)))
            .first(conn)
            .optional()?;

        match existing {
            Some(association) => {
                diesel::update(property_users::table.find(association.id))
                    .set((
                        property_users::is_active.eq(true),
                        property_users::end_date.eq(None::<NaiveDateTime>),
                        property_users::lease_id.eq(Some(lease_id)),
                        property_users::updated_at.eq(now),
                    ))
                    .execute(conn)?;
            }
            None => {
                diesel::insert_into(property_users::table)
                    .values(&NewPropertyUser {
                        id: Uuid::new_v4(),
                        user_id: payload.tenant_id,
                        property_id: payload.property_id,
                        unit_id: Some(payload.unit_id),
                        roles: vec![PropertyRole::Tenant.as_str().to_string()],
                        start_date: payload.start_date,
                        lease_id: Some(lease_id),
                    })
                    .execute(conn)?;
            }
        }

        diesel::insert_into(unit_tenants::table)
            .values(&NewUnitTenant {
                unit_id: payload.unit_id,
                user_id: payload.tenant_id,
                assigned_by: Some(user.user_id),
            })
            .on_conflict_do_nothing()
            .execute(conn)?;

        diesel::update(units::table.find(payload.unit_id))
            .set((
                units::status.eq(UnitStatus::Occupied.as_str()),
                units::updated_at.eq(now),
            ))
            .execute(conn)?;

        history::append(
            conn,
            ResourceKind::Lease,
            lease_id,
            LeaseStatus::Active.as_str(),
            now,
            Some(user.user_id),
            Some("Lease created"),
        )?;

        Ok(leases::table.find(lease_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::Lease,
            lease.id,
        )
        .with_change(
            None,
            Some(json!({
                "unit_id": lease.unit_id,
                "tenant_id": lease.tenant_id,
                "monthly_rent_cents": lease.monthly_rent_cents,
            })),
        ),
    );
    let property = crate::routes::properties::load_property(&mut conn, lease.property_id)?;
    drop(conn);

    // The lease summary document is best-effort; a failed render or upload
    // never rolls back the lease itself.
    if let Err(err) = docgen::generate_lease_document(
        &state,
        &lease,
        &property,
        &unit,
        &tenant,
        &landlord,
        Some(user.user_id),
    )
    .await
    {
        warn!(lease_id = %lease.id, error = %err, "failed to generate lease document");
    }

    notify::dispatch(
        &state,
        Fanout::new(
            NotificationKind::LeaseCreated,
            format!(
                "Lease created for {} on unit {}",
                tenant.display_name(),
                unit.name
            ),
            ResourceKind::Lease,
            lease.id,
            lease.property_id,
        )
        .unit(Some(lease.unit_id))
        .actor(user.user_id),
    );

    Ok((StatusCode::CREATED, Json(to_response(&lease))))
}

pub async fn list_leases(
    State(state): State<AppState>,
    Query(params): Query<LeaseListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<LeaseResponse>>> {
    let mut conn = state.db()?;

    let mut query = leases::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(leases::is_active.eq(true));
    }
    if let Some(property_id) = params.property_id {
        query = query.filter(leases::property_id.eq(property_id));
    }
    if let Some(status) = params.status {
        query = query.filter(leases::status.eq(status.as_str()));
    }

    if !user.is_admin() {
        if user.role == GlobalRole::Tenant {
            query = query.filter(leases::tenant_id.eq(user.user_id));
        } else {
            let property_ids = authz::associated_property_ids(&mut conn, user.user_id)?;
            query = query.filter(leases::property_id.eq_any(property_ids));
        }
    }

    let rows: Vec<Lease> = query.order(leases::created_at.desc()).load(&mut conn)?;
    Ok(Json(rows.iter().map(to_response).collect()))
}

pub async fn get_lease(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<LeaseResponse>> {
    let mut conn = state.db()?;
    let lease = load_lease(&mut conn, lease_id)?;
    ensure_lease_access(&mut conn, &user, &lease)?;
    Ok(Json(to_response(&lease)))
}

pub async fn update_lease(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdateLeasePayload>,
) -> AppResult<Json<LeaseResponse>> {
    let mut conn = state.db()?;
    let lease = load_lease(&mut conn, lease_id)?;
    authz::ensure_management(&mut conn, &user, lease.property_id)?;

    let now = state.clock.now_naive();
    let updated = conn.transaction::<Lease, AppError, _>(|conn| {
        if let Some(end_date) = payload.end_date {
            if end_date <= lease.start_date {
                return Err(AppError::bad_request("end_date must be after start_date"));
            }
            diesel::update(leases::table.find(lease_id))
                .set(leases::end_date.eq(end_date))
                .execute(conn)?;
        }
        if let Some(rent) = payload.monthly_rent_cents {
            if rent <= 0 {
                return Err(AppError::bad_request("monthly_rent_cents must be positive"));
            }
            diesel::update(leases::table.find(lease_id))
                .set(leases::monthly_rent_cents.eq(rent))
                .execute(conn)?;
        }
        if let Some(due_day) = payload.payment_due_day {
            if !(1..=31).contains(&due_day) {
                return Err(AppError::bad_request("payment_due_day must be 1-31"));
            }
            diesel::update(leases::table.find(lease_id))
                .set(leases::payment_due_day.eq(due_day))
                .execute(conn)?;
        }
        if let Some(status) = payload.status {
            diesel::update(leases::table.find(lease_id))
                .set(leases::status.eq(status.as_str()))
                .execute(conn)?;
            history::append(
                conn,
                ResourceKind::Lease,
                lease_id,
                status.as_str(),
                now,
                Some(user.user_id),
                None,
            )?;
        }
        diesel::update(leases::table.find(lease_id))
            .set(leases::updated_at.eq(now))
            .execute(conn)?;
        Ok(leases::table.find(lease_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::Lease,
            lease_id,
        )
        .with_change(
            Some(json!({ "status": lease.status, "monthly_rent_cents": lease.monthly_rent_cents })),
            Some(json!({ "status": updated.status, "monthly_rent_cents": updated.monthly_rent_cents })),
        ),
    );

    Ok(Json(to_response(&updated)))
}

pub async fn list_amendments(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<AmendmentResponse>>> {
    let mut conn = state.db()?;
    let lease = load_lease(&mut conn, lease_id)?;
    ensure_lease_access(&mut conn, &user, &lease)?;

    let rows: Vec<crate::models::LeaseAmendment> = lease_amendments::table
        .filter(lease_amendments::lease_id.eq(lease_id))
        .order(lease_amendments::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|amendment| AmendmentResponse {
                id: amendment.id,
                description: amendment.description,
                changes: amendment.changes,
                effective_date: amendment.effective_date.map(fmt_ts),
                created_at: fmt_ts(amendment.created_at),
            })
            .collect(),
    ))
}

/// Each amendment bumps the lease version; the amendment row keeps the
/// before/after deltas the caller supplied.
pub async fn amend_lease(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<AmendLeasePayload>,
) -> AppResult<(StatusCode, Json<LeaseResponse>)> {
    if payload.description.trim().is_empty() {
        return Err(AppError::bad_request("description must not be empty"));
    }

    let mut conn = state.db()?;
    let lease = load_lease(&mut conn, lease_id)?;
    authz::ensure_management(&mut conn, &user, lease.property_id)?;

    let now = state.clock.now_naive();
    let updated = conn.transaction::<Lease, AppError, _>(|conn| {
        diesel::insert_into(lease_amendments::table)
            .values(&NewLeaseAmendment {
                id: Uuid::new_v4(),
                lease_id,
                description: payload.description.trim().to_string(),
                changes: payload.changes.clone(),
                amended_by: Some(user.user_id),
                effective_date: payload.effective_date,
            })
            .execute(conn)?;

        diesel::update(leases::table.find(lease_id))
            .set((
                leases::version.eq(lease.version + 1),
                leases::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok(leases::table.find(lease_id).first(conn)?)
    })?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::Lease,
            lease_id,
        )
        .with_metadata(json!({ "amendment": payload.description.trim(), "version": updated.version })),
    );

    Ok((StatusCode::CREATED, Json(to_response(&updated))))
}

/// Shared wind-down used by terminate and delete: lease status, unit
/// occupancy, tenant association, and rent rows all settle together.
fn wind_down_lease(
    conn: &mut PgConnection,
    lease: &Lease,
    now: NaiveDateTime,
    actor: Uuid,
    deactivate_lease: bool,
) -> AppResult<Lease> {
    conn.transaction::<Lease, AppError, _>(|conn| {
        diesel::update(leases::table.find(lease.id))
            .set((
                leases::status.eq(LeaseStatus::Terminated.as_str()),
                leases::updated_at.eq(now),
            ))
            .execute(conn)?;
        if deactivate_lease {
            diesel::update(leases::table.find(lease.id))
                .set(leases::is_active.eq(false))
                .execute(conn)?;
        }

        history::append(
            conn,
            ResourceKind::Lease,
            lease.id,
            LeaseStatus::Terminated.as_str(),
            now,
            Some(actor),
            None,
        )?;

        diesel::update(
            property_users::table
                .filter(property_users::lease_id.eq(Some(lease.id)))
                .filter(property_users::is_active.eq(true)),
        )
        .set((
            property_users::lease_id.eq(None::<Uuid>),
            property_users::updated_at.eq(now),
        ))
        .execute(conn)?;

        diesel::update(rents::table.filter(rents::lease_id.eq(lease.id)))
            .set((rents::is_active.eq(false), rents::updated_at.eq(now)))
            .execute(conn)?;

        // Unit flips vacant only when this was the last active lease on it.
        let other_active: i64 = leases::table
            .filter(leases::unit_id.eq(lease.unit_id))
            .filter(leases::id.ne(lease.id))
            .filter(leases::status.eq(LeaseStatus::Active.as_str()))
            .filter(leases::is_active.eq(true))
            .count()
            .get_result(conn)?;
        if other_active == 0 {
            diesel::update(units::table.find(lease.unit_id))
                .set((
                    units::status.eq(UnitStatus::Vacant.as_str()),
                    units::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        Ok(leases::table.find(lease.id).first(conn)?)
    })
}

pub async fn terminate_lease(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<Json<LeaseResponse>> {
    let mut conn = state.db()?;
    let lease = load_lease(&mut conn, lease_id)?;
    authz::ensure_management(&mut conn, &user, lease.property_id)?;

    if lease.status == LeaseStatus::Terminated.as_str() {
        return Err(AppError::conflict("lease is already terminated"));
    }

    let now = state.clock.now_naive();
    let updated = wind_down_lease(&mut conn, &lease, now, user.user_id, false)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::StatusChange,
            ResourceKind::Lease,
            lease_id,
        )
        .with_change(
            Some(json!({ "status": lease.status })),
            Some(json!({ "status": updated.status })),
        ),
    );
    drop(conn);

    notify::dispatch(
        &state,
        Fanout::new(
            NotificationKind::LeaseTerminated,
            "Lease terminated".to_string(),
            ResourceKind::Lease,
            updated.id,
            updated.property_id,
        )
        .unit(Some(updated.unit_id))
        .actor(user.user_id),
    );

    Ok(Json(to_response(&updated)))
}

pub async fn delete_lease(
    State(state): State<AppState>,
    Path(lease_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let lease = load_lease(&mut conn, lease_id)?;
    authz::ensure_management(&mut conn, &user, lease.property_id)?;

    let now = state.clock.now_naive();
    let updated = wind_down_lease(&mut conn, &lease, now, user.user_id, true)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::Lease,
            lease_id,
        )
        .with_change(
            Some(json!({ "status": lease.status, "is_active": true })),
            Some(json!({ "status": updated.status, "is_active": false })),
        ),
    );
    drop(conn);

    notify::dispatch(
        &state,
        Fanout::new(
            NotificationKind::LeaseTerminated,
            "Lease deleted".to_string(),
            ResourceKind::Lease,
            updated.id,
            updated.property_id,
        )
        .unit(Some(updated.unit_id))
        .actor(user.user_id),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn one_rent_row_per_month() {
        let dates = rent_due_dates(at(2024, 1, 1), at(2024, 6, 30), 1);
        assert_eq!(dates.len(), 6);
        assert_eq!(dates[0], at(2024, 1, 1));
        assert_eq!(dates[5], at(2024, 6, 1));
    }

    #[test]
    fn due_day_clamps_to_short_months() {
        let dates = rent_due_dates(at(2024, 1, 1), at(2024, 3, 31), 31);
        assert_eq!(dates, vec![at(2024, 1, 31), at(2024, 2, 29), at(2024, 3, 31)]);
    }

    #[test]
    fn due_days_before_start_are_skipped() {
        let dates = rent_due_dates(at(2024, 1, 15), at(2024, 3, 31), 1);
        assert_eq!(dates, vec![at(2024, 2, 1), at(2024, 3, 1)]);
    }
}
