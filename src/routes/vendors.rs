use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::{AuthenticatedUser, RequestMeta};
use crate::enums::{AuditAction, GlobalRole, ResourceKind};
use crate::error::{AppError, AppResult};
use crate::models::{NewVendor, Vendor};
use crate::schema::vendors;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateVendorPayload {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
}

#[derive(Deserialize)]
pub struct VendorListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct UpdateVendorPayload {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
}

#[derive(Serialize)]
pub struct VendorResponse {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

fn to_response(vendor: &Vendor) -> VendorResponse {
    VendorResponse {
        id: vendor.id,
        name: vendor.name.clone(),
        email: vendor.email.clone(),
        phone: vendor.phone.clone(),
        specialty: vendor.specialty.clone(),
        is_active: vendor.is_active,
        created_at: vendor.created_at.and_utc().to_rfc3339(),
    }
}

fn ensure_staff(user: &AuthenticatedUser) -> AppResult<()> {
    if matches!(
        user.role,
        GlobalRole::Admin | GlobalRole::Landlord | GlobalRole::PropertyManager
    ) {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

pub async fn create_vendor(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<CreateVendorPayload>,
) -> AppResult<(StatusCode, Json<VendorResponse>)> {
    ensure_staff(&user)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    let row = NewVendor {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        email: payload.email.clone(),
        phone: payload.phone.clone(),
        specialty: payload.specialty.clone(),
    };
    diesel::insert_into(vendors::table).values(&row).execute(&mut conn)?;
    let vendor: Vendor = vendors::table.find(row.id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Create,
            ResourceKind::Vendor,
            vendor.id,
        )
        .with_change(None, Some(json!({ "name": vendor.name }))),
    );

    Ok((StatusCode::CREATED, Json(to_response(&vendor))))
}

pub async fn list_vendors(
    State(state): State<AppState>,
    Query(params): Query<VendorListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<VendorResponse>>> {
    ensure_staff(&user)?;

    let mut conn = state.db()?;
    let mut query = vendors::table.into_boxed();
    if !params.include_inactive {
        query = query.filter(vendors::is_active.eq(true));
    }

    let rows: Vec<Vendor> = query.order(vendors::name.asc()).load(&mut conn)?;
    Ok(Json(rows.iter().map(to_response).collect()))
}

pub async fn get_vendor(
    State(state): State<AppState>,
    Path(vendor_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<VendorResponse>> {
    ensure_staff(&user)?;

    let mut conn = state.db()?;
    let vendor: Vendor = vendors::table
        .find(vendor_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !vendor.is_active {
        return Err(AppError::not_found());
    }
    Ok(Json(to_response(&vendor)))
}

pub async fn update_vendor(
    State(state): State<AppState>,
    Path(vendor_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(payload): Json<UpdateVendorPayload>,
) -> AppResult<Json<VendorResponse>> {
    ensure_staff(&user)?;

    let mut conn = state.db()?;
    let vendor: Vendor = vendors::table
        .find(vendor_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !vendor.is_active {
        return Err(AppError::not_found());
    }

    if let Some(name) = payload.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        diesel::update(vendors::table.find(vendor_id))
            .set(vendors::name.eq(name))
            .execute(&mut conn)?;
    }
    if let Some(email) = payload.email.as_deref() {
        diesel::update(vendors::table.find(vendor_id))
            .set(vendors::email.eq(Some(email.trim())))
            .execute(&mut conn)?;
    }
    if let Some(phone) = payload.phone.as_deref() {
        diesel::update(vendors::table.find(vendor_id))
            .set(vendors::phone.eq(Some(phone.trim())))
            .execute(&mut conn)?;
    }
    if let Some(specialty) = payload.specialty.as_deref() {
        diesel::update(vendors::table.find(vendor_id))
            .set(vendors::specialty.eq(Some(specialty.trim())))
            .execute(&mut conn)?;
    }
    diesel::update(vendors::table.find(vendor_id))
        .set(vendors::updated_at.eq(state.clock.now_naive()))
        .execute(&mut conn)?;

    let updated: Vendor = vendors::table.find(vendor_id).first(&mut conn)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Update,
            ResourceKind::Vendor,
            vendor_id,
        )
        .with_change(
            Some(json!({ "name": vendor.name })),
            Some(json!({ "name": updated.name })),
        ),
    );

    Ok(Json(to_response(&updated)))
}

pub async fn deactivate_vendor(
    State(state): State<AppState>,
    Path(vendor_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> AppResult<impl IntoResponse> {
    ensure_staff(&user)?;

    let mut conn = state.db()?;
    let updated = diesel::update(
        vendors::table
            .find(vendor_id)
            .filter(vendors::is_active.eq(true)),
    )
    .set((
        vendors::is_active.eq(false),
        vendors::updated_at.eq(state.clock.now_naive()),
    ))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::not_found());
    }

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.user_id),
            AuditAction::Delete,
            ResourceKind::Vendor,
            vendor_id,
        ),
    );

    Ok(StatusCode::NO_CONTENT)
}
