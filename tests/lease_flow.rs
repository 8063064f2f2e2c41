mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use diesel::prelude::*;
use serde_json::json;
use uuid::Uuid;

#[derive(serde::Deserialize)]
struct PropertyInfo {
    id: Uuid,
}

#[derive(serde::Deserialize)]
struct UnitInfo {
    id: Uuid,
    status: String,
}

#[derive(serde::Deserialize)]
struct LeaseInfo {
    id: Uuid,
    status: String,
    version: i32,
}

#[tokio::test]
async fn lease_creation_and_deletion_cascade() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("lease-mgr@example.com", "managerpw", "propertymanager").await?;
    let landlord_id = app.insert_user("lease-ll@example.com", "landlordpw", "landlord").await?;
    let tenant_id = app.insert_user("lease-ten@example.com", "tenantpw", "tenant").await?;
    let manager_token = app.login_token("lease-mgr@example.com", "managerpw").await?;

    let response = app
        .post_json(
            "/api/properties",
            &json!({
                "name": "Pine Terrace",
                "street": "30 Pine Ct",
                "city": "Springfield",
                "state": "IL",
                "zip_code": "62704",
                "country": "USA"
            }),
            Some(&manager_token),
        )
        .await?;
    let property: PropertyInfo =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .post_json(
            "/api/units",
            &json!({ "property_id": property.id, "name": "5A", "rent_amount_cents": 120000 }),
            Some(&manager_token),
        )
        .await?;
    let unit: UnitInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(unit.status, "vacant");

    let response = app
        .post_json(
            "/api/leases",
            &json!({
                "property_id": property.id,
                "unit_id": unit.id,
                "tenant_id": tenant_id,
                "landlord_id": landlord_id,
                "start_date": "2024-01-01T00:00:00",
                "end_date": "2024-06-30T00:00:00",
                "monthly_rent_cents": 120000,
                "payment_due_day": 1,
                "deposit_cents": 240000
            }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let lease: LeaseInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(lease.status, "active");
    assert_eq!(lease.version, 1);

    // Unit flips occupied, one rent row per month, lease bound to the
    // tenant's association, lease document stored.
    let response = app
        .get(&format!("/api/units/{}", unit.id), Some(&manager_token))
        .await?;
    let occupied: UnitInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(occupied.status, "occupied");

    let lease_id = lease.id;
    let rent_count: i64 = app
        .with_conn(move |conn| {
            use fixit_backend::schema::rents;
            Ok(rents::table
                .filter(rents::lease_id.eq(lease_id))
                .filter(rents::is_active.eq(true))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(rent_count, 6);

    let association_lease: Option<Uuid> = app
        .with_conn(move |conn| {
            use fixit_backend::schema::property_users;
            Ok(property_users::table
                .filter(property_users::user_id.eq(tenant_id))
                .filter(property_users::is_active.eq(true))
                .select(property_users::lease_id)
                .first::<Option<Uuid>>(conn)?)
        })
        .await?;
    assert_eq!(association_lease, Some(lease.id));

    let lease_docs: i64 = app
        .with_conn(move |conn| {
            use fixit_backend::schema::media;
            Ok(media::table
                .filter(media::related_to.eq("lease"))
                .filter(media::related_id.eq(lease_id))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(lease_docs, 1);
    assert!(app.storage().object_count() > 0);

    // Only one active lease per unit.
    let response = app
        .post_json(
            "/api/leases",
            &json!({
                "property_id": property.id,
                "unit_id": unit.id,
                "tenant_id": tenant_id,
                "landlord_id": landlord_id,
                "start_date": "2024-02-01T00:00:00",
                "end_date": "2024-12-31T00:00:00",
                "monthly_rent_cents": 130000
            }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Amendments bump the version.
    let response = app
        .post_json(
            &format!("/api/leases/{}/amendments", lease.id),
            &json!({
                "description": "Rent adjusted after appliance upgrade",
                "changes": { "monthly_rent_cents": { "from": 120000, "to": 125000 } }
            }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let amended: LeaseInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(amended.version, 2);

    // Deleting the lease winds everything down.
    let response = app
        .delete(&format!("/api/leases/{}", lease.id), Some(&manager_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (lease_status, lease_active): (String, bool) = app
        .with_conn(move |conn| {
            use fixit_backend::schema::leases;
            Ok(leases::table
                .find(lease_id)
                .select((leases::status, leases::is_active))
                .first(conn)?)
        })
        .await?;
    assert_eq!(lease_status, "terminated");
    assert!(!lease_active);

    let response = app
        .get(&format!("/api/units/{}", unit.id), Some(&manager_token))
        .await?;
    let vacated: UnitInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(vacated.status, "vacant");

    let association_lease: Option<Uuid> = app
        .with_conn(move |conn| {
            use fixit_backend::schema::property_users;
            Ok(property_users::table
                .filter(property_users::user_id.eq(tenant_id))
                .select(property_users::lease_id)
                .first::<Option<Uuid>>(conn)?)
        })
        .await?;
    assert_eq!(association_lease, None);

    let active_rents: i64 = app
        .with_conn(move |conn| {
            use fixit_backend::schema::rents;
            Ok(rents::table
                .filter(rents::lease_id.eq(lease_id))
                .filter(rents::is_active.eq(true))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(active_rents, 0);

    // With the old lease retired, a new one can move in.
    let response = app
        .post_json(
            "/api/leases",
            &json!({
                "property_id": property.id,
                "unit_id": unit.id,
                "tenant_id": tenant_id,
                "landlord_id": landlord_id,
                "start_date": "2024-07-01T00:00:00",
                "end_date": "2025-06-30T00:00:00",
                "monthly_rent_cents": 125000
            }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    app.cleanup().await?;
    Ok(())
}
