mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde_json::json;
use uuid::Uuid;

#[derive(serde::Deserialize)]
struct PropertyInfo {
    id: Uuid,
}

#[derive(serde::Deserialize)]
struct UnitInfo {
    id: Uuid,
    tenants: Vec<Uuid>,
}

#[derive(serde::Deserialize)]
struct RequestInfo {
    id: Uuid,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

#[tokio::test]
async fn foreign_tenant_is_denied_without_leaking_fields() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("authz-mgr@example.com", "managerpw", "propertymanager").await?;
    let tenant_id = app.insert_user("authz-t1@example.com", "tenantpw", "tenant").await?;
    app.insert_user("authz-t2@example.com", "tenantpw", "tenant").await?;
    let manager_token = app.login_token("authz-mgr@example.com", "managerpw").await?;
    let t1_token = app.login_token("authz-t1@example.com", "tenantpw").await?;
    let t2_token = app.login_token("authz-t2@example.com", "tenantpw").await?;

    let response = app
        .post_json(
            "/api/properties",
            &json!({
                "name": "Maple Yard",
                "street": "5 Maple Rd",
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
            &json!({ "property_id": property.id, "name": "2C" }),
            Some(&manager_token),
        )
        .await?;
    let unit: UnitInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    app.post_json(
        &format!("/api/units/{}/tenants", unit.id),
        &json!({ "user_id": tenant_id }),
        Some(&manager_token),
    )
    .await?;

    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "title": "Secret leak",
                "description": "Do not tell the neighbours",
                "category": "plumbing",
                "priority": "high",
                "property_id": property.id,
                "unit_id": unit.id
            }),
            Some(&t1_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let request: RequestInfo =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    // An unrelated tenant is refused, and the error payload carries nothing
    // but the generic denial.
    let response = app
        .get(&format!("/api/requests/{}", request.id), Some(&t2_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_to_vec(response.into_body()).await?;
    let error: ErrorBody = serde_json::from_slice(&body)?;
    assert_eq!(error.error, "access denied");
    assert!(!String::from_utf8_lossy(&body).contains("Secret leak"));

    // Listing is scoped: the foreign tenant sees nothing at all.
    let response = app.get("/api/requests", Some(&t2_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let listed: Vec<RequestInfo> =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert!(listed.is_empty());

    // The member tenant sees their own request.
    let response = app.get("/api/requests", Some(&t1_token)).await?;
    let listed: Vec<RequestInfo> =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(listed.len(), 1);

    // Tenants cannot assign, verify, or delete.
    let response = app
        .post_json(
            &format!("/api/requests/{}/verify", request.id),
            &json!({}),
            Some(&t1_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .delete(&format!("/api/requests/{}", request.id), Some(&t1_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_tenant_assignment_conflicts() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("dup-mgr@example.com", "managerpw", "propertymanager").await?;
    let tenant_id = app.insert_user("dup-ten@example.com", "tenantpw", "tenant").await?;
    let manager_token = app.login_token("dup-mgr@example.com", "managerpw").await?;

    let response = app
        .post_json(
            "/api/properties",
            &json!({
                "name": "Aspen Block",
                "street": "14 Aspen St",
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
            &json!({ "property_id": property.id, "name": "4D" }),
            Some(&manager_token),
        )
        .await?;
    let unit: UnitInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .post_json(
            &format!("/api/units/{}/tenants", unit.id),
            &json!({ "user_id": tenant_id }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // The unique (user, property, unit) index rejects the second insert.
    let response = app
        .post_json(
            &format!("/api/units/{}/tenants", unit.id),
            &json!({ "user_id": tenant_id }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .get(&format!("/api/units/{}", unit.id), Some(&manager_token))
        .await?;
    let refreshed: UnitInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(
        refreshed.tenants.iter().filter(|id| **id == tenant_id).count(),
        1
    );

    // Adding the same association through the property surface conflicts
    // the same way.
    let response = app
        .post_json(
            &format!("/api/properties/{}/users", property.id),
            &json!({ "user_id": tenant_id, "unit_id": unit.id, "roles": ["tenant"] }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}
