mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use diesel::prelude::*;
use serde_json::json;
use uuid::Uuid;

#[derive(serde::Deserialize)]
struct RequestDetail {
    id: Uuid,
    status: String,
    resolved_at: Option<String>,
    feedback: Option<Feedback>,
    status_history: Vec<HistoryEntry>,
}

#[derive(serde::Deserialize)]
struct Feedback {
    rating: i32,
}

#[derive(serde::Deserialize)]
struct HistoryEntry {
    status: String,
}

#[derive(serde::Deserialize)]
struct PublicLink {
    url: String,
    token: String,
}

#[derive(serde::Deserialize)]
struct PropertyInfo {
    id: Uuid,
}

#[derive(serde::Deserialize)]
struct UnitInfo {
    id: Uuid,
}

#[derive(serde::Deserialize)]
struct VendorInfo {
    id: Uuid,
}

#[tokio::test]
async fn tenant_to_vendor_to_feedback_flow() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let manager_id = app.insert_user("mara@example.com", "managerpw", "propertymanager").await?;
    let tenant_id = app.insert_user("tess@example.com", "tenantpw", "tenant").await?;
    let manager_token = app.login_token("mara@example.com", "managerpw").await?;
    let tenant_token = app.login_token("tess@example.com", "tenantpw").await?;

    let response = app
        .post_json(
            "/api/properties",
            &json!({
                "name": "Oakwood",
                "street": "12 Oak St",
                "city": "Springfield",
                "state": "IL",
                "zip_code": "62704",
                "country": "USA"
            }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let property: PropertyInfo =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .post_json(
            "/api/units",
            &json!({ "property_id": property.id, "name": "3B" }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let unit: UnitInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .post_json(
            &format!("/api/units/{}/tenants", unit.id),
            &json!({ "user_id": tenant_id }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(
            "/api/vendors",
            &json!({ "name": "Apex Plumbing", "specialty": "plumbing" }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let vendor: VendorInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    // Tenant opens the request on their unit.
    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "title": "Leak",
                "description": "Under sink",
                "category": "plumbing",
                "priority": "high",
                "property_id": property.id,
                "unit_id": unit.id
            }),
            Some(&tenant_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let request: RequestDetail = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(request.status, "new");
    assert_eq!(request.status_history.len(), 1);

    // Manager assigns the vendor; status auto-advances with one history row.
    let response = app
        .post_json(
            &format!("/api/requests/{}/assign", request.id),
            &json!({ "assignee_id": vendor.id, "assignee_kind": "Vendor" }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let assigned: RequestDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(assigned.status, "assigned");
    assert_eq!(assigned.status_history.len(), 2);
    assert_eq!(assigned.status_history.last().unwrap().status, "assigned");

    // Re-assigning the same vendor is a timestamp refresh, not a new entry.
    let response = app
        .post_json(
            &format!("/api/requests/{}/assign", request.id),
            &json!({ "assignee_id": vendor.id, "assignee_kind": "Vendor" }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let reassigned: RequestDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(reassigned.status_history.len(), 2);

    // Audit trail has the create and the assignment.
    let request_id = request.id;
    let audit_actions: Vec<String> = app
        .with_conn(move |conn| {
            use fixit_backend::schema::audit_logs::dsl::*;
            Ok(audit_logs
                .filter(resource_id.eq(Some(request_id)))
                .filter(status.eq("success"))
                .select(action)
                .load(conn)?)
        })
        .await?;
    assert!(audit_actions.iter().any(|a| a == "create"));
    assert!(audit_actions.iter().any(|a| a == "assign"));

    // The tenant (creator) got an in-app notification about the assignment;
    // the acting manager did not.
    let (tenant_rows, manager_rows) = app
        .with_conn(move |conn| {
            use fixit_backend::schema::notifications::dsl::*;
            let tenant_rows: i64 = notifications
                .filter(recipient_id.eq(tenant_id))
                .filter(notification_type.eq("request_assigned"))
                .count()
                .get_result(conn)?;
            let manager_rows: i64 = notifications
                .filter(recipient_id.eq(manager_id))
                .filter(notification_type.eq("request_assigned"))
                .count()
                .get_result(conn)?;
            Ok((tenant_rows, manager_rows))
        })
        .await?;
    assert_eq!(tenant_rows, 1);
    assert_eq!(manager_rows, 0);

    // Manager shares a public link with the vendor.
    let response = app
        .post_json(
            &format!("/api/requests/{}/public-link", request.id),
            &json!({ "expires_in_days": 3 }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let link: PublicLink = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert!(link.url.contains("/requests/public/"));

    // The vendor completes the job through the public link.
    let response = app
        .post_json(
            &format!("/requests/public/{}", link.token),
            &json!({
                "status": "completed",
                "comment_message": "Replaced trap",
                "name": "Alex",
                "phone": "555-123-4567"
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .get(&format!("/api/requests/{}", request.id), Some(&manager_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let completed: RequestDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(completed.status, "completed");
    assert!(completed.resolved_at.is_some());
    assert_eq!(completed.status_history.last().unwrap().status, "completed");

    // The external identity was synthesized from the phone digits.
    let pseudo_count: i64 = app
        .with_conn(|conn| {
            use fixit_backend::schema::users::dsl::*;
            Ok(users
                .filter(email.eq("5551234567@external.vendor"))
                .filter(role.eq("vendor"))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(pseudo_count, 1);

    let external_comments: i64 = app
        .with_conn(move |conn| {
            use fixit_backend::schema::comments::dsl::*;
            Ok(comments
                .filter(context_id.eq(request_id))
                .filter(is_external.eq(true))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(external_comments, 1);

    // Feedback is the creating tenant's, exactly once.
    let response = app
        .post_json(
            &format!("/api/requests/{}/feedback", request.id),
            &json!({ "rating": 5, "comment": "Fast!" }),
            Some(&tenant_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let with_feedback: RequestDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(with_feedback.feedback.as_ref().map(|f| f.rating), Some(5));

    let response = app
        .post_json(
            &format!("/api/requests/{}/feedback", request.id),
            &json!({ "rating": 1, "comment": "changed my mind" }),
            Some(&tenant_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The original rating survived the rejected second attempt.
    let response = app
        .get(&format!("/api/requests/{}", request.id), Some(&tenant_token))
        .await?;
    let unchanged: RequestDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(unchanged.feedback.as_ref().map(|f| f.rating), Some(5));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn manager_cannot_submit_feedback() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("mgr@example.com", "managerpw", "propertymanager").await?;
    let tenant_id = app.insert_user("ten@example.com", "tenantpw", "tenant").await?;
    let manager_token = app.login_token("mgr@example.com", "managerpw").await?;
    let tenant_token = app.login_token("ten@example.com", "tenantpw").await?;

    let response = app
        .post_json(
            "/api/properties",
            &json!({
                "name": "Elm Court",
                "street": "4 Elm St",
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
            &json!({ "property_id": property.id, "name": "1A" }),
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
                "title": "Broken heater",
                "description": "No heat in bedroom",
                "category": "hvac",
                "priority": "medium",
                "property_id": property.id,
                "unit_id": unit.id
            }),
            Some(&tenant_token),
        )
        .await?;
    let request: RequestDetail = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .post_json(
            "/api/vendors",
            &json!({ "name": "Heatworks", "specialty": "hvac" }),
            Some(&manager_token),
        )
        .await?;
    let vendor: VendorInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    let response = app
        .post_json(
            &format!("/api/requests/{}/assign", request.id),
            &json!({ "assignee_id": vendor.id, "assignee_kind": "Vendor" }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Skipping straight to completed is rejected by the state machine.
    let response = app
        .post_json(
            &format!("/api/requests/{}/status", request.id),
            &json!({ "status": "completed" }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            &format!("/api/requests/{}/status", request.id),
            &json!({ "status": "in_progress" }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .post_json(
            &format!("/api/requests/{}/status", request.id),
            &json!({ "status": "completed" }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            &format!("/api/requests/{}/feedback", request.id),
            &json!({ "rating": 4 }),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Verify then archive, management only.
    let response = app
        .post_json(
            &format!("/api/requests/{}/verify", request.id),
            &json!({}),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let verified: RequestDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(verified.status, "verified");

    let response = app
        .post_json(
            &format!("/api/requests/{}/archive", request.id),
            &json!({}),
            Some(&manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let archived: RequestDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(archived.status, "archived");

    app.cleanup().await?;
    Ok(())
}
