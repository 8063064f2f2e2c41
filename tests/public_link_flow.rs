mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, TimeZone, Utc};
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde_json::json;
use uuid::Uuid;

#[derive(serde::Deserialize)]
struct PropertyInfo {
    id: Uuid,
}

#[derive(serde::Deserialize)]
struct RequestDetail {
    id: Uuid,
}

#[derive(serde::Deserialize)]
struct PublicLink {
    token: String,
}

#[derive(serde::Deserialize)]
struct PublicView {
    title: String,
    address: PublicAddress,
    comments: Vec<PublicComment>,
}

#[derive(serde::Deserialize)]
struct PublicAddress {
    street: String,
}

#[derive(serde::Deserialize)]
struct PublicComment {
    message: String,
}

async fn seed_request(app: &TestApp, token: &str) -> Result<(Uuid, Uuid)> {
    let response = app
        .post_json(
            "/api/properties",
            &json!({
                "name": "Willow Park",
                "street": "77 Willow Way",
                "city": "Springfield",
                "state": "IL",
                "zip_code": "62704",
                "country": "USA"
            }),
            Some(token),
        )
        .await?;
    let property: PropertyInfo =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "title": "Hallway light out",
                "description": "Second floor landing",
                "category": "electrical",
                "priority": "low",
                "property_id": property.id
            }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let request: RequestDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    Ok((property.id, request.id))
}

#[tokio::test]
async fn public_reads_are_sanitized_and_expire() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("link-mgr@example.com", "managerpw", "propertymanager").await?;
    let token = app.login_token("link-mgr@example.com", "managerpw").await?;

    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    app.set_now(base);

    let (_property_id, request_id) = seed_request(&app, &token).await?;

    // One internal note and one regular comment on the request.
    let response = app
        .post_json(
            "/api/comments",
            &json!({
                "context_type": "request",
                "context_id": request_id,
                "message": "Tenant was difficult on the phone",
                "is_internal_note": true
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let response = app
        .post_json(
            "/api/comments",
            &json!({
                "context_type": "request",
                "context_id": request_id,
                "message": "Scheduled for Tuesday",
                "is_internal_note": false
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // A read without any link fails closed.
    let response = app.get("/requests/public/deadbeef", None).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_json(
            &format!("/api/requests/{request_id}/public-link"),
            &json!({ "expires_in_days": 1 }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let link: PublicLink = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .get(&format!("/requests/public/{}", link.token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let view: PublicView = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(view.title, "Hallway light out");
    assert_eq!(view.address.street, "77 Willow Way");
    // The internal note never crosses the public boundary.
    assert_eq!(view.comments.len(), 1);
    assert_eq!(view.comments[0].message, "Scheduled for Tuesday");

    // 25 hours later the one-day link is dead.
    app.set_now(base + Duration::hours(25));
    let response = app
        .get(&format!("/requests/public/{}", link.token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Disabled links fail even when unexpired.
    app.set_now(base);
    let response = app
        .delete(&format!("/api/requests/{request_id}/public-link"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app
        .get(&format!("/requests/public/{}", link.token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Re-enabling keeps the token, so previously shared URLs work again.
    let response = app
        .post_json(
            &format!("/api/requests/{request_id}/public-link"),
            &json!({}),
            Some(&token),
        )
        .await?;
    let renewed: PublicLink = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(renewed.token, link.token);

    let response = app
        .get(&format!("/requests/public/{}", link.token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Explicit rotation invalidates the old URL.
    let response = app
        .post_json(
            &format!("/api/requests/{request_id}/public-link"),
            &json!({ "rotate": true }),
            Some(&token),
        )
        .await?;
    let rotated: PublicLink = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_ne!(rotated.token, link.token);
    let response = app
        .get(&format!("/requests/public/{}", link.token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn public_update_requires_identity() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("ident-mgr@example.com", "managerpw", "propertymanager").await?;
    let token = app.login_token("ident-mgr@example.com", "managerpw").await?;
    app.set_now(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

    let (_property_id, request_id) = seed_request(&app, &token).await?;
    let response = app
        .post_json(
            &format!("/api/requests/{request_id}/public-link"),
            &json!({}),
            Some(&token),
        )
        .await?;
    let link: PublicLink = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .post_json(
            &format!("/requests/public/{}", link.token),
            &json!({ "comment_message": "anonymous drive-by", "name": "", "phone": "555" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Status values outside the external whitelist are rejected.
    let response = app
        .post_json(
            &format!("/requests/public/{}", link.token),
            &json!({ "status": "verified", "name": "Alex", "phone": "5551234567" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
