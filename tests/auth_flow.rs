mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde_json::json;

#[tokio::test]
async fn login_round_trip_and_me() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("auth@example.com", "correct-horse", "landlord").await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "auth@example.com", "password": "wrong" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = app.login_token("auth@example.com", "correct-horse").await?;

    let response = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let me: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(me["email"], "auth@example.com");
    assert_eq!(me["role"], "landlord");

    // Protected surface rejects missing credentials.
    let response = app.get("/api/requests", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deactivated_accounts_cannot_login() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let admin_id = app.insert_user("root@example.com", "adminpw", "admin").await?;
    let victim_id = app.insert_user("bye@example.com", "byepw", "tenant").await?;
    let admin_token = app.login_token("root@example.com", "adminpw").await?;
    let _ = admin_id;

    let response = app
        .delete(&format!("/api/users/{victim_id}"), Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "bye@example.com", "password": "byepw" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
