mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use common::{acquire_db_lock, body_to_vec, TestApp};
use diesel::prelude::*;
use fixit_backend::workers::scheduler::run_due_tasks;
use serde_json::json;
use uuid::Uuid;

#[derive(serde::Deserialize)]
struct PropertyInfo {
    id: Uuid,
}

#[derive(serde::Deserialize)]
struct ScheduleDetail {
    id: Uuid,
    status: String,
    next_due_date: Option<String>,
    occurrences_spawned: i32,
    generated_requests: Vec<Uuid>,
}

async fn schedule_state(app: &TestApp, task_id: Uuid, token: &str) -> Result<ScheduleDetail> {
    let response = app
        .get(&format!("/api/scheduled/{task_id}"), Some(token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(serde_json::from_slice(
        &body_to_vec(response.into_body()).await?,
    )?)
}

#[tokio::test]
async fn monthly_schedule_spawns_until_end_date() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("sched-mgr@example.com", "managerpw", "propertymanager").await?;
    let token = app.login_token("sched-mgr@example.com", "managerpw").await?;

    let response = app
        .post_json(
            "/api/properties",
            &json!({
                "name": "Birch Row",
                "street": "9 Birch Ave",
                "city": "Springfield",
                "state": "IL",
                "zip_code": "62704",
                "country": "USA"
            }),
            Some(&token),
        )
        .await?;
    let property: PropertyInfo =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    app.set_now(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap());

    let response = app
        .post_json(
            "/api/scheduled",
            &json!({
                "title": "HVAC filter swap",
                "description": "Replace intake filters",
                "category": "hvac",
                "priority": "medium",
                "property_id": property.id,
                "scheduled_date": "2024-01-15T09:00:00",
                "recurring": true,
                "frequency": {
                    "type": "monthly",
                    "interval": 1,
                    "end_date": "2024-04-30T00:00:00"
                }
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let schedule: ScheduleDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(schedule.status, "scheduled");
    assert!(schedule
        .next_due_date
        .as_deref()
        .unwrap()
        .starts_with("2024-01-15"));

    // Nothing is due before the scheduled date.
    app.set_now(Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap());
    assert_eq!(run_due_tasks(&app.state)?, 0);

    let expectations = [
        (Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(), "2024-02-15"),
        (Utc.with_ymd_and_hms(2024, 2, 15, 9, 0, 0).unwrap(), "2024-03-15"),
        (Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap(), "2024-04-15"),
    ];
    for (drive_to, expected_next) in expectations {
        app.set_now(drive_to);
        assert_eq!(run_due_tasks(&app.state)?, 1);
        let state = schedule_state(&app, schedule.id, &token).await?;
        assert_eq!(state.status, "scheduled");
        assert!(state
            .next_due_date
            .as_deref()
            .unwrap()
            .starts_with(expected_next));
    }

    // The April occurrence is the last one: May 15 falls past the end date,
    // so the schedule completes on this execution.
    app.set_now(Utc.with_ymd_and_hms(2024, 4, 15, 9, 0, 0).unwrap());
    assert_eq!(run_due_tasks(&app.state)?, 1);
    let state = schedule_state(&app, schedule.id, &token).await?;
    assert_eq!(state.status, "completed");
    assert_eq!(state.next_due_date, None);
    assert_eq!(state.occurrences_spawned, 4);
    assert_eq!(state.generated_requests.len(), 4);

    // Driving past the end spawns nothing further.
    app.set_now(Utc.with_ymd_and_hms(2024, 5, 15, 9, 0, 0).unwrap());
    assert_eq!(run_due_tasks(&app.state)?, 0);
    let state = schedule_state(&app, schedule.id, &token).await?;
    assert_eq!(state.status, "completed");

    // Each spawned request is a fresh `new` work item on the property.
    let pid = property.id;
    let spawned: i64 = app
        .with_conn(move |conn| {
            use fixit_backend::schema::maintenance_requests;
            Ok(maintenance_requests::table
                .filter(maintenance_requests::property_id.eq(pid))
                .filter(maintenance_requests::status.eq("new"))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(spawned, 4);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn paused_schedule_is_skipped() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("pause-mgr@example.com", "managerpw", "propertymanager").await?;
    let token = app.login_token("pause-mgr@example.com", "managerpw").await?;

    let response = app
        .post_json(
            "/api/properties",
            &json!({
                "name": "Cedar Flats",
                "street": "2 Cedar Ln",
                "city": "Springfield",
                "state": "IL",
                "zip_code": "62704",
                "country": "USA"
            }),
            Some(&token),
        )
        .await?;
    let property: PropertyInfo =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    app.set_now(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap());
    let response = app
        .post_json(
            "/api/scheduled",
            &json!({
                "title": "Gutter cleaning",
                "description": "Clear all downspouts",
                "category": "cleaning",
                "priority": "low",
                "property_id": property.id,
                "scheduled_date": "2024-06-10T09:00:00",
                "recurring": false
            }),
            Some(&token),
        )
        .await?;
    let schedule: ScheduleDetail =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let response = app
        .post_json(
            &format!("/api/scheduled/{}/status", schedule.id),
            &json!({ "status": "paused" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.set_now(Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap());
    assert_eq!(run_due_tasks(&app.state)?, 0);

    // Resume; the one-shot task executes and completes.
    let response = app
        .post_json(
            &format!("/api/scheduled/{}/status", schedule.id),
            &json!({ "status": "scheduled" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(run_due_tasks(&app.state)?, 1);
    let state = schedule_state(&app, schedule.id, &token).await?;
    assert_eq!(state.status, "completed");
    assert_eq!(state.occurrences_spawned, 1);

    app.cleanup().await?;
    Ok(())
}
