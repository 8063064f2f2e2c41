use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use fixit_backend::auth::jwt::JwtService;
use fixit_backend::auth::password::hash_password;
use fixit_backend::clock::FixedClock;
use fixit_backend::config::AppConfig;
use fixit_backend::db::{self, PgPool};
use fixit_backend::mailer::NoopMailer;
use fixit_backend::models::NewUser;
use fixit_backend::routes;
use fixit_backend::sms::NoopSmsSender;
use fixit_backend::state::AppState;
use fixit_backend::storage::{ObjectPut, ObjectStorage};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

// Tests share one database; each takes the lock for its whole scenario.
static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

/// In-memory stand-in for the object store.
#[derive(Default)]
pub struct FakeStorage {
    objects: StdMutex<HashMap<String, ObjectPut>>,
}

impl FakeStorage {
    #[allow(dead_code)]
    pub fn object_count(&self) -> usize {
        self.objects.lock().expect("storage poisoned").len()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn store(&self, put: ObjectPut) -> Result<()> {
        self.objects
            .lock()
            .expect("storage poisoned")
            .insert(put.key.clone(), put);
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String> {
        let guard = self.objects.lock().expect("storage poisoned");
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!("https://fake-storage/{key}?ttl={}", ttl.as_secs()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.objects.lock().expect("storage poisoned").remove(key);
        Ok(())
    }
}

fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        refresh_token_expiry_days: 30,
        refresh_cookie_secure: false,
        refresh_cookie_domain: None,
        cors_allowed_origin: None,
        frontend_base_url: "http://localhost:5173".to_string(),
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: "test-bucket".to_string(),
        email_api_url: None,
        email_api_key: None,
        email_from: "no-reply@test.example".to_string(),
        sms_api_url: None,
        sms_api_key: None,
        sms_from: None,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;
        let config = test_config(database_url);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(
            pool,
            config,
            storage.clone(),
            Arc::new(NoopMailer),
            Arc::new(NoopSmsSender),
            clock.clone(),
            jwt,
        );

        Ok(Self {
            router: routes::create_router(state.clone()),
            state,
            clock,
            storage,
        })
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    pub async fn insert_user(&self, email: &str, password: &str, role: &str) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let local = email.split('@').next().unwrap_or("user").to_string();
            let user = NewUser {
                id: Uuid::new_v4(),
                first_name: local,
                last_name: "Test".to_string(),
                email,
                phone: Some("5550000000".to_string()),
                password_hash: hash_password(&password)?,
                role,
                registration_status: "active".to_string(),
                notification_preferences: json!({}),
            };
            diesel::insert_into(fixit_backend::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/auth/login",
                &json!({ "email": email, "password": password }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        #[derive(serde::Deserialize)]
        struct Session {
            access_token: String,
        }
        let session: Session = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
        Ok(session.access_token)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<Response<Body>> {
        self.send(Method::POST, path, Some(serde_json::to_vec(payload)?), token)
            .await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<Response<Body>> {
        self.send(Method::PATCH, path, Some(serde_json::to_vec(payload)?), token)
            .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<Response<Body>> {
        self.send(Method::GET, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<Response<Body>> {
        self.send(Method::DELETE, path, None, token).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE audit_logs, comments, generated_requests, jobs, lease_amendments, \
         media, notifications, property_users, refresh_tokens, rents, scheduled_tasks, \
         status_history, unit_tenants, maintenance_requests, leases, units, properties, \
         vendors, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")
}
