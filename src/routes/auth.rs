use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    audit::{self, Actor, AuditEntry},
    auth::{password, AuthenticatedUser, RequestMeta},
    config::AppConfig,
    enums::{AuditAction, RegistrationStatus, ResourceKind},
    error::{AppError, AppResult},
    models::{NewRefreshToken, RefreshToken, User},
    schema::{refresh_tokens, users},
    state::AppState,
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<SessionResponse>)> {
    let mut conn = state.db()?;

    let user: User = users::table
        .filter(users::email.eq(payload.email.trim().to_lowercase()))
        .first(&mut conn)
        .map_err(|_| AppError::unauthorized())?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    // Suspended, deactivated, and never-activated accounts keep their
    // credentials but cannot open sessions.
    if !user.is_active || user.registration_status != RegistrationStatus::Active.as_str() {
        return Err(AppError::unauthorized());
    }

    let session = open_session(&state, &mut conn, &user)?;

    audit::record(
        &mut conn,
        &meta,
        AuditEntry::success(
            Actor::User(user.id),
            AuditAction::Login,
            ResourceKind::User,
            user.id,
        ),
    );

    Ok(session)
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<SessionResponse>)> {
    let presented = refresh_cookie_value(&jar).ok_or_else(AppError::unauthorized)?;
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let token: RefreshToken = refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(hash_refresh_token(&presented)))
        .filter(refresh_tokens::revoked_at.is_null())
        .filter(refresh_tokens::expires_at.gt(now))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    // Rotation: the presented token is burned and a fresh one is issued.
    diesel::update(refresh_tokens::table.find(token.id))
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let user: User = users::table.find(token.user_id).first(&mut conn)?;
    if !user.is_active {
        return Err(AppError::unauthorized());
    }

    open_session(&state, &mut conn, &user)
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    // Burn the presented token when there is one; otherwise every live
    // session for this account.
    let burned = match refresh_cookie_value(&jar) {
        Some(presented) => diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::token_hash.eq(hash_refresh_token(&presented)))
                .filter(refresh_tokens::user_id.eq(user.user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .unwrap_or(0),
        None => 0,
    };
    if burned == 0 {
        let _ = diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user.user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(&mut conn);
    }

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, clear_cookie(&state.config));
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

/// Mint an access token plus a fresh refresh token for `user`, returning the
/// response pair every session-opening path shares.
fn open_session(
    state: &AppState,
    conn: &mut PgConnection,
    user: &User,
) -> AppResult<(HeaderMap, Json<SessionResponse>)> {
    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, &user.role)
        .map_err(AppError::from)?;

    let issued_at = Utc::now();
    let expires_at = issued_at + ChronoDuration::days(state.config.refresh_token_expiry_days);
    let refresh_value = {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_refresh_token(&refresh_value),
            issued_at: issued_at.naive_utc(),
            expires_at: expires_at.naive_utc(),
        })
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        session_cookie(&state.config, &refresh_value, expires_at),
    );

    Ok((
        headers,
        Json(SessionResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
        }),
    ))
}

fn refresh_cookie_value(jar: &Option<TypedHeader<Cookie>>) -> Option<String> {
    jar.as_ref()?
        .get(REFRESH_COOKIE_NAME)
        .map(|value| value.to_string())
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn cookie_header(config: &AppConfig, value: &str, attributes: &[String]) -> HeaderValue {
    let mut parts = vec![
        format!("{REFRESH_COOKIE_NAME}={value}"),
        "Path=/".to_string(),
        "HttpOnly".to_string(),
        "SameSite=Strict".to_string(),
    ];
    parts.extend_from_slice(attributes);
    if config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    if let Some(domain) = &config.refresh_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }
    HeaderValue::from_str(&parts.join("; ")).expect("valid refresh cookie")
}

fn session_cookie(config: &AppConfig, token: &str, expires_at: DateTime<Utc>) -> HeaderValue {
    let max_age = ChronoDuration::days(config.refresh_token_expiry_days).num_seconds();
    cookie_header(
        config,
        token,
        &[
            format!("Max-Age={max_age}"),
            format!("Expires={}", expires_at.to_rfc2822()),
        ],
    )
}

fn clear_cookie(config: &AppConfig) -> HeaderValue {
    cookie_header(
        config,
        "",
        &[
            "Max-Age=0".to_string(),
            "Expires=Thu, 01 Jan 1970 00:00:00 GMT".to_string(),
        ],
    )
}
