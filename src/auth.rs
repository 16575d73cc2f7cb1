use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::user::{Role, WebUser},
    state::AppState,
};

pub const SESSION_COOKIE: &str = "fahrtenbuch_session";
pub const API_KEY_HEADER: &str = "x-api-key";

/// How a caller proved who they are. The privileged key is what vehicles and
/// back-office tooling use; it bypasses the edit window's soft-delete rule
/// (hard delete) but nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    Session,
    AdminKey,
    DriverKey,
}

/// Caller identity as consumed by the core: resolved once, before any trip
/// logic runs. An unrecognized role in the database resolves to `role: None`
/// and therefore sees nothing.
#[derive(Debug, Clone)]
pub struct Identity {
    pub role: Option<Role>,
    pub vehicle_id: Option<String>,
    pub credential: Credential,
    pub username: String,
}

impl Identity {
    pub fn admin_key() -> Self {
        Self {
            role: Some(Role::Admin),
            vehicle_id: None,
            credential: Credential::AdminKey,
            username: "api-key:admin".into(),
        }
    }

    pub fn driver_key() -> Self {
        Self {
            role: None,
            vehicle_id: None,
            credential: Credential::DriverKey,
            username: "api-key:driver".into(),
        }
    }

    pub fn from_user(user: &WebUser) -> Self {
        Self {
            role: Role::parse(&user.role),
            vehicle_id: user.vehicle_id.clone(),
            credential: Credential::Session,
            username: user.username.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }

    pub fn is_admin_key(&self) -> bool {
        self.credential == Credential::AdminKey
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("admin access required".into()))
        }
    }
}

/// Extractor mirroring the original `authenticateSessionOrApiKey` middleware:
/// an `x-api-key` header wins, otherwise the private session cookie is
/// resolved against the sessions table.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(identity) = identity_from_api_key(parts, state) {
            return Ok(Self(identity));
        }

        let jar: PrivateCookieJar = parts
            .extract_with_state(state)
            .await
            .map_err(|_| AppError::Unauthorized)?;
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Err(AppError::Unauthorized);
        };
        let user = load_session_user(state, cookie.value()).await?;
        Ok(Self(Identity::from_user(&user)))
    }
}

fn identity_from_api_key(parts: &Parts, state: &AppState) -> Option<Identity> {
    let presented = parts.headers.get(API_KEY_HEADER)?.to_str().ok()?;
    if state.config.admin_api_key.as_deref() == Some(presented) {
        return Some(Identity::admin_key());
    }
    if state.config.driver_api_key.as_deref() == Some(presented) {
        return Some(Identity::driver_key());
    }
    None
}

async fn load_session_user(state: &AppState, session_id: &str) -> Result<WebUser, AppError> {
    let row = sqlx::query(
        "SELECT user_id, expires_at FROM sessions WHERE id = ?1",
    )
    .bind(session_id)
    .fetch_optional(&state.db)
    .await?;
    let Some(row) = row else {
        return Err(AppError::Unauthorized);
    };
    if let Some(expires_at) = row.get::<Option<chrono::DateTime<Utc>>, _>("expires_at") {
        if expires_at < Utc::now() {
            return Err(AppError::Unauthorized);
        }
    }
    let user_id: i64 = row.get("user_id");

    let user = sqlx::query_as::<_, WebUser>(
        "SELECT id, uuid, username, email, password_hash, role, vehicle_id, created_at, last_login_at FROM users WHERE id = ?1",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::Unauthorized)?;

    sqlx::query("UPDATE sessions SET last_seen_at = ?1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(session_id)
        .execute(&state.db)
        .await?;

    Ok(user)
}

pub async fn authenticate_user(
    state: &AppState,
    identifier: &str,
    password: &str,
) -> Result<WebUser, AppError> {
    let user = sqlx::query_as::<_, WebUser>(
        "SELECT id, uuid, username, email, password_hash, role, vehicle_id, created_at, last_login_at FROM users WHERE username = ?1 OR email = ?1",
    )
    .bind(identifier)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::Unauthorized)?;

    let parsed = PasswordHash::new(&user.password_hash).map_err(|_| AppError::Unauthorized)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::Unauthorized)?;

    sqlx::query("UPDATE users SET last_login_at = ?1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(user)
}

pub async fn create_web_user(
    state: &AppState,
    username: &str,
    email: &str,
    password: &str,
    role: Role,
    vehicle_id: Option<String>,
) -> Result<WebUser, AppError> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(AppError::Validation("username and password required".into()));
    }
    if role == Role::Manager && vehicle_id.is_none() {
        return Err(AppError::Validation(
            "a manager must be associated with a vehicle".into(),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| AppError::Other(anyhow::anyhow!("password hashing failed: {err}")))?
        .to_string();

    let uuid = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (uuid, username, email, password_hash, role, vehicle_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&uuid)
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .bind(role.as_str())
    .bind(&vehicle_id)
    .bind(now)
    .execute(&state.db)
    .await?;

    let user = sqlx::query_as::<_, WebUser>(
        "SELECT id, uuid, username, email, password_hash, role, vehicle_id, created_at, last_login_at FROM users WHERE uuid = ?1",
    )
    .bind(&uuid)
    .fetch_one(&state.db)
    .await?;

    Ok(user)
}

pub async fn create_session(state: &AppState, user_id: i64) -> Result<String, AppError> {
    let session_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO sessions (id, user_id, created_at, last_seen_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&session_id)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(&state.db)
    .await?;
    Ok(session_id)
}

pub async fn destroy_session(state: &AppState, session_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?1")
        .bind(session_id)
        .execute(&state.db)
        .await?;
    Ok(())
}

pub fn apply_session_cookie(jar: PrivateCookieJar, session_id: &str) -> PrivateCookieJar {
    let cookie = Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/").build())
}
