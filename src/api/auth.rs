//! Sessions for staff users and customers, the auth endpoints and the
//! extractors that guard the rest of the API.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use metrics::counter;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::audit::{audit_log, ClientIp};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_whatsapp, validate_email, validate_name, validate_password, validate_whatsapp,
};
use crate::config::AuthConfig;
use crate::db::{
    actions, resource_types, AuditEntry, CreateUserRequest, Customer, CustomerResponse,
    ForgotPasswordRequest, LoginRequest, PrincipalKind, RegisterRequest, Session, User,
    UserResponse,
};
use crate::utils::{non_empty, now_rfc3339, to_rfc3339};
use crate::{AppState, DbPool};

pub const LOGIN_ATTEMPTS_TOTAL: &str = "oxistore_login_attempts_total";

const INVALID_CREDENTIALS: &str = "Invalid credentials";

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Only the SHA-256 of a token is stored
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bearer token first, then the session cookie
fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = header.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn create_session(
    db: &DbPool,
    kind: PrincipalKind,
    principal_id: &str,
    lifetime_hours: i64,
) -> Result<String, ApiError> {
    let token = generate_token();
    let expires_at = to_rfc3339(chrono::Utc::now() + chrono::Duration::hours(lifetime_hours.max(1)));

    sqlx::query(
        "INSERT INTO sessions (id, principal_type, principal_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(kind.as_str())
    .bind(principal_id)
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(now_rfc3339())
    .execute(db)
    .await?;

    Ok(token)
}

fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookie)
        .same_site(SameSite::Lax)
        .build()
}

/// The authenticated caller, whichever table they live in
#[derive(Debug, Clone)]
pub enum Principal {
    User(User),
    Customer(Customer),
}

impl Principal {
    pub fn id(&self) -> &str {
        match self {
            Principal::User(u) => &u.id,
            Principal::Customer(c) => &c.id,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::User(_) => PrincipalKind::User,
            Principal::Customer(_) => PrincipalKind::Customer,
        }
    }
}

/// Look up the live session for `token` and load its principal
pub async fn resolve_principal(db: &DbPool, token: &str) -> Result<Option<Principal>, ApiError> {
    let session: Option<Session> =
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(hash_token(token))
            .bind(now_rfc3339())
            .fetch_optional(db)
            .await?;

    let Some(session) = session else {
        return Ok(None);
    };

    let principal = match session.principal_type.parse::<PrincipalKind>() {
        Ok(PrincipalKind::User) => {
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ? AND is_active = 1")
                .bind(&session.principal_id)
                .fetch_optional(db)
                .await?
                .map(Principal::User)
        }
        Ok(PrincipalKind::Customer) => {
            sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ? AND is_active = 1")
                .bind(&session.principal_id)
                .fetch_optional(db)
                .await?
                .map(Principal::Customer)
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "Session with unknown principal type");
            None
        }
    };

    Ok(principal)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers, &state.config.auth.cookie_name)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        resolve_principal(&state.db, &token)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Session expired or invalid"))
    }
}

/// A logged-in customer (staff are rejected)
pub struct CurrentCustomer(pub Customer);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentCustomer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match Principal::from_request_parts(parts, state).await? {
            Principal::Customer(c) => Ok(CurrentCustomer(c)),
            Principal::User(_) => Err(ApiError::forbidden(
                "This action is only available to customers",
            )),
        }
    }
}

/// A logged-in staff member of any role
pub struct StaffUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match Principal::from_request_parts(parts, state).await? {
            Principal::User(u) => Ok(StaffUser(u)),
            Principal::Customer(_) => Err(ApiError::forbidden("Staff access required")),
        }
    }
}

/// A logged-in staff member with the admin role
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let StaffUser(user) = StaffUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden("Admin role required"));
        }
        Ok(AdminUser(user))
    }
}

/// Principal as reported to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionPrincipal {
    User(UserResponse),
    Customer(CustomerResponse),
}

impl From<Principal> for SessionPrincipal {
    fn from(p: Principal) -> Self {
        match p {
            Principal::User(u) => SessionPrincipal::User(u.into()),
            Principal::Customer(c) => SessionPrincipal::Customer(c.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub principal: SessionPrincipal,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<SessionPrincipal>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    let name = req.name.trim().to_string();
    let whatsapp = normalize_whatsapp(&req.whatsapp);
    let email = non_empty(req.email.clone().map(|e| e.trim().to_string()));

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_name(&name) {
        errors.add("name", e);
    }
    if req.whatsapp.trim().is_empty() {
        errors.add("whatsapp", "WhatsApp number is required");
    } else if let Err(e) = validate_whatsapp(&whatsapp) {
        errors.add("whatsapp", e);
    }
    if let Err(e) = validate_email(&email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&req.password) {
        errors.add("password", e);
    }
    if let Some(confirm) = &req.confirm_password {
        if confirm != &req.password {
            errors.add("confirm_password", "Passwords do not match");
        }
    }
    errors.finish()?;

    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM customers WHERE whatsapp = ?1 OR (?2 IS NOT NULL AND email = ?2)",
    )
    .bind(&whatsapp)
    .bind(&email)
    .fetch_one(&state.db)
    .await?;
    if taken > 0 {
        return Err(ApiError::conflict("WhatsApp number or email is already registered"));
    }

    let password_hash = hash_password(&req.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO customers (id, name, whatsapp, email, password_hash, last_login, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&name)
    .bind(&whatsapp)
    .bind(&email)
    .bind(&password_hash)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::info!(customer_id = %id, "Customer registered");

    let customer: Customer = sqlx::query_as("SELECT * FROM customers WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    let token = create_session(&state.db, PrincipalKind::Customer, &id, state.config.auth.session_hours).await?;
    let jar = jar.add(session_cookie(&state.config.auth, token.clone()));

    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            token,
            principal: Principal::Customer(customer).into(),
        }),
    ))
}

/// Find a principal whose password matches. Staff are checked before customers.
async fn authenticate(db: &DbPool, identifier: &str, password: &str) -> Result<Option<Principal>, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?1 OR name = ?1 LIMIT 1")
        .bind(identifier)
        .fetch_optional(db)
        .await?;

    if let Some(user) = user {
        if user.is_active && verify_password(password, &user.password_hash) {
            return Ok(Some(Principal::User(user)));
        }
        return Ok(None);
    }

    let customer: Option<Customer> = sqlx::query_as(
        "SELECT * FROM customers WHERE whatsapp = ?1 OR whatsapp = ?2 OR email = ?1 LIMIT 1",
    )
    .bind(identifier)
    .bind(normalize_whatsapp(identifier))
    .fetch_optional(db)
    .await?;

    Ok(customer
        .filter(|c| c.is_active)
        .filter(|c| {
            c.password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(password, hash))
        })
        .map(Principal::Customer))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let identifier: String = req.identifier.chars().filter(|c| !c.is_whitespace()).collect();

    let mut errors = ValidationErrorBuilder::new();
    if identifier.is_empty() {
        errors.add("identifier", "Username, WhatsApp number or email is required");
    }
    if req.password.is_empty() {
        errors.add("password", "Password is required");
    }
    errors.finish()?;

    let Some(principal) = authenticate(&state.db, &identifier, &req.password).await? else {
        counter!(LOGIN_ATTEMPTS_TOTAL, "result" => "failure").increment(1);
        tracing::info!("Failed login attempt");
        return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
    };
    counter!(LOGIN_ATTEMPTS_TOTAL, "result" => "success").increment(1);

    let now = now_rfc3339();
    let table = match principal.kind() {
        PrincipalKind::User => "users",
        PrincipalKind::Customer => "customers",
    };
    sqlx::query(&format!("UPDATE {} SET last_login = ? WHERE id = ?", table))
        .bind(&now)
        .bind(principal.id())
        .execute(&state.db)
        .await?;

    sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(&now)
        .execute(&state.db)
        .await?;

    let token = create_session(&state.db, principal.kind(), principal.id(), state.config.auth.session_hours).await?;

    if let Principal::User(user) = &principal {
        audit_log(
            &state,
            AuditEntry {
                action: actions::AUTH_LOGIN,
                resource_type: resource_types::USER,
                resource_id: Some(&user.id),
                resource_name: Some(&user.username),
                user_id: Some(&user.id),
                ip_address: ip.as_deref(),
                details: None,
            },
        )
        .await;
    }

    tracing::info!(principal = %principal.kind(), id = %principal.id(), "Login succeeded");

    let jar = jar.add(session_cookie(&state.config.auth, token.clone()));
    Ok((
        jar,
        Json(AuthResponse {
            token,
            principal: principal.into(),
        }),
    ))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    if let Some(token) = extract_token(&headers, &state.config.auth.cookie_name) {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(hash_token(&token))
            .execute(&state.db)
            .await?;
    }

    let jar = jar.remove(Cookie::build(state.config.auth.cookie_name.clone()).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

/// GET /api/auth/session
pub async fn session(principal: Option<Principal>) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: principal.is_some(),
        principal: principal.map(Into::into),
    })
}

/// POST /api/auth/forgot-password
///
/// Confirms the account exists; there is no delivery channel for reset links.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let identifier: String = req.identifier.chars().filter(|c| !c.is_whitespace()).collect();
    if identifier.is_empty() {
        return Err(ApiError::validation_field(
            "identifier",
            "WhatsApp number or email is required",
        ));
    }

    let known: i64 = sqlx::query_scalar(
        r#"
        SELECT (SELECT COUNT(*) FROM customers WHERE whatsapp = ?1 OR whatsapp = ?2 OR email = ?1)
             + (SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?1)
        "#,
    )
    .bind(&identifier)
    .bind(normalize_whatsapp(&identifier))
    .fetch_one(&state.db)
    .await?;

    if known == 0 {
        return Err(ApiError::not_found("No account found for that WhatsApp number or email"));
    }

    tracing::info!("Password reset requested");
    Ok(Json(MessageResponse {
        message: "Password reset instructions have been sent".to_string(),
    }))
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at ASC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// POST /api/admin/users: create a staff account or reset an existing one
pub async fn save_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if req.username.trim().is_empty() || req.username.chars().any(char::is_whitespace) {
        errors.add("username", "Username is required and may not contain spaces");
    }
    if let Err(e) = validate_name(&req.name) {
        errors.add("name", e);
    }
    if let Err(e) = validate_password(&req.password) {
        errors.add("password", e);
    }
    if let Err(e) = validate_email(&req.email) {
        errors.add("email", e);
    }
    errors.finish()?;

    let id = crate::db::upsert_staff_user(&state.db, req.username.trim(), req.name.trim(), &req.password, req.role).await?;
    sqlx::query("UPDATE users SET email = ?, phone = ? WHERE id = ?")
        .bind(non_empty(req.email.clone()))
        .bind(non_empty(req.phone.clone()))
        .bind(&id)
        .execute(&state.db)
        .await?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    audit_log(
        &state,
        AuditEntry {
            action: actions::USER_SAVE,
            resource_type: resource_types::USER,
            resource_id: Some(&user.id),
            resource_name: Some(&user.username),
            user_id: Some(&admin.id),
            ..Default::default()
        },
    )
    .await;

    Ok((StatusCode::OK, Json(user.into())))
}
