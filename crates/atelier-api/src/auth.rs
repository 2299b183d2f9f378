use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::WithRejection;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use atelier_db::{Database, format_timestamp};
use atelier_gateway::dispatcher::Dispatcher;
use atelier_types::api::{Claims, LoginRequest, LoginResponse, SignupRequest, SignupResponse};
use atelier_types::models::Role;

use crate::blocking;
use crate::error::ApiError;
use crate::profile::parse_role;

/// Session tokens are valid for 30 days.
const TOKEN_TTL_DAYS: i64 = 30;

const MIN_PASSWORD_LEN: usize = 6;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
}

pub async fn signup(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<SignupRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();

    if name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::validation("a valid email is required"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let lookup = email.clone();
    if blocking(&state, move |db| db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(duplicate_email());
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let role = req.role;
    let avatar_url = req.avatar_url.unwrap_or_default().trim().to_string();
    let now = format_timestamp(chrono::Utc::now());

    let (uid, uname, uemail) = (user_id.to_string(), name.clone(), email);
    let created = blocking(&state, move |db| {
        db.create_user(&uid, &uname, &uemail, Some(&password_hash), role.as_str(), &avatar_url, &now)
    })
    .await?;
    // A concurrent signup can claim the email between the lookup and here
    if !created {
        return Err(duplicate_email());
    }

    info!("New {} account {} ({})", role, name, user_id);

    let token = create_token(&state.jwt_secret, user_id, &name, role)?;

    Ok((StatusCode::CREATED, Json(SignupResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = blocking(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    // Accounts created through an external provider have no password
    let stored = user.password.as_deref().ok_or(ApiError::Unauthenticated)?;
    let parsed_hash = PasswordHash::new(stored)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash for {}: {}", user.id, e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthenticated)?;

    let user_id = crate::parse_id(&user.id)?;
    let role = parse_role(&user.role)?;

    let token = create_token(&state.jwt_secret, user_id, &user.name, role)?;

    Ok(Json(LoginResponse {
        user_id,
        name: user.name,
        role,
        token,
    }))
}

fn duplicate_email() -> ApiError {
    ApiError::Conflict("a user with this email already exists".into())
}

pub fn create_token(secret: &str, user_id: Uuid, name: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
