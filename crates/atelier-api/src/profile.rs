use axum::{Extension, Json, extract::State, response::IntoResponse};
use axum_extra::extract::WithRejection;

use atelier_db::format_timestamp;
use atelier_db::models::UserRow;
use atelier_types::api::{Claims, ProfileResponse, UpdateProfileRequest};
use atelier_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{blocking, parse_id};

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let user = blocking(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(profile_response(user)?))
}

/// Role and avatar are the only mutable profile fields.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateProfileRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let role = req.role.map(|r| r.as_str());
    let avatar_url = req.avatar_url.map(|url| url.trim().to_string());
    let now = format_timestamp(chrono::Utc::now());

    let user = blocking(&state, move |db| {
        if !db.update_user_profile(&uid, role, avatar_url.as_deref(), &now)? {
            return Ok(None);
        }
        db.get_user_by_id(&uid)
    })
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(profile_response(user)?))
}

pub(crate) fn parse_role(raw: &str) -> Result<Role, ApiError> {
    raw.parse()
        .map_err(|e: String| ApiError::Internal(anyhow::anyhow!(e)))
}

fn profile_response(user: UserRow) -> Result<ProfileResponse, ApiError> {
    Ok(ProfileResponse {
        id: parse_id(&user.id)?,
        role: parse_role(&user.role)?,
        name: user.name,
        email: user.email,
        avatar_url: user.avatar_url,
    })
}
