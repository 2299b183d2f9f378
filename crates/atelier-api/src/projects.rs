use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use atelier_db::format_timestamp;
use atelier_db::models::ProjectRow;
use atelier_types::api::{Claims, CreateProjectRequest, ProjectResponse, SelectDesignerRequest};
use atelier_types::models::{ProjectStatus, Role};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::profile::parse_role;
use crate::{blocking, parse_id, parse_time};

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 2000;

/// POST /projects: a client posts a project; designers are selected later.
pub async fn create_project(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<CreateProjectRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim().to_string();
    let description = req.description.trim().to_string();

    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::validation(format!(
            "title must be between 1 and {} characters",
            MAX_TITLE_LEN
        )));
    }
    if description.is_empty() || description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ApiError::validation(format!(
            "description must be between 1 and {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    if !req.budget.is_finite() || req.budget < 0.0 {
        return Err(ApiError::validation("budget must be a non-negative number"));
    }

    // Role comes from storage, not the token: it may have changed since login
    let uid = claims.sub.to_string();
    let user = blocking(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    if parse_role(&user.role)? != Role::Client {
        return Err(ApiError::Forbidden);
    }

    let project_id = Uuid::new_v4();
    let (pid, cid) = (project_id.to_string(), user.id);
    let budget = req.budget;
    let now = format_timestamp(chrono::Utc::now());

    let row = blocking(&state, move |db| {
        db.create_project(&pid, &cid, &title, &description, budget, &now)?;
        db.get_project(&pid)
    })
    .await?
    .ok_or(ApiError::NotFound("project"))?;

    info!("{} posted project {}", claims.sub, project_id);

    Ok((StatusCode::CREATED, Json(project_response(row)?)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let pid = project_id.to_string();
    let row = blocking(&state, move |db| db.get_project(&pid))
        .await?
        .ok_or(ApiError::NotFound("project"))?;

    Ok(Json(project_response(row)?))
}

/// POST /projects/{id}/select: the owning client picks a designer, which
/// moves the project to in_progress.
pub async fn select_designer(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<SelectDesignerRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let pid = project_id.to_string();
    let project = blocking(&state, move |db| db.get_project(&pid))
        .await?
        .ok_or(ApiError::NotFound("project"))?;

    if project.client_id != claims.sub.to_string() {
        return Err(ApiError::Forbidden);
    }

    let did = req.designer_id.to_string();
    let designer = blocking(&state, move |db| db.get_user_by_id(&did))
        .await?
        .ok_or(ApiError::NotFound("designer"))?;
    if parse_role(&designer.role)? != Role::Designer {
        return Err(ApiError::validation("selected user is not a designer"));
    }

    let (pid, did) = (project.id, designer.id);
    let now = format_timestamp(chrono::Utc::now());
    let row = blocking(&state, move |db| {
        if !db.select_designer(&pid, &did, &now)? {
            return Ok(Err(ApiError::Conflict("project is not open".into())));
        }
        Ok(Ok(db.get_project(&pid)?))
    })
    .await??
    .ok_or(ApiError::NotFound("project"))?;

    info!("{} selected designer {} for project {}", claims.sub, req.designer_id, project_id);

    Ok(Json(project_response(row)?))
}

fn project_response(row: ProjectRow) -> Result<ProjectResponse, ApiError> {
    let status: ProjectStatus = row
        .status
        .parse()
        .map_err(|e: String| ApiError::Internal(anyhow::anyhow!(e)))?;

    Ok(ProjectResponse {
        id: parse_id(&row.id)?,
        client_id: parse_id(&row.client_id)?,
        designer_id: row.designer_id.as_deref().map(parse_id).transpose()?,
        title: row.title,
        description: row.description,
        budget: row.budget,
        status,
        created_at: parse_time(&row.created_at)?,
    })
}
