use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use atelier_db::format_timestamp;
use atelier_types::api::{Claims, ConversationIdResponse, ConversationSummary};
use atelier_types::models::{Role, UserSummary};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::profile::parse_role;
use crate::{blocking, parse_id, parse_time};

/// Who the caller wants to talk to. The first selector present wins, in
/// field order.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveQuery {
    pub designer_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

enum Target {
    User { id: Uuid, role: Role },
    Project(Uuid),
}

impl ResolveQuery {
    fn target(&self) -> Option<Target> {
        if let Some(id) = self.designer_id {
            Some(Target::User { id, role: Role::Designer })
        } else if let Some(id) = self.client_id {
            Some(Target::User { id, role: Role::Client })
        } else {
            self.project_id.map(Target::Project)
        }
    }
}

/// GET /conversations: find or create the caller's conversation with a
/// user or with the other party of a project.
pub async fn resolve_conversation(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<ResolveQuery>, ApiError>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let target = query
        .target()
        .ok_or_else(|| ApiError::validation("designerId, clientId or projectId is required"))?;

    let (other, project_id) = match target {
        Target::User { id, role } => {
            if id == claims.sub {
                return Err(ApiError::validation("cannot start a conversation with yourself"));
            }

            let tid = id.to_string();
            let user = blocking(&state, move |db| db.get_user_by_id(&tid))
                .await?
                .ok_or(ApiError::NotFound("user"))?;
            if parse_role(&user.role)? != role {
                return Err(ApiError::validation(format!("target user is not a {}", role)));
            }

            (user.id, None)
        }
        Target::Project(project_id) => {
            let pid = project_id.to_string();
            let project = blocking(&state, move |db| db.get_project(&pid))
                .await?
                .ok_or(ApiError::NotFound("project"))?;

            let designer_id = project
                .designer_id
                .ok_or_else(|| ApiError::validation("project has no selected designer"))?;

            let me = claims.sub.to_string();
            let other = if project.client_id == me {
                designer_id
            } else if designer_id == me {
                project.client_id
            } else {
                return Err(ApiError::Forbidden);
            };

            (other, Some(project.id))
        }
    };

    let candidate = Uuid::new_v4().to_string();
    let me = claims.sub.to_string();
    let now = format_timestamp(chrono::Utc::now());
    let other_log = other.clone();
    let (conversation_id, created) = blocking(&state, move |db| {
        db.resolve_conversation(&candidate, &me, &other, project_id.as_deref(), &now)
    })
    .await?;

    if created {
        info!("Created conversation {} between {} and {}", conversation_id, claims.sub, other_log);
    }

    Ok(Json(ConversationIdResponse {
        conversation_id: parse_id(&conversation_id)?,
    }))
}

/// GET /conversations/mine: the caller's conversations, most recent first,
/// each with the other participant and the caller's unread flag.
pub async fn list_my_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let rows = blocking(&state, move |db| db.list_conversations_for_user(&uid)).await?;

    let conversations = rows
        .into_iter()
        .map(|row| {
            Ok(ConversationSummary {
                id: parse_id(&row.id)?,
                project_id: row.project_id.as_deref().map(parse_id).transpose()?,
                last_message: row.last_message,
                updated_at: parse_time(&row.updated_at)?,
                other_participant: UserSummary {
                    id: parse_id(&row.other_id)?,
                    name: row.other_name,
                    avatar_url: row.other_avatar_url,
                },
                unread: row.unread,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(Json(conversations))
}
