use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use atelier_db::format_timestamp;
use atelier_db::models::{ConversationRow, MessageRow};
use atelier_types::api::{Claims, MessageResponse, SendMessageRequest};
use atelier_types::events::GatewayEvent;
use atelier_types::models::UserSummary;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{blocking, parse_id, parse_time};

const MAX_MESSAGE_LEN: usize = 2000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub conversation_id: Option<Uuid>,
    /// Only return messages created strictly after this instant. Lets a
    /// polling client fetch just what it has not seen yet. Compared at
    /// microsecond granularity: sub-microsecond digits are truncated, so
    /// pass back a `createdAt` from an earlier listing.
    pub after: Option<DateTime<Utc>>,
}

/// GET /messages: list a conversation oldest first. Marks it read for the
/// caller.
pub async fn get_messages(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MessageQuery>, ApiError>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = query
        .conversation_id
        .ok_or_else(|| ApiError::validation("conversationId is required"))?;

    load_as_participant(&state, conversation_id, &claims).await?;

    let cid = conversation_id.to_string();
    let uid = claims.sub.to_string();
    let after = query.after.map(format_timestamp);
    let (was_unread, rows) = blocking(&state, move |db| {
        let was_unread = db.mark_read(&cid, &uid)?;
        let rows = db.get_messages(&cid, after.as_deref())?;
        Ok((was_unread, rows))
    })
    .await?;

    if was_unread {
        // Other open sessions of the same user drop their badge
        state
            .dispatcher
            .send_to_user(
                claims.sub,
                GatewayEvent::UnreadUpdate {
                    conversation_id,
                    unread: false,
                },
            )
            .await;
    }

    let messages = rows
        .into_iter()
        .map(message_response)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(messages))
}

/// POST /messages: append to a conversation the caller takes part in.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::validation("text is required"));
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::validation(format!(
            "text cannot exceed {} characters",
            MAX_MESSAGE_LEN
        )));
    }

    let conversation_id = req.conversation_id;
    let convo = load_as_participant(&state, conversation_id, &claims).await?;

    let sender = claims.sub.to_string();
    let recipient = convo.other_participant(&sender).to_string();
    let message_id = Uuid::new_v4();
    let created_at = format_timestamp(Utc::now());

    let (mid, cid, sid, body, at) = (
        message_id.to_string(),
        convo.id.clone(),
        sender.clone(),
        text.clone(),
        created_at.clone(),
    );
    blocking(&state, move |db| db.insert_message(&mid, &cid, &sid, &body, &at)).await?;

    // The message is stored; a failed summary update leaves stale hints but
    // does not unsend it.
    let (cid, rid) = (convo.id.clone(), recipient.clone());
    let summary = blocking(&state, move |db| {
        db.update_conversation_summary(&cid, &sender, &rid, &text, &created_at)
    })
    .await;
    if let Err(e) = &summary {
        warn!("Conversation {} summary update failed: {}", convo.id, e);
    }

    let mid = message_id.to_string();
    let row = blocking(&state, move |db| db.get_message(&mid))
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("message {} missing after insert", message_id)))?;
    let message = message_response(row)?;

    debug!("{} sent message {} in {}", claims.sub, message_id, conversation_id);

    state.dispatcher.publish(GatewayEvent::MessageCreate {
        message: message.clone(),
    });
    if summary.is_ok() {
        state
            .dispatcher
            .send_to_user(
                parse_id(&recipient)?,
                GatewayEvent::UnreadUpdate {
                    conversation_id,
                    unread: true,
                },
            )
            .await;
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// Fetch a conversation, enforcing that the caller is one of its two
/// participants.
async fn load_as_participant(
    state: &AppState,
    conversation_id: Uuid,
    claims: &Claims,
) -> Result<ConversationRow, ApiError> {
    let cid = conversation_id.to_string();
    let convo = blocking(state, move |db| db.get_conversation(&cid))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;

    if !convo.has_participant(&claims.sub.to_string()) {
        return Err(ApiError::Forbidden);
    }

    Ok(convo)
}

fn message_response(row: MessageRow) -> Result<MessageResponse, ApiError> {
    Ok(MessageResponse {
        id: parse_id(&row.id)?,
        conversation_id: parse_id(&row.conversation_id)?,
        sender: UserSummary {
            id: parse_id(&row.sender_id)?,
            name: row.sender_name,
            avatar_url: row.sender_avatar_url,
        },
        text: row.text,
        created_at: parse_time(&row.created_at)?,
    })
}
