use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use ember_db::models::DirectMessageRow;
use ember_types::api::{Claims, ConversationSummary, DirectMessageResponse, Page, SendDirectMessageRequest};
use ember_types::models::{NotificationCategory, NotificationPayload};

use crate::error::{ApiError, ApiResult};
use crate::posts::validated_text;
use crate::state::AppState;

const MAX_MESSAGE_CHARS: usize = 2000;
const PREVIEW_CHARS: usize = 80;

fn message_response(row: DirectMessageRow) -> DirectMessageResponse {
    DirectMessageResponse {
        id: row.id,
        sender_id: row.sender_id,
        recipient_id: row.recipient_id,
        content: row.content,
        read: row.read,
        created_at: row.created_at,
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut cut: String = content.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendDirectMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.recipient_id == claims.sub {
        return Err(ApiError::bad_request("You cannot message yourself"));
    }
    let content = validated_text(&req.content, "Message", MAX_MESSAGE_CHARS)?;

    let message_id = Uuid::new_v4();
    let sender_id = claims.sub;
    let recipient_id = req.recipient_id;
    let message = state
        .blocking(move |db| {
            if db.get_user_by_id(recipient_id)?.is_none() {
                return Ok(None);
            }
            db.insert_direct_message(message_id, sender_id, recipient_id, &content)
                .map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    let payload = NotificationPayload::new(
        NotificationCategory::NewMessage,
        format!("Message from {}", claims.username),
        preview(&message.content),
    )
    .with_link(format!("/messages/{}", sender_id));
    state.notifier.dispatch(recipient_id, payload).await;

    Ok((StatusCode::CREATED, Json(message_response(message))))
}

/// Messages with one partner, oldest first. Reading marks the partner's
/// messages as read.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(partner_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<DirectMessageResponse>>> {
    let page = page.clamped();
    let user_id = claims.sub;
    let messages = state
        .blocking(move |db| {
            let messages = db.conversation(user_id, partner_id, page.limit, page.offset)?;
            db.mark_conversation_read(user_id, partner_id)?;
            Ok(messages)
        })
        .await?;
    Ok(Json(messages.into_iter().map(message_response).collect()))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let user_id = claims.sub;
    let conversations = state
        .blocking(move |db| db.conversations(user_id))
        .await?;
    Ok(Json(
        conversations
            .into_iter()
            .map(|row| ConversationSummary {
                partner: row.partner,
                last_message: message_response(row.last_message),
                unread: row.unread,
            })
            .collect(),
    ))
}
