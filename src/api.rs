//! REST surface: the event-producing endpoints and the history reads a
//! reconnecting client uses to catch up.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::db::{CommentRow, MessageRow, NewPost, NotificationRow, PostRow, Role};
use crate::error::CivicError;
use crate::events;
use crate::state::AppState;
use crate::types::Recipient;

// ═══════════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub recipient_id: Option<i32>,
    pub constituency: Option<String>,
    pub content: String,
}

/// POST /messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<MessageCreate>,
) -> Result<(StatusCode, Json<MessageRow>), CivicError> {
    let recipient = Recipient::from_parts(body.recipient_id, body.constituency)
        .map_err(|e| CivicError::BadRequest(e.to_string()))?;
    let message = events::message_sent(
        state.store.as_ref(),
        &state.chat,
        &state.notifications,
        &user,
        &recipient,
        &body.content,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub constituency: Option<String>,
}

/// GET /messages. An MP may narrow to one constituency's senders.
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<MessageRow>>, CivicError> {
    let constituency = query.constituency.as_deref().filter(|_| user.role == Role::Mp);
    let rows = state.store.list_messages(user.id, constituency).await?;
    Ok(Json(rows))
}

// ═══════════════════════════════════════════════════════════════
// Notifications
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub skip: i64,
}

fn default_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total_count: i64,
    pub limit: i64,
    pub skip: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationPage {
    pub data: Vec<NotificationRow>,
    pub pagination: Pagination,
}

/// GET /notifications?limit=&skip=
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<NotificationPage>, CivicError> {
    if page.limit < 1 || page.skip < 0 {
        return Err(CivicError::BadRequest("limit must be positive and skip non-negative".into()));
    }
    let (data, total_count) = state
        .store
        .list_notifications(user.id, page.limit, page.skip)
        .await?;

    let PageQuery { limit, skip } = page;
    let next = (skip + limit < total_count)
        .then(|| format!("/notifications?limit={limit}&skip={}", skip + limit));
    let previous = (skip > 0)
        .then(|| format!("/notifications?limit={limit}&skip={}", (skip - limit).max(0)));

    Ok(Json(NotificationPage {
        data,
        pagination: Pagination {
            total_count,
            limit,
            skip,
            next,
            previous,
        },
    }))
}

/// PATCH /notifications/{id}/read
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i32>,
) -> Result<Json<NotificationRow>, CivicError> {
    state
        .store
        .mark_notification_read(id, user.id)
        .await?
        .map(Json)
        .ok_or(CivicError::NotFound("notification"))
}

// ═══════════════════════════════════════════════════════════════
// Posts, comments, shares
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct PostCreate {
    pub title: String,
    pub content: String,
    pub group_id: Option<i32>,
}

/// POST /posts
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<PostCreate>,
) -> Result<(StatusCode, Json<PostRow>), CivicError> {
    let post = events::post_created(
        state.store.as_ref(),
        &state.notifications,
        &user,
        NewPost {
            owner_id: user.id,
            title: body.title,
            content: body.content,
            group_id: body.group_id,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

#[derive(Debug, Deserialize)]
pub struct CommentCreate {
    pub content: String,
}

/// POST /posts/{post_id}/comments
pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(post_id): Path<i32>,
    Json(body): Json<CommentCreate>,
) -> Result<(StatusCode, Json<CommentRow>), CivicError> {
    let comment = events::comment_created(
        state.store.as_ref(),
        &state.notifications,
        &user,
        post_id,
        &body.content,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(Debug, Deserialize)]
pub struct ShareCreate {
    pub recipient_id: i32,
}

/// POST /posts/{post_id}/share
pub async fn share_post(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(post_id): Path<i32>,
    Json(body): Json<ShareCreate>,
) -> Result<(StatusCode, Json<NotificationRow>), CivicError> {
    let note = events::content_shared(
        state.store.as_ref(),
        &state.notifications,
        &user,
        post_id,
        body.recipient_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(note)))
}
