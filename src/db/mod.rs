//! Persistence gateway.
//!
//! Every durable write the fan-out path depends on goes through [`Store`].
//! A write returns only after it is committed, so anything pushed live
//! afterwards is already visible to a history fetch.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CivicError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ═══════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════

/// Account roles (matches Postgres CHECK constraint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Citizen,
    Mp,
    Admin,
    Journalist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Mp => "mp",
            Self::Admin => "admin",
            Self::Journalist => "journalist",
        }
    }

    /// Unknown values fall back to the least privileged role.
    pub fn parse(s: &str) -> Self {
        match s {
            "mp" => Self::Mp,
            "admin" => Self::Admin,
            "journalist" => Self::Journalist,
            _ => Self::Citizen,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i32,
    pub username: String,
    pub constituency: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i32,
    pub sender_id: i32,
    pub recipient_id: i32,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: i32,
    pub user_id: i32,
    pub message: String,
    pub is_read: bool,
    pub post_id: Option<i32>,
    pub group_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Store::create_notification`] and [`Store::create_comment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: i32,
    pub message: String,
    pub post_id: Option<i32>,
    pub group_id: Option<i32>,
}

impl NewNotification {
    pub fn new(user_id: i32, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            post_id: None,
            group_id: None,
        }
    }

    pub fn with_post(mut self, post_id: i32) -> Self {
        self.post_id = Some(post_id);
        self
    }

    pub fn with_group(mut self, group_id: i32) -> Self {
        self.group_id = Some(group_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PostRow {
    pub id: i32,
    #[sqlx(rename = "title_of_the_post")]
    pub title: String,
    pub content: String,
    pub owner_id: i32,
    pub group_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Store::create_post`].
#[derive(Debug, Clone)]
pub struct NewPost {
    pub owner_id: i32,
    pub title: String,
    pub content: String,
    pub group_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CommentRow {
    pub id: i32,
    pub content: String,
    pub post_id: i32,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupRow {
    pub id: i32,
    pub name: String,
    pub owner_id: i32,
}

// ═══════════════════════════════════════════════════════════════
// Gateway
// ═══════════════════════════════════════════════════════════════

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, id: i32) -> Result<Option<UserRow>, CivicError>;

    /// `false` for unknown users as well as suspended ones.
    async fn is_user_active(&self, id: i32) -> Result<bool, CivicError> {
        Ok(self.get_user(id).await?.is_some_and(|u| u.is_active))
    }

    /// The active MP registered for `constituency`, if any.
    async fn find_representative_for_constituency(
        &self,
        constituency: &str,
    ) -> Result<Option<UserRow>, CivicError>;

    /// A Message row and the recipient's `notice` notification, committed
    /// together or not at all.
    async fn create_message(
        &self,
        sender_id: i32,
        recipient_id: i32,
        content: &str,
        notice: &str,
    ) -> Result<(MessageRow, NotificationRow), CivicError>;

    /// Mark a message read, but only if `reader_id` is its recipient.
    async fn mark_message_read(
        &self,
        message_id: i32,
        reader_id: i32,
    ) -> Result<Option<MessageRow>, CivicError>;

    /// Conversations `user_id` takes part in. With `constituency` set, only
    /// messages addressed to `user_id` from active users of that constituency.
    async fn list_messages(
        &self,
        user_id: i32,
        constituency: Option<&str>,
    ) -> Result<Vec<MessageRow>, CivicError>;

    async fn create_notification(
        &self,
        new: &NewNotification,
    ) -> Result<NotificationRow, CivicError>;

    /// Newest first, plus the total count for pagination.
    async fn list_notifications(
        &self,
        user_id: i32,
        limit: i64,
        skip: i64,
    ) -> Result<(Vec<NotificationRow>, i64), CivicError>;

    async fn mark_notification_read(
        &self,
        id: i32,
        user_id: i32,
    ) -> Result<Option<NotificationRow>, CivicError>;

    async fn get_post(&self, id: i32) -> Result<Option<PostRow>, CivicError>;

    /// A post plus one `notice` notification per recipient, each pointing
    /// at the new post and its group. All rows commit together.
    async fn create_post(
        &self,
        new: &NewPost,
        recipients: &[i32],
        notice: &str,
    ) -> Result<(PostRow, Vec<NotificationRow>), CivicError>;

    /// A comment and, optionally, the post owner's notification, committed
    /// together.
    async fn create_comment(
        &self,
        post_id: i32,
        user_id: i32,
        content: &str,
        notice: Option<&NewNotification>,
    ) -> Result<(CommentRow, Option<NotificationRow>), CivicError>;

    async fn get_group(&self, id: i32) -> Result<Option<GroupRow>, CivicError>;

    async fn group_member_ids(&self, group_id: i32) -> Result<Vec<i32>, CivicError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_known_values() {
        for role in [Role::Citizen, Role::Mp, Role::Admin, Role::Journalist] {
            assert_eq!(Role::parse(role.as_str()), role);
        }
        assert_eq!(Role::parse("overlord"), Role::Citizen);
    }

    #[test]
    fn new_notification_builder() {
        let n = NewNotification::new(3, "hi").with_post(8).with_group(2);
        assert_eq!(n.user_id, 3);
        assert_eq!(n.post_id, Some(8));
        assert_eq!(n.group_id, Some(2));
    }
}
