//! Postgres adapter for [`Store`].
//!
//! Uses sqlx with compile-time-unchecked queries (runtime-checked)
//! to avoid needing a live DB at compile time. Writes that produce more than
//! one row run in a single transaction and are durable when the call returns.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

use super::*;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply the bundled schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CivicError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Schema statements are all `IF NOT EXISTS`; safe on every restart.
    pub async fn migrate(&self) -> Result<(), CivicError> {
        sqlx::raw_sql(include_str!("../../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const USER_COLUMNS: &str = "id, username, constituency, role, is_active, created_at";
const NOTIFICATION_COLUMNS: &str = "id, user_id, message, is_read, post_id, group_id, created_at";
const POST_COLUMNS: &str = "id, title_of_the_post, content, owner_id, group_id, created_at";

#[async_trait]
impl Store for PgStore {
    async fn get_user(&self, id: i32) -> Result<Option<UserRow>, CivicError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn find_representative_for_constituency(
        &self,
        constituency: &str,
    ) -> Result<Option<UserRow>, CivicError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE role = 'mp' AND is_active AND constituency = $1
            ORDER BY id
            LIMIT 1
            "#
        ))
        .bind(constituency)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_message(
        &self,
        sender_id: i32,
        recipient_id: i32,
        content: &str,
        notice: &str,
    ) -> Result<(MessageRow, NotificationRow), CivicError> {
        let mut tx = self.pool.begin().await?;

        let message: MessageRow = sqlx::query_as(
            r#"
            INSERT INTO messages (sender_id, recipient_id, content)
            VALUES ($1, $2, $3)
            RETURNING id, sender_id, recipient_id, content, is_read, created_at
            "#,
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        let note = NewNotification::new(recipient_id, notice);
        let note = insert_notification(&mut *tx, &note).await?;

        tx.commit().await?;
        Ok((message, note))
    }

    async fn mark_message_read(
        &self,
        message_id: i32,
        reader_id: i32,
    ) -> Result<Option<MessageRow>, CivicError> {
        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            UPDATE messages SET is_read = TRUE
            WHERE id = $1 AND recipient_id = $2
            RETURNING id, sender_id, recipient_id, content, is_read, created_at
            "#,
        )
        .bind(message_id)
        .bind(reader_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_messages(
        &self,
        user_id: i32,
        constituency: Option<&str>,
    ) -> Result<Vec<MessageRow>, CivicError> {
        let rows: Vec<MessageRow> = match constituency {
            Some(constituency) => {
                sqlx::query_as(
                    r#"
                    SELECT m.id, m.sender_id, m.recipient_id, m.content, m.is_read, m.created_at
                    FROM messages m
                    JOIN users u ON u.id = m.sender_id
                    WHERE m.recipient_id = $1
                      AND u.constituency = $2
                      AND u.is_active
                    ORDER BY m.created_at, m.id
                    "#,
                )
                .bind(user_id)
                .bind(constituency)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, sender_id, recipient_id, content, is_read, created_at
                    FROM messages
                    WHERE sender_id = $1 OR recipient_id = $1
                    ORDER BY created_at, id
                    "#,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn create_notification(
        &self,
        new: &NewNotification,
    ) -> Result<NotificationRow, CivicError> {
        let mut conn = self.pool.acquire().await?;
        Ok(insert_notification(&mut *conn, new).await?)
    }

    async fn list_notifications(
        &self,
        user_id: i32,
        limit: i64,
        skip: i64,
    ) -> Result<(Vec<NotificationRow>, i64), CivicError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<NotificationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }

    async fn mark_notification_read(
        &self,
        id: i32,
        user_id: i32,
    ) -> Result<Option<NotificationRow>, CivicError> {
        let row: Option<NotificationRow> = sqlx::query_as(&format!(
            r#"
            UPDATE notifications SET is_read = TRUE
            WHERE id = $1 AND user_id = $2
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_post(&self, id: i32) -> Result<Option<PostRow>, CivicError> {
        let row: Option<PostRow> =
            sqlx::query_as(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn create_post(
        &self,
        new: &NewPost,
        recipients: &[i32],
        notice: &str,
    ) -> Result<(PostRow, Vec<NotificationRow>), CivicError> {
        let mut tx = self.pool.begin().await?;

        let post: PostRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO posts (title_of_the_post, content, owner_id, group_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(&new.title)
        .bind(&new.content)
        .bind(new.owner_id)
        .bind(new.group_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut notes = Vec::with_capacity(recipients.len());
        for &user_id in recipients {
            let mut note = NewNotification::new(user_id, notice).with_post(post.id);
            note.group_id = post.group_id;
            notes.push(insert_notification(&mut *tx, &note).await?);
        }

        tx.commit().await?;
        Ok((post, notes))
    }

    async fn create_comment(
        &self,
        post_id: i32,
        user_id: i32,
        content: &str,
        notice: Option<&NewNotification>,
    ) -> Result<(CommentRow, Option<NotificationRow>), CivicError> {
        let mut tx = self.pool.begin().await?;

        let comment: CommentRow = sqlx::query_as(
            r#"
            INSERT INTO comments (content, post_id, user_id)
            VALUES ($1, $2, $3)
            RETURNING id, content, post_id, user_id, created_at
            "#,
        )
        .bind(content)
        .bind(post_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let note = match notice {
            Some(new) => Some(insert_notification(&mut *tx, new).await?),
            None => None,
        };

        tx.commit().await?;
        Ok((comment, note))
    }

    async fn get_group(&self, id: i32) -> Result<Option<GroupRow>, CivicError> {
        let row: Option<GroupRow> =
            sqlx::query_as("SELECT id, name, owner_id FROM groups WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn group_member_ids(&self, group_id: i32) -> Result<Vec<i32>, CivicError> {
        let ids: Vec<i32> = sqlx::query_scalar(
            "SELECT user_id FROM group_members WHERE group_id = $1 ORDER BY user_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

async fn insert_notification(
    conn: &mut PgConnection,
    new: &NewNotification,
) -> Result<NotificationRow, sqlx::Error> {
    sqlx::query_as(&format!(
        r#"
        INSERT INTO notifications (user_id, message, post_id, group_id)
        VALUES ($1, $2, $3, $4)
        RETURNING {NOTIFICATION_COLUMNS}
        "#
    ))
    .bind(new.user_id)
    .bind(&new.message)
    .bind(new.post_id)
    .bind(new.group_id)
    .fetch_one(conn)
    .await
}
