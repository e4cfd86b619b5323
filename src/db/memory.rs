//! In-process adapter for [`Store`].
//!
//! Same contract as the Postgres adapter, held in a mutex-guarded set of
//! tables. Used by the integration tests and for running the server without
//! a database. The seed helpers (`add_user`, `add_group`, ...) stand in for
//! the registration and group CRUD that live outside this crate.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::*;

#[derive(Default)]
struct Tables {
    next_id: i32,
    users: HashMap<i32, UserRow>,
    groups: HashMap<i32, GroupRow>,
    members: HashMap<i32, Vec<i32>>,
    posts: HashMap<i32, PostRow>,
    comments: Vec<CommentRow>,
    messages: Vec<MessageRow>,
    notifications: Vec<NotificationRow>,
    /// Users whose notification inserts fail.
    unreachable: HashSet<i32>,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    /// Fails before anything is written if any recipient is unreachable.
    fn check_recipients(&self, recipients: &[i32]) -> Result<(), CivicError> {
        match recipients.iter().find(|id| self.unreachable.contains(*id)) {
            Some(id) => Err(CivicError::Unavailable(format!(
                "notification insert rejected for user {id}"
            ))),
            None => Ok(()),
        }
    }

    fn insert_notification(&mut self, new: &NewNotification) -> NotificationRow {
        let row = NotificationRow {
            id: self.next_id(),
            user_id: new.user_id,
            message: new.message.clone(),
            is_read: false,
            post_id: new.post_id,
            group_id: new.group_id,
            created_at: Utc::now(),
        };
        self.notifications.push(row.clone());
        row
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While set, every write fails as if the database were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), CivicError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CivicError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    /// Make every notification insert for `user_id` fail, taking the rest of
    /// its transaction down with it.
    pub fn reject_notifications_for(&self, user_id: i32) {
        self.tables().unreachable.insert(user_id);
    }

    pub fn add_user(&self, username: &str, role: Role, constituency: &str) -> UserRow {
        let mut t = self.tables();
        let row = UserRow {
            id: t.next_id(),
            username: username.into(),
            constituency: constituency.into(),
            role: role.as_str().into(),
            is_active: true,
            created_at: Utc::now(),
        };
        t.users.insert(row.id, row.clone());
        row
    }

    pub fn set_active(&self, user_id: i32, active: bool) {
        if let Some(user) = self.tables().users.get_mut(&user_id) {
            user.is_active = active;
        }
    }

    /// Create a group owned by `owner_id`; the owner is always a member.
    pub fn add_group(&self, name: &str, owner_id: i32, members: &[i32]) -> GroupRow {
        let mut t = self.tables();
        let row = GroupRow {
            id: t.next_id(),
            name: name.into(),
            owner_id,
        };
        let mut ids = vec![owner_id];
        ids.extend(members.iter().copied().filter(|m| *m != owner_id));
        t.members.insert(row.id, ids);
        t.groups.insert(row.id, row.clone());
        row
    }

    pub fn messages(&self) -> Vec<MessageRow> {
        self.tables().messages.clone()
    }

    pub fn notifications_for(&self, user_id: i32) -> Vec<NotificationRow> {
        self.tables()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn comments(&self) -> Vec<CommentRow> {
        self.tables().comments.clone()
    }

    pub fn posts(&self) -> Vec<PostRow> {
        let mut posts: Vec<_> = self.tables().posts.values().cloned().collect();
        posts.sort_by_key(|p| p.id);
        posts
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: i32) -> Result<Option<UserRow>, CivicError> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn find_representative_for_constituency(
        &self,
        constituency: &str,
    ) -> Result<Option<UserRow>, CivicError> {
        let t = self.tables();
        Ok(t.users
            .values()
            .filter(|u| u.is_active && u.role() == Role::Mp && u.constituency == constituency)
            .min_by_key(|u| u.id)
            .cloned())
    }

    async fn create_message(
        &self,
        sender_id: i32,
        recipient_id: i32,
        content: &str,
        notice: &str,
    ) -> Result<(MessageRow, NotificationRow), CivicError> {
        self.check_writable()?;
        let mut t = self.tables();
        t.check_recipients(&[recipient_id])?;

        let message = MessageRow {
            id: t.next_id(),
            sender_id,
            recipient_id,
            content: content.into(),
            is_read: false,
            created_at: Utc::now(),
        };
        t.messages.push(message.clone());
        let note = t.insert_notification(&NewNotification::new(recipient_id, notice));
        Ok((message, note))
    }

    async fn mark_message_read(
        &self,
        message_id: i32,
        reader_id: i32,
    ) -> Result<Option<MessageRow>, CivicError> {
        self.check_writable()?;
        let mut t = self.tables();
        Ok(t.messages
            .iter_mut()
            .find(|m| m.id == message_id && m.recipient_id == reader_id)
            .map(|m| {
                m.is_read = true;
                m.clone()
            }))
    }

    async fn list_messages(
        &self,
        user_id: i32,
        constituency: Option<&str>,
    ) -> Result<Vec<MessageRow>, CivicError> {
        let t = self.tables();
        let rows = t
            .messages
            .iter()
            .filter(|m| match constituency {
                Some(c) => {
                    m.recipient_id == user_id
                        && t.users
                            .get(&m.sender_id)
                            .is_some_and(|u| u.is_active && u.constituency == c)
                }
                None => m.sender_id == user_id || m.recipient_id == user_id,
            })
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn create_notification(
        &self,
        new: &NewNotification,
    ) -> Result<NotificationRow, CivicError> {
        self.check_writable()?;
        let mut t = self.tables();
        t.check_recipients(&[new.user_id])?;
        Ok(t.insert_notification(new))
    }

    async fn list_notifications(
        &self,
        user_id: i32,
        limit: i64,
        skip: i64,
    ) -> Result<(Vec<NotificationRow>, i64), CivicError> {
        let mut rows = self.notifications_for(user_id);
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        let total = rows.len() as i64;
        let page = rows
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        Ok((page, total))
    }

    async fn mark_notification_read(
        &self,
        id: i32,
        user_id: i32,
    ) -> Result<Option<NotificationRow>, CivicError> {
        self.check_writable()?;
        let mut t = self.tables();
        Ok(t.notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
            .map(|n| {
                n.is_read = true;
                n.clone()
            }))
    }

    async fn get_post(&self, id: i32) -> Result<Option<PostRow>, CivicError> {
        Ok(self.tables().posts.get(&id).cloned())
    }

    async fn create_post(
        &self,
        new: &NewPost,
        recipients: &[i32],
        notice: &str,
    ) -> Result<(PostRow, Vec<NotificationRow>), CivicError> {
        self.check_writable()?;
        let mut t = self.tables();
        t.check_recipients(recipients)?;

        let post = PostRow {
            id: t.next_id(),
            title: new.title.clone(),
            content: new.content.clone(),
            owner_id: new.owner_id,
            group_id: new.group_id,
            created_at: Utc::now(),
        };
        t.posts.insert(post.id, post.clone());

        let notes = recipients
            .iter()
            .map(|&user_id| {
                let mut note = NewNotification::new(user_id, notice).with_post(post.id);
                note.group_id = post.group_id;
                t.insert_notification(&note)
            })
            .collect();
        Ok((post, notes))
    }

    async fn create_comment(
        &self,
        post_id: i32,
        user_id: i32,
        content: &str,
        notice: Option<&NewNotification>,
    ) -> Result<(CommentRow, Option<NotificationRow>), CivicError> {
        self.check_writable()?;
        let mut t = self.tables();
        if let Some(new) = notice {
            t.check_recipients(&[new.user_id])?;
        }

        let comment = CommentRow {
            id: t.next_id(),
            content: content.into(),
            post_id,
            user_id,
            created_at: Utc::now(),
        };
        t.comments.push(comment.clone());
        let note = notice.map(|new| t.insert_notification(new));
        Ok((comment, note))
    }

    async fn get_group(&self, id: i32) -> Result<Option<GroupRow>, CivicError> {
        Ok(self.tables().groups.get(&id).cloned())
    }

    async fn group_member_ids(&self, group_id: i32) -> Result<Vec<i32>, CivicError> {
        Ok(self
            .tables()
            .members
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }
}
