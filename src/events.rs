//! Event producers. Durable write first, then live push.
//!
//! Each producer writes its rows through the [`Store`] and only then hands
//! the equivalent payloads to a [`Dispatcher`]. A failed write returns early
//! with nothing pushed; a failed push is invisible to the caller.

use tracing::info;

use crate::auth::UserIdentity;
use crate::db::{
    CommentRow, MessageRow, NewNotification, NewPost, NotificationRow, PostRow, Role, Store,
    UserRow,
};
use crate::dispatch::Dispatcher;
use crate::error::CivicError;
use crate::types::{ChatPush, NotificationPush, ReadReceiptPush, Recipient, ServerEvent};

fn notification_event(row: &NotificationRow) -> ServerEvent {
    ServerEvent::Notification(NotificationPush::from(row))
}

/// Rejects blank input. Accepted text is stored as sent.
fn non_empty(value: &str, field: &str) -> Result<(), CivicError> {
    if value.trim().is_empty() {
        return Err(CivicError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Resolve a chat recipient to an active user.
pub async fn resolve_recipient(
    store: &dyn Store,
    recipient: &Recipient,
) -> Result<UserRow, CivicError> {
    let user = match recipient {
        Recipient::User(id) => store.get_user(*id).await?,
        Recipient::Constituency(name) => store.find_representative_for_constituency(name).await?,
    }
    .ok_or(CivicError::NotFound("recipient"))?;

    if !user.is_active {
        return Err(CivicError::Forbidden("recipient is suspended".into()));
    }
    Ok(user)
}

/// Direct message: Message row + "message received" notification, then the
/// chat push and the notification push to the recipient.
pub async fn message_sent(
    store: &dyn Store,
    chat: &Dispatcher,
    notifications: &Dispatcher,
    sender: &UserIdentity,
    recipient: &Recipient,
    content: &str,
) -> Result<MessageRow, CivicError> {
    non_empty(content, "content")?;
    let recipient = resolve_recipient(store, recipient).await?;

    let (message, note) = store
        .create_message(
            sender.id,
            recipient.id,
            content,
            &format!("New message from {}", sender.username),
        )
        .await?;

    let delivery = chat
        .push(recipient.id, &ServerEvent::Chat(ChatPush::from(&message)))
        .await;
    notifications.push(recipient.id, &notification_event(&note)).await;

    info!(
        message_id = message.id,
        sender_id = sender.id,
        recipient_id = recipient.id,
        ?delivery,
        "message sent"
    );
    Ok(message)
}

/// Recipient read a message: flag it, tell the sender.
pub async fn message_read(
    store: &dyn Store,
    chat: &Dispatcher,
    reader: &UserIdentity,
    message_id: i32,
) -> Result<MessageRow, CivicError> {
    let message = store
        .mark_message_read(message_id, reader.id)
        .await?
        .ok_or(CivicError::NotFound("message"))?;

    chat.push(
        message.sender_id,
        &ServerEvent::ReadReceipt(ReadReceiptPush {
            message_id: message.id,
            reader_id: reader.id,
        }),
    )
    .await;
    Ok(message)
}

/// New comment: the post owner hears about it unless they wrote it.
pub async fn comment_created(
    store: &dyn Store,
    notifications: &Dispatcher,
    author: &UserIdentity,
    post_id: i32,
    content: &str,
) -> Result<CommentRow, CivicError> {
    non_empty(content, "content")?;
    let post = store
        .get_post(post_id)
        .await?
        .ok_or(CivicError::NotFound("post"))?;

    let notice = (post.owner_id != author.id).then(|| {
        NewNotification::new(
            post.owner_id,
            format!(
                "New comment on your post '{}' by {}",
                post.title, author.username
            ),
        )
        .with_post(post.id)
    });
    let (comment, note) = store
        .create_comment(post.id, author.id, content, notice.as_ref())
        .await?;

    if let Some(note) = note {
        notifications
            .push(note.user_id, &notification_event(&note))
            .await;
    }

    Ok(comment)
}

/// New post. In a group, the author must be a member and every other member
/// gets a notification row, then a push.
pub async fn post_created(
    store: &dyn Store,
    notifications: &Dispatcher,
    author: &UserIdentity,
    new: NewPost,
) -> Result<PostRow, CivicError> {
    if author.role == Role::Admin {
        return Err(CivicError::Forbidden("admins cannot create posts".into()));
    }
    non_empty(&new.title, "title")?;
    non_empty(&new.content, "content")?;

    let group = match new.group_id {
        Some(group_id) => {
            let group = store
                .get_group(group_id)
                .await?
                .ok_or(CivicError::NotFound("group"))?;
            let members = store.group_member_ids(group.id).await?;
            if !members.contains(&author.id) {
                return Err(CivicError::Forbidden(
                    "you must be a group member to post in this group".into(),
                ));
            }
            Some((group, members))
        }
        None => None,
    };

    let new = NewPost {
        owner_id: author.id,
        ..new
    };

    let Some((group, members)) = group else {
        let (post, _) = store.create_post(&new, &[], "").await?;
        return Ok(post);
    };

    let recipients: Vec<i32> = members.into_iter().filter(|m| *m != author.id).collect();
    let (post, notes) = store
        .create_post(
            &new,
            &recipients,
            &format!(
                "New post '{}' in group '{}' by {}",
                new.title, group.name, author.username
            ),
        )
        .await?;

    let pushes: Vec<_> = notes
        .iter()
        .map(|note| (note.user_id, notification_event(note)))
        .collect();
    let outcomes = notifications.fanout(&pushes).await;
    info!(
        post_id = post.id,
        group_id = group.id,
        recipients = outcomes.len(),
        "group post fan-out"
    );
    Ok(post)
}

/// A post shared with one user.
pub async fn content_shared(
    store: &dyn Store,
    notifications: &Dispatcher,
    sharer: &UserIdentity,
    post_id: i32,
    recipient_id: i32,
) -> Result<NotificationRow, CivicError> {
    let post = store
        .get_post(post_id)
        .await?
        .ok_or(CivicError::NotFound("post"))?;
    let recipient = resolve_recipient(store, &Recipient::User(recipient_id)).await?;

    let note = store
        .create_notification(
            &NewNotification::new(
                recipient.id,
                format!("{} shared the post '{}' with you", sharer.username, post.title),
            )
            .with_post(post.id),
        )
        .await?;
    notifications
        .push(recipient.id, &notification_event(&note))
        .await;
    Ok(note)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    use crate::db::MemoryStore;
    use crate::registry::{ConnectionHandle, ConnectionRegistry};

    struct Harness {
        store: Arc<MemoryStore>,
        chat: Dispatcher,
        notifications: Dispatcher,
    }

    impl Harness {
        fn new() -> Self {
            let dispatcher = |name| {
                Dispatcher::new(
                    Arc::new(ConnectionRegistry::new(name)),
                    Duration::from_millis(50),
                )
            };
            Self {
                store: Arc::new(MemoryStore::new()),
                chat: dispatcher("chat"),
                notifications: dispatcher("notifications"),
            }
        }

        fn user(&self, name: &str) -> UserIdentity {
            self.store.add_user(name, Role::Citizen, "Gulu").into()
        }

        async fn post(&self, owner: &UserIdentity, title: &str) -> PostRow {
            let new = NewPost {
                owner_id: owner.id,
                title: title.into(),
                content: "x".into(),
                group_id: None,
            };
            self.store.create_post(&new, &[], "").await.unwrap().0
        }

        fn connect(d: &Dispatcher, user_id: i32) -> mpsc::Receiver<Message> {
            let (tx, rx) = mpsc::channel(8);
            d.registry().register(user_id, ConnectionHandle::new(tx));
            rx
        }
    }

    fn json(msg: Message) -> serde_json::Value {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_to_offline_user_is_still_stored() {
        let h = Harness::new();
        let a = h.user("a");
        let b = h.user("b");

        let msg = message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::User(b.id),
            "hello",
        )
        .await
        .unwrap();

        assert_eq!(msg.sender_id, a.id);
        assert_eq!(msg.recipient_id, b.id);
        assert_eq!(h.store.messages().len(), 1);
        assert_eq!(h.store.notifications_for(b.id).len(), 1);
    }

    #[tokio::test]
    async fn message_push_reaches_only_recipient() {
        let h = Harness::new();
        let a = h.user("a");
        let b = h.user("b");
        let c = h.user("c");
        let mut rx_b = Harness::connect(&h.chat, b.id);
        let mut rx_c = Harness::connect(&h.chat, c.id);

        message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::User(b.id),
            "hello",
        )
        .await
        .unwrap();

        let push = json(rx_b.recv().await.unwrap());
        assert_eq!(push["sender_id"], a.id);
        assert_eq!(push["content"], "hello");
        assert!(push["created_at"].is_string());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn constituency_message_routes_to_mp() {
        let h = Harness::new();
        let a = h.user("a");
        let mp = h.store.add_user("mp", Role::Mp, "Gulu");

        let msg = message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::Constituency("Gulu".into()),
            "roads",
        )
        .await
        .unwrap();
        assert_eq!(msg.recipient_id, mp.id);

        let err = message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::Constituency("Nowhere".into()),
            "roads",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CivicError::NotFound("recipient")));
    }

    #[tokio::test]
    async fn suspended_recipient_is_rejected() {
        let h = Harness::new();
        let a = h.user("a");
        let b = h.user("b");
        h.store.set_active(b.id, false);

        let err = message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::User(b.id),
            "hi",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CivicError::Forbidden(_)));
        assert!(h.store.messages().is_empty());
    }

    #[tokio::test]
    async fn failed_write_skips_push() {
        let h = Harness::new();
        let a = h.user("a");
        let b = h.user("b");
        let mut rx_b = Harness::connect(&h.chat, b.id);
        h.store.set_failing(true);

        let err = message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::User(b.id),
            "hi",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CivicError::Unavailable(_)));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn comment_notifies_owner_but_not_self() {
        let h = Harness::new();
        let owner = h.user("owner");
        let other = h.user("other");
        let post = h.post(&owner, "Budget").await;
        let mut rx = Harness::connect(&h.notifications, owner.id);

        comment_created(&*h.store, &h.notifications, &owner, post.id, "mine")
            .await
            .unwrap();
        assert!(h.store.notifications_for(owner.id).is_empty());
        assert!(rx.try_recv().is_err());

        comment_created(&*h.store, &h.notifications, &other, post.id, "nice")
            .await
            .unwrap();
        let rows = h.store.notifications_for(owner.id);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "New comment on your post 'Budget' by other");

        let push = json(rx.recv().await.unwrap());
        assert_eq!(push["type"], "notification");
        assert_eq!(push["id"], rows[0].id);
        assert_eq!(push["post_id"], post.id);
    }

    #[tokio::test]
    async fn group_post_fans_out_to_other_members() {
        let h = Harness::new();
        let author = h.user("author");
        let m1 = h.user("m1");
        let m2 = h.user("m2");
        let m3 = h.user("m3");
        let group = h.store.add_group("Roads", author.id, &[m1.id, m2.id, m3.id]);
        let mut rx1 = Harness::connect(&h.notifications, m1.id);
        let mut rx3 = Harness::connect(&h.notifications, m3.id);
        let mut rx_author = Harness::connect(&h.notifications, author.id);

        let post = post_created(
            &*h.store,
            &h.notifications,
            &author,
            NewPost {
                owner_id: author.id,
                title: "Potholes".into(),
                content: "Main street".into(),
                group_id: Some(group.id),
            },
        )
        .await
        .unwrap();

        for member in [&m1, &m2, &m3] {
            let rows = h.store.notifications_for(member.id);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].group_id, Some(group.id));
            assert_eq!(rows[0].post_id, Some(post.id));
        }
        assert!(h.store.notifications_for(author.id).is_empty());

        assert_eq!(json(rx1.recv().await.unwrap())["group_id"], group.id);
        assert_eq!(json(rx3.recv().await.unwrap())["group_id"], group.id);
        assert!(rx_author.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_member_cannot_post_in_group() {
        let h = Harness::new();
        let owner = h.user("owner");
        let outsider = h.user("outsider");
        let group = h.store.add_group("Roads", owner.id, &[]);

        let err = post_created(
            &*h.store,
            &h.notifications,
            &outsider,
            NewPost {
                owner_id: outsider.id,
                title: "Hi".into(),
                content: "there".into(),
                group_id: Some(group.id),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CivicError::Forbidden(_)));
    }

    #[tokio::test]
    async fn read_receipt_goes_to_sender() {
        let h = Harness::new();
        let a = h.user("a");
        let b = h.user("b");
        let (msg, _) = h.store.create_message(a.id, b.id, "hi", "ping").await.unwrap();
        let mut rx_a = Harness::connect(&h.chat, a.id);

        message_read(&*h.store, &h.chat, &b, msg.id).await.unwrap();

        let push = json(rx_a.recv().await.unwrap());
        assert_eq!(push["type"], "read_receipt");
        assert_eq!(push["message_id"], msg.id);
        assert_eq!(push["reader_id"], b.id);

        let err = message_read(&*h.store, &h.chat, &a, msg.id).await.unwrap_err();
        assert!(matches!(err, CivicError::NotFound("message")));
    }

    #[tokio::test]
    async fn share_notifies_recipient() {
        let h = Harness::new();
        let a = h.user("a");
        let b = h.user("b");
        let post = h.post(&a, "Budget").await;
        let mut rx_b = Harness::connect(&h.notifications, b.id);

        let note = content_shared(&*h.store, &h.notifications, &a, post.id, b.id)
            .await
            .unwrap();
        assert_eq!(note.message, "a shared the post 'Budget' with you");
        assert_eq!(json(rx_b.recv().await.unwrap())["id"], note.id);
    }

    #[tokio::test]
    async fn rejected_notice_rolls_back_message_and_pushes_nothing() {
        let h = Harness::new();
        let a = h.user("a");
        let b = h.user("b");
        let mut rx_chat = Harness::connect(&h.chat, b.id);
        let mut rx_notes = Harness::connect(&h.notifications, b.id);
        h.store.reject_notifications_for(b.id);

        message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::User(b.id),
            "hi",
        )
        .await
        .unwrap_err();

        assert!(h.store.messages().is_empty());
        assert!(rx_chat.try_recv().is_err());
        assert!(rx_notes.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_member_notice_leaves_no_partial_group_post() {
        let h = Harness::new();
        let author = h.user("author");
        let m1 = h.user("m1");
        let m2 = h.user("m2");
        let group = h.store.add_group("Roads", author.id, &[m1.id, m2.id]);
        let mut rx1 = Harness::connect(&h.notifications, m1.id);
        h.store.reject_notifications_for(m2.id);

        post_created(
            &*h.store,
            &h.notifications,
            &author,
            NewPost {
                owner_id: author.id,
                title: "Potholes".into(),
                content: "Main street".into(),
                group_id: Some(group.id),
            },
        )
        .await
        .unwrap_err();

        // Nothing committed, so nothing to push and nothing for a retry to
        // duplicate.
        assert!(h.store.posts().is_empty());
        assert!(h.store.notifications_for(m1.id).is_empty());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_owner_notice_rolls_back_comment() {
        let h = Harness::new();
        let owner = h.user("owner");
        let other = h.user("other");
        let post = h.post(&owner, "Budget").await;
        h.store.reject_notifications_for(owner.id);

        comment_created(&*h.store, &h.notifications, &other, post.id, "nice")
            .await
            .unwrap_err();
        assert!(h.store.comments().is_empty());
    }

    #[tokio::test]
    async fn text_is_stored_as_sent() {
        let h = Harness::new();
        let a = h.user("a");
        let b = h.user("b");

        let msg = message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::User(b.id),
            "  spaced out  ",
        )
        .await
        .unwrap();
        assert_eq!(msg.content, "  spaced out  ");

        let post = post_created(
            &*h.store,
            &h.notifications,
            &a,
            NewPost {
                owner_id: a.id,
                title: " Title ".into(),
                content: "body\n".into(),
                group_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(post.title, " Title ");
        assert_eq!(post.content, "body\n");

        let comment = comment_created(&*h.store, &h.notifications, &b, post.id, " ok ")
            .await
            .unwrap();
        assert_eq!(comment.content, " ok ");

        let err = message_sent(
            &*h.store,
            &h.chat,
            &h.notifications,
            &a,
            &Recipient::User(b.id),
            "   ",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CivicError::BadRequest(_)));
    }
}
