//! Chat messages between an ad's owner and interested users.
//!
//! Messages are persisted first and then pushed through the
//! [`ChatHub`](crate::services::ChatHub). A client may attach its own id to a message
//! so that a retried send returns the stored row instead of a duplicate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    AppState,
    error::{ApiError, ApiResult},
    handlers::data::SendMessageRequest,
    models::{Conversation, MESSAGE_COLUMNS, Message, PublicUser},
    services::{AdService, ChatEvent, NotificationKind},
};

/// Most messages returned for one thread.
pub const THREAD_LIMIT: i64 = 500;
/// Most messages replayed when a stream reconnects.
pub const BACKLOG_LIMIT: i64 = 500;
const PREVIEW_CHARS: usize = 80;

/// One row per `(ad, other user)` thread: its latest message, the unread
/// count from the other side, and the ad's title and cover image.
const INBOX_SQL: &str = "\
    WITH mine AS ( \
        SELECT m.*, CASE WHEN m.sender_id = $1 THEN m.receiver_id ELSE m.sender_id END AS other_user_id \
        FROM messages m WHERE m.sender_id = $1 OR m.receiver_id = $1 \
    ), latest AS ( \
        SELECT DISTINCT ON (ad_id, other_user_id) ad_id, other_user_id, body, sender_id, created_at, seen \
        FROM mine ORDER BY ad_id, other_user_id, created_at DESC, id DESC \
    ), unread AS ( \
        SELECT ad_id, sender_id AS other_user_id, COUNT(*) AS unread_count \
        FROM messages WHERE receiver_id = $1 AND NOT seen GROUP BY ad_id, sender_id \
    ) \
    SELECT l.ad_id, l.other_user_id, l.body AS last_message, l.sender_id AS last_sender_id, \
           l.created_at AS last_message_at, l.seen, COALESCE(u.unread_count, 0) AS unread_count, \
           a.title AS ad_title, a.images[1] AS ad_image \
    FROM latest l \
    LEFT JOIN unread u ON u.ad_id = l.ad_id AND u.other_user_id = l.other_user_id \
    LEFT JOIN ads a ON a.id = l.ad_id \
    ORDER BY l.created_at DESC";

fn preview(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() { format!("{head}…") } else { head }
}

/// Whether a stored message belongs to the thread a retried send targets.
fn is_same_thread(stored: &Message, ad_id: Uuid, receiver_id: Uuid) -> bool {
    stored.ad_id == ad_id && stored.receiver_id == receiver_id
}

pub struct MessageService;

impl MessageService {
    /// Stores a message and notifies both participants.
    ///
    /// Returns the message and whether it was newly created. A repeated
    /// `client_message_id` from the same sender yields the stored message and
    /// publishes nothing; reusing it for another thread is a conflict.
    pub async fn send(
        state: &AppState,
        sender_id: Uuid,
        sender_name: &str,
        req: SendMessageRequest,
    ) -> ApiResult<(Message, bool)> {
        if req.receiver_id == sender_id {
            return Err(ApiError::bad_request("Cannot send a message to yourself"));
        }

        let owner_id = AdService::owner_of(&state.db, req.ad_id).await?;
        let receiver_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(req.receiver_id)
                .fetch_one(state.db.as_ref())
                .await?;
        if !receiver_exists {
            return Err(ApiError::not_found("Receiver not found"));
        }
        if owner_id != sender_id && owner_id != req.receiver_id {
            return Err(ApiError::forbidden("Messages must involve the ad owner"));
        }

        let client_id = req
            .client_message_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        // NULL client ids never conflict, so plain sends always insert
        let sql = format!(
            "INSERT INTO messages (id, ad_id, sender_id, receiver_id, body, image, client_message_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (sender_id, client_message_id) DO NOTHING \
             RETURNING {MESSAGE_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Message>(&sql)
            .bind(Uuid::new_v4())
            .bind(req.ad_id)
            .bind(sender_id)
            .bind(req.receiver_id)
            .bind(req.message.trim())
            .bind(req.image.as_deref())
            .bind(client_id)
            .fetch_optional(state.db.as_ref())
            .await?;

        let Some(message) = inserted else {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = $1 AND client_message_id = $2"
            );
            let existing = sqlx::query_as::<_, Message>(&sql)
                .bind(sender_id)
                .bind(client_id)
                .fetch_one(state.db.as_ref())
                .await?;
            if !is_same_thread(&existing, req.ad_id, req.receiver_id) {
                tracing::warn!(
                    message_id = %existing.id,
                    user_id = %sender_id,
                    "Client message id reused for a different thread"
                );
                return Err(ApiError::Conflict(
                    "client_message_id was already used for another conversation".into(),
                ));
            }
            tracing::debug!(message_id = %existing.id, "Duplicate send returned stored message");
            return Ok((existing, false));
        };

        let delivered = state.chat.publish(
            message.receiver_id,
            ChatEvent::NewMessage { message: message.clone() },
        );
        state.chat.publish(sender_id, ChatEvent::NewMessage { message: message.clone() });
        state.chat.publish(
            message.receiver_id,
            ChatEvent::Notification {
                kind: NotificationKind::Message,
                text: format!("{sender_name}: {}", preview(&message.body)),
                ad_id: Some(message.ad_id),
                from_user_id: Some(sender_id),
            },
        );

        tracing::info!(
            message_id = %message.id,
            ad_id = %message.ad_id,
            user_id = %sender_id,
            receiver_id = %message.receiver_id,
            live_receivers = delivered,
            "Message sent"
        );
        Ok((message, true))
    }

    /// One thread in chronological order. Marks what `me` received as seen.
    pub async fn thread(
        state: &AppState,
        me: Uuid,
        ad_id: Uuid,
        other: Uuid,
    ) -> ApiResult<Vec<Message>> {
        let marked = sqlx::query(
            "UPDATE messages SET seen = TRUE \
             WHERE ad_id = $1 AND sender_id = $2 AND receiver_id = $3 AND NOT seen",
        )
        .bind(ad_id)
        .bind(other)
        .bind(me)
        .execute(state.db.as_ref())
        .await?
        .rows_affected();

        if marked > 0 {
            state.chat.publish(other, ChatEvent::MessagesSeen { ad_id, reader_id: me, count: marked });
        }

        // newest page, returned oldest first
        let sql = format!(
            "SELECT * FROM (SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE ad_id = $1 AND ((sender_id = $2 AND receiver_id = $3) \
                OR (sender_id = $3 AND receiver_id = $2)) \
             ORDER BY created_at DESC LIMIT $4) t ORDER BY created_at ASC"
        );
        let messages = sqlx::query_as::<_, Message>(&sql)
            .bind(ad_id)
            .bind(me)
            .bind(other)
            .bind(THREAD_LIMIT)
            .fetch_all(state.db.as_ref())
            .await?;
        Ok(messages)
    }

    /// Inbox of `me`, newest thread first.
    pub async fn conversations(pool: &PgPool, me: Uuid) -> ApiResult<Vec<Conversation>> {
        let mut conversations = sqlx::query_as::<_, Conversation>(INBOX_SQL)
            .bind(me)
            .fetch_all(pool)
            .await?;
        if conversations.is_empty() {
            return Ok(conversations);
        }

        let user_ids: Vec<Uuid> = conversations.iter().map(|c| c.other_user_id).collect();
        let users: HashMap<Uuid, PublicUser> =
            sqlx::query_as::<_, PublicUser>("SELECT id, name, picture FROM users WHERE id = ANY($1)")
                .bind(user_ids)
                .fetch_all(pool)
                .await?
                .into_iter()
                .map(|u| (u.id, u))
                .collect();

        for c in &mut conversations {
            c.other_user = users.get(&c.other_user_id).cloned();
        }

        Ok(conversations)
    }

    pub async fn unread_count(pool: &PgPool, me: Uuid) -> ApiResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE receiver_id = $1 AND NOT seen")
                .bind(me)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    /// Messages received after `since`, oldest first, for stream replay.
    pub async fn backlog(pool: &PgPool, me: Uuid, since: DateTime<Utc>) -> ApiResult<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE receiver_id = $1 AND created_at > $2 \
             ORDER BY created_at ASC LIMIT $3"
        );
        let messages = sqlx::query_as::<_, Message>(&sql)
            .bind(me)
            .bind(since)
            .bind(BACKLOG_LIMIT)
            .fetch_all(pool)
            .await?;
        Ok(messages)
    }
}
