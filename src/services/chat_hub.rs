//! In-process fan-out of chat events to connected users.
//!
//! Each user with at least one open event stream owns a
//! `tokio::sync::broadcast` channel. Publishing to a user nobody is
//! listening for is a no-op; channels without receivers are pruned on the
//! next publish.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use actix_web::web::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Message;

/// Per-user channel capacity. Slow readers skip what they missed.
pub const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    PointsReceived,
    PointsSent,
}

/// Event pushed to a user's stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    NewMessage {
        message: Message,
    },
    MessagesSeen {
        ad_id: Uuid,
        reader_id: Uuid,
        count: u64,
    },
    Notification {
        kind: NotificationKind,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ad_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from_user_id: Option<Uuid>,
    },
}

impl ChatEvent {
    /// SSE `event:` name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::MessagesSeen { .. } => "messages_seen",
            Self::Notification { .. } => "notification",
        }
    }

    /// Encodes the event as one Server-Sent Events frame.
    pub fn to_sse_frame(&self) -> Bytes {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

#[derive(Debug, Default)]
pub struct ChatHub {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<ChatEvent>>>,
}

impl ChatHub {
    /// Opens a receiver for `user_id`, creating the channel if needed.
    pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<ChatEvent> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Sends `event` to every open stream of `user_id`. Returns how many
    /// receivers got it.
    pub fn publish(&self, user_id: Uuid, event: ChatEvent) -> usize {
        let delivered = {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            match channels.get(&user_id) {
                Some(tx) => tx.send(event).unwrap_or(0),
                None => return 0,
            }
        };

        if delivered == 0 {
            let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
            if channels.get(&user_id).is_some_and(|tx| tx.receiver_count() == 0) {
                channels.remove(&user_id);
                tracing::debug!(user_id = %user_id, "Pruned idle chat channel");
            }
        }

        delivered
    }

    /// Users with at least one live channel.
    pub fn connected_users(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|tx| tx.receiver_count() > 0)
            .count()
    }
}
