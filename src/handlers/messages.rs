//! Chat endpoints and the Server-Sent Events stream.

use std::{convert::Infallible, time::Duration};

use actix_web::{
    HttpResponse,
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    web::{self, Bytes},
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Deserialize;
use tokio::{
    sync::broadcast::error::RecvError,
    time::{Instant, interval_at},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    auth_middleware::AuthMiddleware,
    error::ApiResult,
    handlers::data::SendMessageRequest,
    services::{ChatEvent, MessageService},
};

/// Interval between keep-alive comments on the event stream.
pub const PING_INTERVAL: Duration = Duration::from_secs(25);

const PING_FRAME: &[u8] = b": ping\n\n";

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Replay messages received after this instant
    pub since: Option<DateTime<Utc>>,
}

/// `POST /api/messages`. Returns 201 for a new message and 200 when a
/// retried `client_message_id` matched a stored one.
#[tracing::instrument(skip(user, data, form), fields(user_id = %user.id, ad_id = %form.ad_id))]
pub async fn send_message(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    form: web::Json<SendMessageRequest>,
) -> ApiResult<HttpResponse> {
    form.validate()?;
    let (message, created) =
        MessageService::send(&data, user.id, &user.name, form.into_inner()).await?;
    let mut resp = if created { HttpResponse::Created() } else { HttpResponse::Ok() };
    Ok(resp.json(message))
}

/// `GET /api/messages/{ad_id}/{other_user_id}`
#[tracing::instrument(skip(user, data), fields(user_id = %user.id))]
pub async fn get_thread(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> ApiResult<HttpResponse> {
    let (ad_id, other_user_id) = path.into_inner();
    let messages = MessageService::thread(&data, user.id, ad_id, other_user_id).await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// `GET /api/conversations`
#[tracing::instrument(skip(user, data), fields(user_id = %user.id))]
pub async fn get_conversations(
    user: AuthMiddleware,
    data: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let conversations = MessageService::conversations(&data.db, user.id).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// `GET /api/messages/unread-count`
#[tracing::instrument(skip(user, data), fields(user_id = %user.id))]
pub async fn unread_count(
    user: AuthMiddleware,
    data: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let unread = MessageService::unread_count(&data.db, user.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "unread": unread })))
}

/// `GET /api/chat/stream?since=`
///
/// Subscribes before reading the backlog so nothing published in between is
/// lost; a message may then arrive twice and clients dedupe by id.
#[tracing::instrument(skip(user, data, query), fields(user_id = %user.id))]
pub async fn chat_stream(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    web::Query(query): web::Query<StreamQuery>,
) -> ApiResult<HttpResponse> {
    let rx = data.chat.subscribe(user.id);

    let backlog = match query.since {
        Some(since) => MessageService::backlog(&data.db, user.id, since).await?,
        None => Vec::new(),
    };
    tracing::info!(replayed = backlog.len(), "Chat stream opened");

    let replay = stream::iter(
        backlog
            .into_iter()
            .map(|message| Ok::<_, Infallible>(ChatEvent::NewMessage { message }.to_sse_frame())),
    );

    let ping = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let user_id = user.id;
    let live = stream::unfold((rx, ping), move |(mut rx, mut ping)| async move {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => return Some((Ok::<_, Infallible>(event.to_sse_frame()), (rx, ping))),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id = %user_id, skipped, "Chat stream lagged");
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = ping.tick() => return Some((Ok(Bytes::from_static(PING_FRAME)), (rx, ping))),
            }
        }
    });

    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(replay.chain(live)))
}

/// Registers the message, conversation, and stream routes.
pub fn configure_message_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/messages")
            .route("", web::post().to(send_message))
            .route("/unread-count", web::get().to(unread_count))
            .route("/{ad_id}/{other_user_id}", web::get().to(get_thread)),
    )
    .route("/api/conversations", web::get().to(get_conversations))
    .route("/api/chat/stream", web::get().to(chat_stream));
}
