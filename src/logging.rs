//! Structured logging.
//!
//! Events go to stdout as Bunyan JSON and, through [`PgLogLayer`], into the
//! `system_logs` table that the admin log viewer reads. Database writes
//! happen on a background task fed by an unbounded channel so that logging
//! never blocks a request.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    span::{Attributes, Id, Record},
    subscriber::set_global_default,
};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt::MakeWriter, layer::Context, layer::SubscriberExt,
    registry::LookupSpan,
};
use uuid::Uuid;

// Set while the writer task inserts a row, so events emitted by that insert
// are not logged again.
tokio::task_local! {
    static IN_LOG_HANDLER: ();
}

/// Targets never persisted to the database.
const SKIPPED_TARGETS: &[&str] = &["sqlx::query", "rentwala::logging"];

/// One row destined for `system_logs`.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub source: String,
    pub message: String,
    pub user_id: Option<Uuid>,
    pub context: Option<JsonValue>,
}

/// Tracing layer that forwards events to the `system_logs` table.
///
/// A `user_id` or `source` field on the event or any enclosing span fills
/// the matching column; every other field lands in `context`.
pub struct PgLogLayer {
    tx: UnboundedSender<LogRecord>,
    min_level: Level,
}

impl PgLogLayer {
    /// Starts the writer task on the current Tokio runtime.
    pub fn spawn(pool: Arc<PgPool>, min_level: Level) -> Self {
        let (tx, mut rx) = unbounded_channel::<LogRecord>();

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let pool = pool.clone();
                IN_LOG_HANDLER
                    .scope((), async move {
                        let res = sqlx::query(
                            "INSERT INTO system_logs (timestamp, level, source, message, user_id, context) \
                             VALUES ($1, $2, $3, $4, $5, $6)",
                        )
                        .bind(record.timestamp)
                        .bind(&record.level)
                        .bind(&record.source)
                        .bind(&record.message)
                        .bind(record.user_id)
                        .bind(&record.context)
                        .execute(pool.as_ref())
                        .await;
                        if let Err(e) = res {
                            // stdout only; this event is dropped by on_event
                            tracing::warn!(error = %e, "Failed to persist log record");
                        }
                    })
                    .await;
            }
        });

        Self { tx, min_level }
    }

    fn should_persist(&self, event: &Event<'_>) -> bool {
        let meta = event.metadata();
        *meta.level() <= self.min_level && !SKIPPED_TARGETS.contains(&meta.target())
    }
}

impl<S> Layer<S> for PgLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if IN_LOG_HANDLER.try_with(|_| ()).is_ok() || !self.should_persist(event) {
            return;
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut user_id = visitor.user_id.take();
        let mut source = visitor.source.take();
        let mut context = serde_json::Map::new();

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let exts = span.extensions();
                if let Some(fields) = exts.get::<JsonVisitor>() {
                    if fields.user_id.is_some() {
                        user_id = user_id.or_else(|| fields.user_id.clone());
                    }
                    if fields.source.is_some() {
                        source = source.or_else(|| fields.source.clone());
                    }
                    context.extend(fields.context.clone());
                }
            }
        }
        context.extend(visitor.context);

        let record = LogRecord {
            timestamp: Utc::now(),
            level: event.metadata().level().as_str().to_string(),
            source: source.unwrap_or_else(|| event.metadata().target().to_string()),
            message: visitor.message.unwrap_or_default(),
            user_id: user_id.and_then(|s| Uuid::parse_str(&s).ok()),
            context: (!context.is_empty()).then_some(JsonValue::Object(context)),
        };

        let _ = self.tx.send(record);
    }

    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut exts = span.extensions_mut();
            if let Some(visitor) = exts.get_mut::<JsonVisitor>() {
                values.record(visitor);
            }
        }
    }
}

/// Collects the fields of an event or span.
#[derive(Default, Debug)]
struct JsonVisitor {
    user_id: Option<String>,
    source: Option<String>,
    message: Option<String>,
    context: serde_json::Map<String, JsonValue>,
}

impl JsonVisitor {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "user_id" => self.user_id = Some(value),
            "source" => self.source = Some(value),
            "message" => self.message = Some(value),
            k => {
                self.context.insert(k.to_string(), JsonValue::String(value));
            }
        }
    }
}

impl Visit for JsonVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.context.insert(field.name().to_string(), JsonValue::from(value));
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.context.insert(field.name().to_string(), JsonValue::from(value));
    }
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.context.insert(field.name().to_string(), JsonValue::from(value));
    }
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.context.insert(field.name().to_string(), JsonValue::from(value));
    }
}

/// Composes the subscriber: env filter, Bunyan JSON to `sink`, and the
/// optional database layer.
///
/// `RUST_LOG` overrides `env_filter` when set.
pub fn get_subscriber<Sink>(
    name: String,
    env_filter: String,
    sink: Sink,
    pg_layer: Option<PgLogLayer>,
) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    let formatting_layer = BunyanFormattingLayer::new(name, sink);

    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
        .with(pg_layer)
}

/// Installs `subscriber` globally and routes `log` records into it.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) -> anyhow::Result<()> {
    LogTracer::init()?;
    set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::subscriber::with_default;

    #[tokio::test]
    async fn events_become_records_with_span_user() {
        let (tx, mut rx) = unbounded_channel();
        let layer = PgLogLayer { tx, min_level: Level::INFO };
        let subscriber = Registry::default().with(layer);
        let user = Uuid::new_v4();

        with_default(subscriber, || {
            let span = tracing::info_span!("request", user_id = %user);
            let _guard = span.enter();
            tracing::info!(source = "ads", ad_id = 7_u64, "Ad posted");
            tracing::debug!("too verbose");
        });

        let record = rx.try_recv().unwrap();
        assert_eq!(record.level, "INFO");
        assert_eq!(record.source, "ads");
        assert_eq!(record.message, "Ad posted");
        assert_eq!(record.user_id, Some(user));
        assert_eq!(record.context.unwrap()["ad_id"], 7);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn skipped_targets_are_not_forwarded() {
        let (tx, mut rx) = unbounded_channel();
        let subscriber = Registry::default().with(PgLogLayer { tx, min_level: Level::TRACE });

        with_default(subscriber, || {
            tracing::info!(target: "sqlx::query", "SELECT 1");
            tracing::warn!(target: "rentwala::logging", "Failed to persist log record");
        });

        assert!(rx.try_recv().is_err());
    }
}
