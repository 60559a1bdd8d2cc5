//! Forwarding of `tracing` events to the PostgreSQL server log.
//!
//! The planning core only knows `tracing`. Inside the backend this layer
//! turns each event into an `ereport()` at the matching level. Events may
//! carry a `pg_level` field to pick the level explicitly (the multi-task
//! notice uses it) and a `hint` field that becomes the report's HINT.

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Server log level of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElogLevel {
    Debug2,
    Debug1,
    Log,
    Info,
    Notice,
    Warning,
}

impl ElogLevel {
    /// Mapping used when the event does not name a level. Never `ERROR`:
    /// an `ERROR` report would longjmp out of the subscriber.
    pub fn from_tracing(level: &Level) -> Self {
        match *level {
            Level::TRACE => ElogLevel::Debug2,
            Level::DEBUG => ElogLevel::Debug1,
            Level::INFO => ElogLevel::Log,
            Level::WARN | Level::ERROR => ElogLevel::Warning,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "debug2" => Some(ElogLevel::Debug2),
            "debug" | "debug1" => Some(ElogLevel::Debug1),
            "log" => Some(ElogLevel::Log),
            "info" => Some(ElogLevel::Info),
            "notice" => Some(ElogLevel::Notice),
            "warning" => Some(ElogLevel::Warning),
            _ => None,
        }
    }
}

/// The parts of an event that end up in a report.
#[derive(Debug, Default)]
pub struct ElogMessage {
    pub message: String,
    pub pg_level: Option<String>,
    pub hint: Option<String>,
    /// Remaining fields, rendered as `name=value`.
    pub fields: String,
}

impl ElogMessage {
    pub fn from_event(event: &Event<'_>) -> Self {
        let mut message = ElogMessage::default();
        event.record(&mut message);
        message
    }

    pub fn level(&self, event_level: &Level) -> ElogLevel {
        self.pg_level
            .as_deref()
            .and_then(ElogLevel::from_name)
            .unwrap_or_else(|| ElogLevel::from_tracing(event_level))
    }

    /// The report text: the message followed by the structured fields.
    pub fn text(&self) -> String {
        if self.fields.is_empty() {
            format!("pg_shardplan: {}", self.message)
        } else {
            format!("pg_shardplan: {} ({})", self.message, self.fields)
        }
    }
}

impl Visit for ElogMessage {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "pg_level" => self.pg_level = Some(value.to_string()),
            "hint" => self.hint = Some(value.to_string()),
            name => self.push_field(name, value),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "pg_level" => self.pg_level = Some(format!("{value:?}")),
            "hint" => self.hint = Some(format!("{value:?}")),
            name => self.push_field(name, &format!("{value:?}")),
        }
    }
}

impl ElogMessage {
    fn push_field(&mut self, name: &str, value: &str) {
        if !self.fields.is_empty() {
            self.fields.push_str(", ");
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

/// `tracing_subscriber` layer writing events through `ereport()`.
pub struct PgElogLayer;

impl<S: Subscriber> Layer<S> for PgElogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let message = ElogMessage::from_event(event);
        let level = message.level(event.metadata().level());
        report(level, &message);
    }
}

#[cfg(feature = "pg18")]
fn report(level: ElogLevel, message: &ElogMessage) {
    use pgrx::pg_sys::panic::ErrorReport;
    use pgrx::prelude::{PgLogLevel, PgSqlErrorCode};

    let (pg_level, code) = match level {
        ElogLevel::Debug2 => (PgLogLevel::DEBUG2, PgSqlErrorCode::ERRCODE_SUCCESSFUL_COMPLETION),
        ElogLevel::Debug1 => (PgLogLevel::DEBUG1, PgSqlErrorCode::ERRCODE_SUCCESSFUL_COMPLETION),
        ElogLevel::Log => (PgLogLevel::LOG, PgSqlErrorCode::ERRCODE_SUCCESSFUL_COMPLETION),
        ElogLevel::Info => (PgLogLevel::INFO, PgSqlErrorCode::ERRCODE_SUCCESSFUL_COMPLETION),
        ElogLevel::Notice => (PgLogLevel::NOTICE, PgSqlErrorCode::ERRCODE_SUCCESSFUL_COMPLETION),
        ElogLevel::Warning => (PgLogLevel::WARNING, PgSqlErrorCode::ERRCODE_WARNING),
    };
    let mut report = ErrorReport::new(code, message.text(), "pg_shardplan");
    if let Some(hint) = &message.hint {
        report = report.set_hint(hint.as_str());
    }
    report.report(pg_level);
}

#[cfg(not(feature = "pg18"))]
fn report(_level: ElogLevel, _message: &ElogMessage) {}

/// Install the layer as the global default subscriber. Later calls are
/// no-ops.
#[cfg(feature = "pg18")]
pub fn init() {
    use tracing_subscriber::prelude::*;

    let subscriber = tracing_subscriber::registry().with(PgElogLayer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records what the elog layer would report.
    struct Capture(Arc<Mutex<Vec<(ElogLevel, String, Option<String>)>>>);

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let message = ElogMessage::from_event(event);
            let level = message.level(event.metadata().level());
            self.0
                .lock()
                .unwrap()
                .push((level, message.text(), message.hint.clone()));
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<(ElogLevel, String, Option<String>)> {
        use tracing_subscriber::prelude::*;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(Capture(seen.clone()));
        tracing::subscriber::with_default(subscriber, f);
        let out = seen.lock().unwrap().clone();
        out
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(ElogLevel::from_tracing(&Level::TRACE), ElogLevel::Debug2);
        assert_eq!(ElogLevel::from_tracing(&Level::DEBUG), ElogLevel::Debug1);
        assert_eq!(ElogLevel::from_tracing(&Level::INFO), ElogLevel::Log);
        assert_eq!(ElogLevel::from_tracing(&Level::ERROR), ElogLevel::Warning);
        assert_eq!(ElogLevel::from_name("NOTICE"), Some(ElogLevel::Notice));
        assert_eq!(ElogLevel::from_name("fatal"), None);
    }

    #[test]
    fn test_event_fields() {
        let events = capture(|| {
            tracing::debug!(plan_id = 3, "replacing subquery");
            tracing::info!(pg_level = "notice", hint = "split", "multi-task query");
        });

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, ElogLevel::Debug1);
        assert_eq!(events[0].1, "pg_shardplan: replacing subquery (plan_id=3)");
        assert_eq!(events[1].0, ElogLevel::Notice);
        assert_eq!(events[1].1, "pg_shardplan: multi-task query");
        assert_eq!(events[1].2.as_deref(), Some("split"));
    }
}
