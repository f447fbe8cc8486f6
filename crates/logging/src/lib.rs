//! Structured single-line JSON logging (§4.2).
//!
//! A process-wide `tracing` layer renders every event as one JSON object per line
//! with exactly the keys `{message, requestID, level}`, with optional caller
//! annotation and error-chain capture. `tracing_subscriber::fmt().json()` is not
//! used directly because its field layout does not match this shape.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

const MAX_LOG_LENGTH: usize = 4096;

/// Parses an `EASE_LOG_LEVEL` value, degrading unknown values to INFO.
///
/// Mirrors the source's level normalisation: accepts the standard level names
/// (case-insensitive), treats `WARNING` as an alias for `WARN`, and falls back to
/// INFO with a stderr notice for anything else.
pub fn parse_log_level(raw: &str) -> Level {
    match raw.to_ascii_uppercase().as_str() {
        "CRITICAL" | "FATAL" => Level::ERROR,
        "ERROR" => Level::ERROR,
        "WARN" | "WARNING" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        other => {
            eprintln!("Invalid log level {other}, use default INFO, available levels: CRITICAL, ERROR, WARN, INFO, DEBUG");
            Level::INFO
        }
    }
}

/// Installs the JSON line layer as the global default subscriber, filtered at `level`.
pub fn init(level: Level) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::filter::LevelFilter::from_level(level);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(JsonLineLayer::new(Box::new(std::io::stdout())));
    if registry.try_init().is_err() {
        eprintln!("logging already initialised, skipping");
    }
}

/// Truncates `message` to `MAX_LOG_LENGTH` characters, keeping the first and last
/// half and noting how many characters were dropped in between (§4.2).
fn limit_message(message: &str) -> String {
    let chars: Vec<char> = message.chars().collect();
    if chars.len() <= MAX_LOG_LENGTH {
        return message.to_string();
    }
    let half = MAX_LOG_LENGTH / 2;
    let truncated = chars.len() - MAX_LOG_LENGTH;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{head}\n... EXCEED MAX LOG LENGTH, TRUNCATED {truncated} CHARACTERS...\n{tail}")
}

/// Per-span fields captured at span-creation time, inherited by every event logged
/// within that span (chiefly `request_id`).
struct SpanFields(HashMap<String, String>);

#[derive(Default)]
struct EventVisitor {
    fields: HashMap<String, String>,
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields.insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }
}

/// Writes one `{message, requestID, level}` JSON object per tracing event.
pub struct JsonLineLayer {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLineLayer {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        JsonLineLayer {
            writer: Mutex::new(writer),
        }
    }

    fn request_id_from_scope<S>(&self, ctx: &Context<'_, S>, event: &Event<'_>) -> Option<String>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let scope = ctx.event_scope(event)?;
        for span in scope {
            let ext = span.extensions();
            if let Some(fields) = ext.get::<SpanFields>() {
                if let Some(v) = fields.0.get("request_id") {
                    return Some(v.clone());
                }
            }
        }
        None
    }
}

impl<S> Layer<S> for JsonLineLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(visitor.fields));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let level_name = match *event.metadata().level() {
            Level::ERROR => "ERROR",
            Level::WARN => "WARN",
            Level::INFO => "INFO",
            Level::DEBUG => "DEBUG",
            Level::TRACE => "TRACE",
        };

        let request_id = visitor
            .fields
            .remove("request_id")
            .or_else(|| self.request_id_from_scope(&ctx, event))
            .unwrap_or_default();

        let caller = visitor
            .fields
            .remove("caller")
            .map(|v| v == "true")
            .unwrap_or(false);

        let error = visitor.fields.remove("error");

        let mut message = visitor.fields.remove("message").unwrap_or_default();
        if caller {
            if let Some(file) = event.metadata().file() {
                let basename = file.rsplit('/').next().unwrap_or(file);
                let line = event.metadata().line().unwrap_or(0);
                message = format!("[{basename}:{line}] {message}");
            }
        }
        let message = limit_message(&message);

        let record = serde_json::json!({
            "message": message,
            "requestID": request_id,
            "level": level_name,
        });

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        // A single `write_all` call keeps the record from interleaving with a
        // concurrent writer under a line-buffered stdout.
        let mut line = serde_json::to_string(&record).unwrap_or_default();
        line.push('\n');
        let _ = writer.write_all(line.as_bytes());
        if let Some(err) = error {
            let _ = writer.write_all(err.as_bytes());
            let _ = writer.write_all(b"\n");
        }
        let _ = writer.flush();
    }
}
