//! Forwards plugin log output into the host's `tracing` subscriber.
//!
//! Plugins log JSON lines to stderr (see
//! [`init_plugin_logging`](super::server::init_plugin_logging)). Each line is
//! re-emitted at its original level, tagged with the plugin name. The host
//! stamps its own time, so timestamp fields are dropped.

use serde_json::{Map, Value};
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::Level;

const TIMESTAMP_KEYS: [&str; 3] = ["timestamp", "@timestamp", "time"];

/// One parsed plugin log line.
#[derive(Clone, Debug, PartialEq)]
pub struct PluginLogRecord {
    pub level: Level,
    pub message: String,
    pub target: Option<String>,
    pub fields: Map<String, Value>,
}

/// Parse a JSON log line. Returns `None` for anything that is not a JSON
/// object.
pub fn parse_line(line: &str) -> Option<PluginLogRecord> {
    let Value::Object(mut object) = serde_json::from_str::<Value>(line).ok()? else {
        return None;
    };
    for key in TIMESTAMP_KEYS {
        object.remove(key);
    }

    let level = object
        .remove("level")
        .and_then(|level| level.as_str().and_then(|s| Level::from_str(s).ok()))
        .unwrap_or(Level::INFO);
    let target = object
        .remove("target")
        .and_then(|target| target.as_str().map(str::to_string));

    // tracing-subscriber nests event fields under "fields" unless the
    // plugin flattens them.
    let mut fields = match object.remove("fields") {
        Some(Value::Object(nested)) => nested,
        _ => Map::new(),
    };
    fields.extend(object);
    for key in TIMESTAMP_KEYS {
        fields.remove(key);
    }

    let message = ["message", "msg"]
        .iter()
        .find_map(|key| fields.remove(*key))
        .map(|message| match message {
            Value::String(text) => text,
            other => other.to_string(),
        })
        .unwrap_or_default();

    Some(PluginLogRecord {
        level,
        message,
        target,
        fields,
    })
}

/// Plugin fields as compact JSON, or `None` when there are none.
fn render_fields(fields: &Map<String, Value>) -> Option<String> {
    if fields.is_empty() {
        return None;
    }
    serde_json::to_string(fields).ok()
}

/// Re-emit a record through the host subscriber.
///
/// The plugin's message becomes the event message; its remaining fields
/// travel as one JSON object under `plugin_fields`.
pub fn emit(plugin: &str, record: &PluginLogRecord) {
    let target = record.target.as_deref();
    let fields = render_fields(&record.fields);
    let fields = fields.as_deref();
    let message = &record.message;
    match record.level {
        Level::ERROR => tracing::error!(plugin, plugin_target = target, plugin_fields = fields, "{message}"),
        Level::WARN => tracing::warn!(plugin, plugin_target = target, plugin_fields = fields, "{message}"),
        Level::INFO => tracing::info!(plugin, plugin_target = target, plugin_fields = fields, "{message}"),
        Level::DEBUG => tracing::debug!(plugin, plugin_target = target, plugin_fields = fields, "{message}"),
        _ => tracing::trace!(plugin, plugin_target = target, plugin_fields = fields, "{message}"),
    }
}

/// Forward every line of `reader` until it closes.
pub async fn forward<R>(plugin: String, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match parse_line(&line) {
                Some(record) => emit(&plugin, &record),
                None => tracing::debug!(plugin = %plugin, "{line}"),
            },
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(plugin = %plugin, %error, "plugin log stream failed");
                break;
            }
        }
    }
    tracing::debug!(plugin = %plugin, "plugin log stream closed");
}
