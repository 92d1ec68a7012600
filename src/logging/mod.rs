//! Structured observability core
//!
//! Leveled, categorized, correlated log events with a bounded in-memory
//! ring buffer, broadcast fan-out to live subscribers, and runtime
//! reconfiguration. Delivery to subscribers never blocks producers: a
//! lagging receiver drops entries for itself only.

pub mod context;

pub use context::{AuthPrincipal, RequestContext};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Severity levels, RFC 5424-aligned. `Off` disables emission entirely.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Off,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Some(Self::Trace),
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" | "WARNING" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            "FATAL" => Some(Self::Fatal),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Off => "OFF",
        }
    }
}

/// Event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogCategory {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "scim.user")]
    ScimUser,
    #[serde(rename = "scim.group")]
    ScimGroup,
    #[serde(rename = "scim.patch")]
    ScimPatch,
    #[serde(rename = "scim.filter")]
    ScimFilter,
    #[serde(rename = "scim.discovery")]
    ScimDiscovery,
    #[serde(rename = "endpoint")]
    Endpoint,
    #[serde(rename = "database")]
    Database,
    #[serde(rename = "backup")]
    Backup,
    #[serde(rename = "oauth")]
    Oauth,
    #[serde(rename = "general")]
    General,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Auth => "auth",
            Self::ScimUser => "scim.user",
            Self::ScimGroup => "scim.group",
            Self::ScimPatch => "scim.patch",
            Self::ScimFilter => "scim.filter",
            Self::ScimDiscovery => "scim.discovery",
            Self::Endpoint => "endpoint",
            Self::Database => "database",
            Self::Backup => "backup",
            Self::Oauth => "oauth",
            Self::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "auth" => Some(Self::Auth),
            "scim.user" => Some(Self::ScimUser),
            "scim.group" => Some(Self::ScimGroup),
            "scim.patch" => Some(Self::ScimPatch),
            "scim.filter" => Some(Self::ScimFilter),
            "scim.discovery" => Some(Self::ScimDiscovery),
            "endpoint" => Some(Self::Endpoint),
            "database" => Some(Self::Database),
            "backup" => Some(Self::Backup),
            "oauth" => Some(Self::Oauth),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Error detail attached to a log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// One structured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "endpointId", skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LogErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Live logger configuration; every field is runtime-tunable via the
/// admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub level: LogLevel,
    #[serde(rename = "categoryLevels", default)]
    pub category_levels: HashMap<String, LogLevel>,
    #[serde(rename = "endpointLevels", default)]
    pub endpoint_levels: HashMap<String, LogLevel>,
    #[serde(rename = "includePayloads")]
    pub include_payloads: bool,
    #[serde(rename = "includeStackTraces")]
    pub include_stacks: bool,
    #[serde(rename = "maxPayloadSizeBytes")]
    pub max_payload_size_bytes: usize,
    pub format: LogFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            category_levels: HashMap::new(),
            endpoint_levels: HashMap::new(),
            include_payloads: true,
            include_stacks: true,
            max_payload_size_bytes: 8 * 1024,
            format: LogFormat::Pretty,
        }
    }
}

impl LoggerConfig {
    pub fn from_app_config(log: &crate::config::LogConfig) -> Self {
        let mut category_levels = HashMap::new();
        for (category, level) in &log.category_levels {
            if let (Some(_), Some(parsed)) = (LogCategory::parse(category), LogLevel::parse(level))
            {
                category_levels.insert(category.to_ascii_lowercase(), parsed);
            }
        }
        Self {
            level: LogLevel::parse(&log.level).unwrap_or(LogLevel::Info),
            category_levels,
            endpoint_levels: HashMap::new(),
            include_payloads: log.include_payloads,
            include_stacks: log.include_stacks,
            max_payload_size_bytes: log.max_payload_size_bytes,
            format: if log.format == "json" {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
        }
    }
}

/// Ring-buffer query filters; defaults to the last 100 entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
    pub level: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(rename = "endpointId")]
    pub endpoint_id: Option<String>,
}

/// Default ring-buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

/// Thread-safe structured logger with a bounded history.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    config: RwLock<LoggerConfig>,
    ring: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
    sender: broadcast::Sender<LogEntry>,
    emit_to_std: bool,
}

lazy_static! {
    static ref SENSITIVE_KEY: Regex =
        Regex::new(r"(?i)secret|password|token|authorization|bearer|jwt").unwrap();
}

impl Logger {
    pub fn new(config: LoggerConfig, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(LoggerInner {
                config: RwLock::new(config),
                ring: RwLock::new(VecDeque::with_capacity(capacity)),
                capacity,
                sender,
                emit_to_std: true,
            }),
        }
    }

    /// Silent logger for tests: full ring/broadcast behavior, no stdio.
    pub fn for_tests() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(LoggerInner {
                config: RwLock::new(LoggerConfig::default()),
                ring: RwLock::new(VecDeque::with_capacity(DEFAULT_BUFFER_CAPACITY)),
                capacity: DEFAULT_BUFFER_CAPACITY,
                sender,
                emit_to_std: false,
            }),
        }
    }

    pub fn config(&self) -> LoggerConfig {
        self.inner.config.read().clone()
    }

    pub fn set_config(&self, config: LoggerConfig) {
        *self.inner.config.write() = config;
    }

    pub fn update_config(&self, mutate: impl FnOnce(&mut LoggerConfig)) {
        let mut config = self.inner.config.write();
        mutate(&mut config);
    }

    /// Level resolution order: endpoint override, category override,
    /// global level.
    fn resolved_level(&self, category: LogCategory, endpoint_id: Option<&str>) -> LogLevel {
        let config = self.inner.config.read();
        if let Some(endpoint_id) = endpoint_id {
            if let Some(level) = config.endpoint_levels.get(endpoint_id) {
                return *level;
            }
        }
        if let Some(level) = config.category_levels.get(category.as_str()) {
            return *level;
        }
        config.level
    }

    pub fn enabled(&self, level: LogLevel, category: LogCategory, endpoint_id: Option<&str>) -> bool {
        let resolved = self.resolved_level(category, endpoint_id);
        resolved != LogLevel::Off && level >= resolved
    }

    /// Emit an event. This is the single entry point; the level check,
    /// sanitization, ring append, broadcast and stdio write all happen
    /// here, in program order for a given caller.
    #[allow(clippy::too_many_arguments)]
    pub fn emit(
        &self,
        level: LogLevel,
        category: LogCategory,
        ctx: Option<&RequestContext>,
        message: impl Into<String>,
        duration_ms: Option<u64>,
        data: Option<Value>,
        error: Option<LogErrorDetail>,
    ) {
        let endpoint_id = ctx.and_then(|c| c.endpoint_id.clone());
        if !self.enabled(level, category, endpoint_id.as_deref()) {
            return;
        }

        let config = self.inner.config.read().clone();
        let data = if config.include_payloads {
            data.map(|mut d| {
                sanitize(&mut d, config.max_payload_size_bytes);
                d
            })
        } else {
            None
        };
        let error = error.map(|mut e| {
            if !config.include_stacks {
                e.stack = None;
            }
            e
        });

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            request_id: ctx.map(|c| c.request_id.clone()),
            endpoint_id,
            method: ctx.map(|c| c.method.clone()),
            path: ctx.map(|c| c.path.clone()),
            duration_ms,
            error,
            data,
        };

        {
            let mut ring = self.inner.ring.write();
            if ring.len() >= self.inner.capacity {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }

        // Non-blocking fan-out; a receiver that lags simply misses entries.
        let _ = self.inner.sender.send(entry.clone());

        if self.inner.emit_to_std {
            write_std(&entry, config.format);
        }
    }

    pub fn trace(&self, category: LogCategory, ctx: Option<&RequestContext>, message: impl Into<String>) {
        self.emit(LogLevel::Trace, category, ctx, message, None, None, None);
    }

    pub fn debug(&self, category: LogCategory, ctx: Option<&RequestContext>, message: impl Into<String>) {
        self.emit(LogLevel::Debug, category, ctx, message, None, None, None);
    }

    pub fn info(&self, category: LogCategory, ctx: Option<&RequestContext>, message: impl Into<String>) {
        self.emit(LogLevel::Info, category, ctx, message, None, None, None);
    }

    pub fn warn(&self, category: LogCategory, ctx: Option<&RequestContext>, message: impl Into<String>) {
        self.emit(LogLevel::Warn, category, ctx, message, None, None, None);
    }

    pub fn error(
        &self,
        category: LogCategory,
        ctx: Option<&RequestContext>,
        message: impl Into<String>,
        error: Option<LogErrorDetail>,
    ) {
        self.emit(LogLevel::Error, category, ctx, message, None, None, error);
    }

    /// Query the ring buffer, oldest first.
    pub fn recent(&self, q: &RecentQuery) -> Vec<LogEntry> {
        let limit = q.limit.unwrap_or(100);
        let min_level = q.level.as_deref().and_then(LogLevel::parse);
        let category = q.category.as_deref().and_then(LogCategory::parse);
        let ring = self.inner.ring.read();
        let selected: Vec<LogEntry> = ring
            .iter()
            .rev()
            .filter(|e| {
                if let Some(min) = min_level {
                    if e.level < min {
                        return false;
                    }
                }
                if let Some(cat) = category {
                    if e.category != cat {
                        return false;
                    }
                }
                if let Some(ref rid) = q.request_id {
                    if e.request_id.as_deref() != Some(rid.as_str()) {
                        return false;
                    }
                }
                if let Some(ref eid) = q.endpoint_id {
                    if e.endpoint_id.as_deref() != Some(eid.as_str()) {
                        return false;
                    }
                }
                true
            })
            .take(limit)
            .cloned()
            .collect();
        selected.into_iter().rev().collect()
    }

    pub fn clear(&self) {
        self.inner.ring.write().clear();
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.ring.read().len()
    }

    /// Subscribe to live entries. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

/// Redact sensitive keys and truncate oversized strings, recursively.
fn sanitize(value: &mut Value, max_bytes: usize) {
    match value {
        Value::Object(obj) => {
            for (k, v) in obj.iter_mut() {
                if SENSITIVE_KEY.is_match(k) {
                    *v = Value::String("[REDACTED]".to_string());
                } else {
                    sanitize(v, max_bytes);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize(item, max_bytes);
            }
        }
        Value::String(s) => {
            if s.len() > max_bytes {
                let total = s.len();
                let mut cut = max_bytes;
                while cut > 0 && !s.is_char_boundary(cut) {
                    cut -= 1;
                }
                s.truncate(cut);
                s.push_str(&format!("…[truncated {} B]", total));
            }
        }
        _ => {}
    }
}

/// json format: one JSON line per entry, INFO and below to stdout, WARN
/// and above to stderr. pretty: human-readable single line.
fn write_std(entry: &LogEntry, format: LogFormat) {
    match format {
        LogFormat::Json => {
            if let Ok(line) = serde_json::to_string(entry) {
                if entry.level >= LogLevel::Warn {
                    eprintln!("{}", line);
                } else {
                    println!("{}", line);
                }
            }
        }
        LogFormat::Pretty => {
            let short_rid: String = entry
                .request_id
                .as_deref()
                .map(|r| r.chars().take(8).collect())
                .unwrap_or_else(|| "--------".to_string());
            let duration = entry
                .duration_ms
                .map(|d| format!(" ({}ms)", d))
                .unwrap_or_default();
            let line = format!(
                "{} {:5} {:15} [{}] {}{}",
                entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                entry.level.as_str(),
                entry.category.as_str(),
                short_rid,
                entry.message,
                duration
            );
            if entry.level >= LogLevel::Warn {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_for(endpoint: Option<&str>) -> RequestContext {
        let mut ctx = RequestContext::new("req-123".into(), "GET".into(), "/scim/v2/Users".into());
        ctx.endpoint_id = endpoint.map(String::from);
        ctx
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Fatal < LogLevel::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_category_roundtrip() {
        assert_eq!(LogCategory::parse("scim.user"), Some(LogCategory::ScimUser));
        assert_eq!(LogCategory::ScimPatch.as_str(), "scim.patch");
        assert_eq!(
            serde_json::to_value(LogCategory::ScimFilter).unwrap(),
            json!("scim.filter")
        );
    }

    #[test]
    fn test_ring_buffer_eviction() {
        let logger = Logger::for_tests();
        logger.update_config(|c| c.level = LogLevel::Trace);
        for i in 0..(DEFAULT_BUFFER_CAPACITY + 10) {
            logger.info(LogCategory::General, None, format!("msg {}", i));
        }
        assert_eq!(logger.buffer_len(), DEFAULT_BUFFER_CAPACITY);
        let entries = logger.recent(&RecentQuery {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(entries[0].message, format!("msg {}", DEFAULT_BUFFER_CAPACITY + 9));
    }

    #[test]
    fn test_level_resolution_order() {
        let logger = Logger::for_tests();
        logger.update_config(|c| {
            c.level = LogLevel::Warn;
            c.category_levels
                .insert("scim.patch".to_string(), LogLevel::Debug);
            c.endpoint_levels
                .insert("ep-1".to_string(), LogLevel::Trace);
        });
        // Global: INFO suppressed
        assert!(!logger.enabled(LogLevel::Info, LogCategory::Http, None));
        // Category override admits DEBUG
        assert!(logger.enabled(LogLevel::Debug, LogCategory::ScimPatch, None));
        // Endpoint override wins over category and global
        assert!(logger.enabled(LogLevel::Trace, LogCategory::Http, Some("ep-1")));
        assert!(!logger.enabled(LogLevel::Trace, LogCategory::Http, Some("ep-2")));
    }

    #[test]
    fn test_off_disables_everything() {
        let logger = Logger::for_tests();
        logger.update_config(|c| c.level = LogLevel::Off);
        logger.error(LogCategory::General, None, "nope", None);
        assert_eq!(logger.buffer_len(), 0);
    }

    #[test]
    fn test_entries_inherit_context() {
        let logger = Logger::for_tests();
        let ctx = ctx_for(Some("ep-9"));
        logger.info(LogCategory::ScimUser, Some(&ctx), "created");
        let entries = logger.recent(&RecentQuery::default());
        assert_eq!(entries[0].request_id.as_deref(), Some("req-123"));
        assert_eq!(entries[0].endpoint_id.as_deref(), Some("ep-9"));
        assert_eq!(entries[0].method.as_deref(), Some("GET"));
    }

    #[test]
    fn test_recent_filters() {
        let logger = Logger::for_tests();
        logger.update_config(|c| c.level = LogLevel::Debug);
        let ctx = ctx_for(Some("ep-1"));
        logger.debug(LogCategory::Http, Some(&ctx), "a");
        logger.warn(LogCategory::ScimUser, Some(&ctx), "b");
        logger.warn(LogCategory::ScimUser, None, "c");

        let warns = logger.recent(&RecentQuery {
            level: Some("WARN".into()),
            ..Default::default()
        });
        assert_eq!(warns.len(), 2);

        let by_request = logger.recent(&RecentQuery {
            request_id: Some("req-123".into()),
            ..Default::default()
        });
        assert_eq!(by_request.len(), 2);

        let by_category = logger.recent(&RecentQuery {
            category: Some("http".into()),
            ..Default::default()
        });
        assert_eq!(by_category.len(), 1);

        let by_endpoint = logger.recent(&RecentQuery {
            endpoint_id: Some("ep-1".into()),
            ..Default::default()
        });
        assert_eq!(by_endpoint.len(), 2);
    }

    #[test]
    fn test_redaction() {
        let logger = Logger::for_tests();
        logger.emit(
            LogLevel::Info,
            LogCategory::Auth,
            None,
            "login",
            None,
            Some(json!({
                "userName": "alice",
                "password": "hunter2",
                "Authorization": "Bearer abc",
                "nested": {"apiToken": "xyz", "ok": "fine"}
            })),
            None,
        );
        let entries = logger.recent(&RecentQuery::default());
        let data = entries[0].data.as_ref().unwrap();
        assert_eq!(data["password"], "[REDACTED]");
        assert_eq!(data["Authorization"], "[REDACTED]");
        assert_eq!(data["nested"]["apiToken"], "[REDACTED]");
        assert_eq!(data["nested"]["ok"], "fine");
        assert_eq!(data["userName"], "alice");
    }

    #[test]
    fn test_truncation() {
        let logger = Logger::for_tests();
        logger.update_config(|c| c.max_payload_size_bytes = 16);
        logger.emit(
            LogLevel::Info,
            LogCategory::Http,
            None,
            "big",
            None,
            Some(json!({"body": "x".repeat(100)})),
            None,
        );
        let entries = logger.recent(&RecentQuery::default());
        let body = entries[0].data.as_ref().unwrap()["body"].as_str().unwrap();
        assert!(body.starts_with("xxxxxxxxxxxxxxxx"));
        assert!(body.contains("[truncated 100 B]"));
    }

    #[test]
    fn test_stack_stripping() {
        let logger = Logger::for_tests();
        logger.update_config(|c| c.include_stacks = false);
        logger.error(
            LogCategory::Database,
            None,
            "boom",
            Some(LogErrorDetail {
                message: "db down".into(),
                name: Some("SqlxError".into()),
                stack: Some("at line 1".into()),
            }),
        );
        let entries = logger.recent(&RecentQuery::default());
        let error = entries[0].error.as_ref().unwrap();
        assert_eq!(error.message, "db down");
        assert!(error.stack.is_none());
    }

    #[test]
    fn test_include_payloads_false_drops_data() {
        let logger = Logger::for_tests();
        logger.update_config(|c| c.include_payloads = false);
        logger.emit(
            LogLevel::Info,
            LogCategory::Http,
            None,
            "req",
            None,
            Some(json!({"a": 1})),
            None,
        );
        let entries = logger.recent(&RecentQuery::default());
        assert!(entries[0].data.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_delivery() {
        let logger = Logger::for_tests();
        let mut rx = logger.subscribe();
        logger.warn(LogCategory::Http, None, "live");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "live");
        assert_eq!(entry.level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_suppressed_entry_not_broadcast() {
        let logger = Logger::for_tests();
        logger.update_config(|c| c.level = LogLevel::Warn);
        let mut rx = logger.subscribe();
        logger.info(LogCategory::Http, None, "quiet");
        logger.warn(LogCategory::Http, None, "loud");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "loud");
    }

    #[test]
    fn test_clear() {
        let logger = Logger::for_tests();
        logger.info(LogCategory::General, None, "x");
        assert_eq!(logger.buffer_len(), 1);
        logger.clear();
        assert_eq!(logger.buffer_len(), 0);
    }
}
