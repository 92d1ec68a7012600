//! Buffered request-log persistence
//!
//! Audit records are absorbed through a non-blocking enqueue and written
//! in bounded batches so the pipeline never competes with resource
//! writes for the single storage writer. A drain happens when the 3 s
//! timer fires or 50 records are queued, whichever comes first; shutdown
//! flushes whatever is pending. After each batch insert the rows are
//! revisited best-effort to fill the human-friendly `identifier` column.

use crate::domain::NewRequestLog;
use crate::logging::{LogCategory, LogErrorDetail, LogLevel, Logger};
use crate::repository::RequestLogRepository;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const QUEUE_CAPACITY: usize = 1024;
const FLUSH_THRESHOLD: usize = 50;
const FLUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Handle for enqueueing audit records. Cloneable; the drain task exits
/// once every clone is dropped.
#[derive(Clone)]
pub struct RequestLogBuffer {
    tx: mpsc::Sender<NewRequestLog>,
}

impl RequestLogBuffer {
    /// Spawn the drain task. The returned `JoinHandle` completes after
    /// the final flush; await it during shutdown.
    pub fn spawn(
        repo: Arc<dyn RequestLogRepository>,
        logger: Logger,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(drain_loop(rx, repo, logger));
        (Self { tx }, handle)
    }

    /// Non-blocking enqueue; when the queue is saturated the record is
    /// dropped rather than stalling the request.
    pub fn enqueue(&self, record: NewRequestLog) {
        let _ = self.tx.try_send(record);
    }
}

async fn drain_loop(
    mut rx: mpsc::Receiver<NewRequestLog>,
    repo: Arc<dyn RequestLogRepository>,
    logger: Logger,
) {
    let mut pending: Vec<NewRequestLog> = Vec::with_capacity(FLUSH_THRESHOLD);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(record) => {
                    pending.push(record);
                    if pending.len() >= FLUSH_THRESHOLD {
                        flush(&repo, &logger, &mut pending).await;
                    }
                }
                None => {
                    // All senders dropped: final flush, then exit.
                    flush(&repo, &logger, &mut pending).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(&repo, &logger, &mut pending).await;
                }
            }
        }
    }
}

async fn flush(
    repo: &Arc<dyn RequestLogRepository>,
    logger: &Logger,
    pending: &mut Vec<NewRequestLog>,
) {
    let batch = std::mem::take(pending);
    if batch.is_empty() {
        return;
    }
    let count = batch.len();

    let ids = match repo.append_batch(&batch).await {
        Ok(ids) => ids,
        Err(e) => {
            // The batch is dropped; the next enqueue triggers the next flush.
            logger.error(
                LogCategory::Database,
                None,
                format!("Request-log flush of {} records failed", count),
                Some(LogErrorDetail {
                    message: e.detail(),
                    name: Some("RequestLogFlush".to_string()),
                    stack: None,
                }),
            );
            return;
        }
    };

    // Identifier backfill is best-effort; a failed UPDATE only leaves
    // a row without its label.
    for (id, record) in ids.iter().zip(batch.iter()) {
        if let Some(identifier) = derive_identifier(record) {
            if let Err(e) = repo.set_identifier(*id, &identifier).await {
                logger.debug(
                    LogCategory::Database,
                    None,
                    format!("Identifier backfill for row {} failed: {}", id, e.detail()),
                );
            }
        }
    }

    logger.emit(
        LogLevel::Trace,
        LogCategory::Database,
        None,
        format!("Flushed {} request-log records", count),
        None,
        None,
        None,
    );
}

lazy_static! {
    static ref TERMINAL_UUID: Regex = Regex::new(
        r"([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})/?$"
    )
    .unwrap();
}

/// Derive the human identifier for an audit row.
///
/// Users: response userName, then a primary (or first) email value, then
/// externalId; then the same fields from the request; then a terminal
/// UUID in the URL. Groups: response displayName, request displayName,
/// then URL UUID.
pub fn derive_identifier(record: &NewRequestLog) -> Option<String> {
    let path = record.url.split('?').next().unwrap_or(&record.url);
    let response: Option<Value> = record
        .response_body
        .as_deref()
        .and_then(|b| serde_json::from_str(b).ok());
    let request: Option<Value> = record
        .request_body
        .as_deref()
        .and_then(|b| serde_json::from_str(b).ok());

    if record.url.contains("/Users") {
        for body in [&response, &request] {
            if let Some(body) = body {
                if let Some(found) = user_identifier(body) {
                    return Some(found);
                }
            }
        }
    } else if record.url.contains("/Groups") {
        for body in [&response, &request] {
            if let Some(found) = body
                .as_ref()
                .and_then(|b| crate::scim::value::get_ci(b, "displayName"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
            {
                return Some(found.to_string());
            }
        }
    } else {
        return None;
    }

    TERMINAL_UUID
        .captures(path)
        .map(|captures| captures[1].to_string())
}

fn user_identifier(body: &Value) -> Option<String> {
    use crate::scim::value::get_ci;

    if let Some(user_name) = get_ci(body, "userName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        return Some(user_name.to_string());
    }
    if let Some(Value::Array(emails)) = get_ci(body, "emails") {
        let primary = emails
            .iter()
            .find(|e| {
                get_ci(e, "primary")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .or_else(|| emails.first());
        if let Some(value) = primary
            .and_then(|e| get_ci(e, "value"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            return Some(value.to_string());
        }
    }
    get_ci(body, "externalId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
