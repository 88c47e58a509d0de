use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;

/// One JSONL line per request (`access.jsonl`) and one per WAF/rate-limit/
/// size decision (`events.jsonl`) — §10.A. Rotation is hourly via
/// `tracing-appender`; the file format itself is the out-of-scope "logging
/// sink formatting", only the record shape below is part of the core.
#[derive(Clone)]
pub struct ObsSink {
    log_dir: PathBuf,
    access: NonBlocking,
    events: NonBlocking,
}

// Kept alive for the process lifetime; dropping a guard can silently stop
// the writer it belongs to.
static ACCESS_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static EVENTS_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct AccessLog {
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub method: String,
    pub host: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub decision: String,
    pub score: i64,
    pub rule_ids: Vec<String>,
    pub client_ip: Option<String>,
    pub upstream: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SecurityEvent {
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub kind: &'static str,
    pub reason: String,
    pub score: i64,
    pub rule_ids: Vec<String>,
    pub client_ip: Option<String>,
    pub host: String,
    pub path: String,
    pub method: String,
}

#[derive(Serialize)]
struct AccessLine<'a> {
    #[serde(rename = "@timestamp")]
    ts: &'a DateTime<Utc>,
    dataset: &'static str,
    request_id: &'a str,
    method: &'a str,
    host: &'a str,
    path: &'a str,
    status: u16,
    latency_ms: u64,
    decision: &'a str,
    score: i64,
    rule_ids: &'a [String],
    client_ip: &'a Option<String>,
    upstream: &'a Option<String>,
}

#[derive(Serialize)]
struct EventLine<'a> {
    #[serde(rename = "@timestamp")]
    ts: &'a DateTime<Utc>,
    dataset: &'static str,
    request_id: &'a str,
    kind: &'a str,
    reason: &'a str,
    score: i64,
    rule_ids: &'a [String],
    client_ip: &'a Option<String>,
    host: &'a str,
    path: &'a str,
    method: &'a str,
}

impl ObsSink {
    pub fn new(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("create log_dir failed: {}", log_dir.display()))?;

        let access_appender = tracing_appender::rolling::hourly(log_dir, "access.jsonl");
        let events_appender = tracing_appender::rolling::hourly(log_dir, "events.jsonl");

        let (access, ag) = tracing_appender::non_blocking(access_appender);
        let (events, eg) = tracing_appender::non_blocking(events_appender);

        let _ = ACCESS_GUARD.set(ag);
        let _ = EVENTS_GUARD.set(eg);

        Ok(Self {
            log_dir: log_dir.to_path_buf(),
            access,
            events,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn write_access(&self, rec: &AccessLog) {
        let line = AccessLine {
            ts: &rec.ts,
            dataset: "access",
            request_id: &rec.request_id,
            method: &rec.method,
            host: &rec.host,
            path: &rec.path,
            status: rec.status,
            latency_ms: rec.latency_ms,
            decision: &rec.decision,
            score: rec.score,
            rule_ids: &rec.rule_ids,
            client_ip: &rec.client_ip,
            upstream: &rec.upstream,
        };

        if let Ok(json) = serde_json::to_string(&line) {
            let mut w = self.access.make_writer();
            let _ = w.write_all(json.as_bytes());
            let _ = w.write_all(b"\n");
        }
    }

    pub fn write_event(&self, rec: &SecurityEvent) {
        let line = EventLine {
            ts: &rec.ts,
            dataset: "events",
            request_id: &rec.request_id,
            kind: rec.kind,
            reason: &rec.reason,
            score: rec.score,
            rule_ids: &rec.rule_ids,
            client_ip: &rec.client_ip,
            host: &rec.host,
            path: &rec.path,
            method: &rec.method,
        };

        if let Ok(json) = serde_json::to_string(&line) {
            let mut w = self.events.make_writer();
            let _ = w.write_all(json.as_bytes());
            let _ = w.write_all(b"\n");
        }
    }
}
