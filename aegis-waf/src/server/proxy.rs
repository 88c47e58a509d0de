use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use pingora::http::ResponseHeader;
use pingora::upstreams::peer::HttpPeer;
use pingora_proxy::{ProxyHttp, Session};

use crate::config::snapshot::ConfigManager;
use crate::errors::ApiError;
use crate::forwarder::{ForwardedResponse, STREAM_CHUNK_BYTES};
use crate::metrics;
use crate::normalize;
use crate::obs::{AccessLog, ObsSink, SecurityEvent};
use crate::waf::decision::VerdictKind;

static REQUEST_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

/// Cheap, collision-resistant enough for correlating one request across
/// access/event logs: a millisecond timestamp plus a monotonic counter.
fn gen_request_id() -> String {
    let n = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = Utc::now().timestamp_millis();
    format!("req-{ts:x}-{n:x}")
}

/// §4.G: requests to these paths bypass rate-limit, WAF, body-size
/// enforcement and routing entirely, and are answered locally.
fn is_bypass_path(path: &str) -> bool {
    path == "/" || path.starts_with("/_waf/")
}

pub struct WafProxy {
    config: Arc<ConfigManager>,
    obs: ObsSink,
}

impl WafProxy {
    pub fn new(config: Arc<ConfigManager>, obs: ObsSink) -> Self {
        Self { config, obs }
    }

    async fn handle_local_endpoint(
        &self,
        session: &mut Session,
        path: &str,
        request_id: &str,
    ) -> pingora::Result<()> {
        let (status, content_type, body): (u16, &str, Vec<u8>) = match path {
            "/_waf/healthz" => (200, "application/json", br#"{"status":"healthy"}"#.to_vec()),
            "/_waf/readyz" => (200, "application/json", br#"{"status":"ready"}"#.to_vec()),
            "/_waf/metrics" => (
                200,
                "text/plain; version=0.0.4",
                metrics::registry::gather_as_text().into_bytes(),
            ),
            "/" => (
                200,
                "application/json",
                serde_json::to_vec(&serde_json::json!({
                    "name": "aegis-waf",
                    "version": env!("CARGO_PKG_VERSION"),
                    "links": {
                        "healthz": "/_waf/healthz",
                        "readyz": "/_waf/readyz",
                        "metrics": "/_waf/metrics",
                    }
                }))
                .unwrap_or_else(|_| b"{}".to_vec()),
            ),
            _ => (404, "application/json", br#"{"error":"not_found"}"#.to_vec()),
        };

        let body = Bytes::from(body);
        let mut resp = ResponseHeader::build(status, None)?;
        resp.insert_header("content-type", content_type)?;
        resp.insert_header("content-length", body.len().to_string())?;
        resp.insert_header("x-request-id", request_id)?;
        session.write_response_header(Box::new(resp), false).await?;
        session.write_response_body(Some(body), true).await?;
        Ok(())
    }

    /// Buffer the request body chunk by chunk, aborting as soon as the
    /// running length exceeds `max_bytes` (§4.G step 4, §8 property 8). A
    /// client I/O failure mid-read is `internal_error` per §7, distinct from
    /// the client simply sending too much.
    async fn read_body_capped(&self, session: &mut Session, max_bytes: usize) -> Result<Bytes, ApiError> {
        let mut buf = Vec::new();
        loop {
            match session.read_request_body().await {
                Ok(Some(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    if buf.len() > max_bytes {
                        return Err(ApiError::PayloadTooLarge);
                    }
                }
                Ok(None) => break,
                Err(_) => return Err(ApiError::Internal),
            }
        }
        Ok(Bytes::from(buf))
    }

    fn decision_headers(resp: &mut ResponseHeader, ctx: &ProxyCtx) -> pingora::Result<()> {
        resp.insert_header("x-request-id", ctx.request_id.as_str())?;
        resp.insert_header("x-waf-decision", ctx.decision.as_deref().unwrap_or("ALLOW"))?;
        resp.insert_header("x-waf-score", ctx.score.to_string())?;
        Ok(())
    }

    async fn respond_error(
        &self,
        session: &mut Session,
        ctx: &mut ProxyCtx,
        err: &ApiError,
    ) -> pingora::Result<bool> {
        ctx.status = err.status();
        let body = Bytes::from(err.body(&ctx.request_id));
        let mut resp = ResponseHeader::build(err.status(), None)?;
        resp.insert_header("content-type", "application/json")?;
        resp.insert_header("content-length", body.len().to_string())?;
        Self::decision_headers(&mut resp, ctx)?;
        session.write_response_header(Box::new(resp), false).await?;
        session.write_response_body(Some(body), true).await?;

        self.log_event_for_error(ctx, err);
        self.log_access(ctx, err.status(), None);
        Ok(true)
    }

    async fn write_forwarded(
        &self,
        session: &mut Session,
        ctx: &mut ProxyCtx,
        forwarded: ForwardedResponse,
    ) -> pingora::Result<bool> {
        ctx.status = forwarded.status;

        let mut resp = ResponseHeader::build(forwarded.status, None)?;
        for (name, value) in forwarded.headers.iter() {
            let _ = resp.insert_header(name.as_str(), value.as_bytes());
        }
        Self::decision_headers(&mut resp, ctx)?;
        session.write_response_header(Box::new(resp), false).await?;

        let mut stream = forwarded.body;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for piece in bytes.chunks(STREAM_CHUNK_BYTES) {
                        session
                            .write_response_body(Some(Bytes::copy_from_slice(piece)), false)
                            .await?;
                    }
                }
                Err(_) => break,
            }
        }
        session.write_response_body(None, true).await?;

        let upstream = ctx.upstream.clone();
        self.log_access(ctx, forwarded.status, upstream);
        Ok(true)
    }

    fn log_event_for_error(&self, ctx: &ProxyCtx, err: &ApiError) {
        let kind = match err {
            ApiError::RateLimited => "rate_limited",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::WafBlocked { .. } => "waf_blocked",
            ApiError::NoUpstream => "no_upstream",
            ApiError::UpstreamError { .. } => "upstream_error",
            ApiError::Internal => "internal_error",
        };
        self.obs.write_event(&SecurityEvent {
            ts: Utc::now(),
            request_id: ctx.request_id.clone(),
            kind,
            reason: err.to_string(),
            score: ctx.score,
            rule_ids: ctx.rule_ids.clone(),
            client_ip: ctx.client_ip.map(|ip| ip.to_string()),
            host: ctx.host.clone().unwrap_or_default(),
            path: ctx.path.clone(),
            method: ctx.method.clone(),
        });
    }

    fn log_access(&self, ctx: &ProxyCtx, status: u16, upstream: Option<String>) {
        let decision = ctx.decision.clone().unwrap_or_else(|| "ALLOW".to_string());
        let latency_ms = ctx.start.map(|s| s.elapsed().as_millis() as u64).unwrap_or(0);

        self.obs.write_access(&AccessLog {
            ts: Utc::now(),
            request_id: ctx.request_id.clone(),
            method: ctx.method.clone(),
            host: ctx.host.clone().unwrap_or_default(),
            path: ctx.path.clone(),
            status,
            latency_ms,
            decision: decision.clone(),
            score: ctx.score,
            rule_ids: ctx.rule_ids.clone(),
            client_ip: ctx.client_ip.map(|ip| ip.to_string()),
            upstream,
        });

        metrics::counters::observe_duration(
            &decision,
            ctx.start.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0),
        );
    }
}

#[derive(Default)]
pub struct ProxyCtx {
    pub request_id: String,
    pub start: Option<Instant>,
    pub client_ip: Option<IpAddr>,
    pub host: Option<String>,
    pub method: String,
    pub path: String,
    pub decision: Option<String>,
    pub score: i64,
    pub rule_ids: Vec<String>,
    pub status: u16,
    pub upstream: Option<String>,
}

#[async_trait]
impl ProxyHttp for WafProxy {
    type CTX = ProxyCtx;

    fn new_ctx(&self) -> Self::CTX {
        ProxyCtx::default()
    }

    /// Orchestrates §4.G end to end and always answers the client itself —
    /// `upstream_peer` is never reached. Forwarding goes through our own
    /// pooled client (`Forwarder`) so the pipeline can prebuffer and size-
    /// check the body before a single byte reaches the upstream.
    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> pingora::Result<bool> {
        ctx.start = Some(Instant::now());
        ctx.request_id = gen_request_id();

        let req = session.req_header().clone();
        let path = req.uri.path().to_string();
        ctx.method = req.method.to_string();
        ctx.path = path.clone();

        let host = req
            .headers
            .get("host")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        ctx.host = host.clone();

        if is_bypass_path(&path) {
            self.handle_local_endpoint(session, &path, &ctx.request_id).await?;
            return Ok(true);
        }

        let snapshot = self.config.current();
        metrics::counters::inc_request(host.as_deref().unwrap_or("-"));

        let peer_ip = session
            .client_addr()
            .and_then(|a| a.to_string().parse::<std::net::SocketAddr>().ok())
            .map(|sa| sa.ip());
        let trusted = snapshot.trusted_proxies().unwrap_or_default();
        let client_ip = normalize::client_ip(&req, peer_ip, &trusted);
        ctx.client_ip = Some(client_ip);

        // 1. rate limit
        let limit = snapshot
            .config
            .rate_limits
            .per_path
            .get(&path)
            .copied()
            .unwrap_or(snapshot.config.rate_limits.default_rpm);
        if !snapshot.limiter.allow(&client_ip.to_string(), limit) {
            metrics::counters::inc_rate_limited();
            return self.respond_error(session, ctx, &ApiError::RateLimited).await;
        }

        // 2. body-size enforcement + prebuffering
        let max_body = snapshot.config.waf_settings.max_body_bytes;
        let body_bearing = matches!(req.method.as_str(), "POST" | "PUT" | "PATCH");
        let mut body: Option<Bytes> = None;
        if body_bearing {
            if let Some(declared_len) = req
                .headers
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok())
            {
                if declared_len > max_body {
                    return self.respond_error(session, ctx, &ApiError::PayloadTooLarge).await;
                }
            }
            match self.read_body_capped(session, max_body).await {
                Ok(buf) => body = Some(buf),
                Err(err) => return self.respond_error(session, ctx, &err).await,
            }
        }

        // 3. inspection + verdict
        let decoded_path = normalize::decode_path(req.uri.path());
        let canon_path = normalize::canonicalize(&decoded_path);
        let query = req.uri.query().map(normalize::normalize_query).unwrap_or_default();
        let headers_digest = normalize::header_digest(&req);
        let body_for_inspect = if snapshot.config.waf_settings.inspect_body {
            body.as_deref()
        } else {
            None
        };
        let inspection = normalize::build_inspection(
            decoded_path,
            canon_path.clone(),
            query,
            headers_digest,
            body_for_inspect,
            snapshot.config.waf_settings.max_inspect_bytes,
        );

        let verdict = snapshot.engine.evaluate(&inspection, client_ip);
        ctx.score = verdict.score;
        ctx.rule_ids = verdict.rule_ids.clone();
        ctx.decision = Some(verdict.kind.as_str().to_string());
        metrics::counters::inc_decision(verdict.kind.as_str());

        if verdict.kind == VerdictKind::Block {
            let err = ApiError::WafBlocked {
                score: verdict.score,
                rule_ids: verdict.rule_ids.clone(),
            };
            return self.respond_error(session, ctx, &err).await;
        }

        // 4. route
        let Some(upstream) = snapshot.router.get_upstream(host.as_deref(), &canon_path) else {
            return self.respond_error(session, ctx, &ApiError::NoUpstream).await;
        };
        ctx.upstream = Some(upstream.name.clone());

        // 5. forward
        match snapshot
            .forwarder
            .forward(&upstream.base_url, &req, client_ip, body, "http", host.as_deref().unwrap_or(""))
            .await
        {
            Ok(resp) => self.write_forwarded(session, ctx, resp).await,
            Err(err) => {
                if let Some(kind) = err.upstream_error_type() {
                    metrics::counters::inc_upstream_error(kind);
                }
                self.respond_error(session, ctx, &err).await
            }
        }
    }

    /// Never reached: `request_filter` always returns `Ok(true)` and does
    /// its own forwarding through `Forwarder`, so pingora's own upstream
    /// connection machinery is never engaged. Still required by `ProxyHttp`.
    async fn upstream_peer(&self, _session: &mut Session, _ctx: &mut Self::CTX) -> pingora::Result<Box<HttpPeer>> {
        Err(pingora::Error::new(pingora::ErrorType::InternalError))
    }
}
