use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pingora::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;
use reqwest::StatusCode;

use crate::config::snapshot::{ConfigManager, Snapshot};
use crate::config::types::Config;
use crate::metrics::counters;

/// Polls the control plane at a fixed interval with `If-None-Match`, and
/// atomically swaps in a new `Snapshot` whenever it returns a changed,
/// validated config (§4.H "Hot reload"). A 304, an unreachable endpoint, or
/// a config that fails validation all leave the current snapshot untouched
/// and bump `waf_config_reload_failure_total`.
pub struct ControlPlanePoller {
    manager: Arc<ConfigManager>,
    url: String,
    token: String,
    interval: Duration,
    client: reqwest::Client,
}

impl ControlPlanePoller {
    pub fn new(manager: Arc<ConfigManager>, url: String, token: String, interval: Duration) -> Self {
        Self {
            manager,
            url,
            token,
            interval,
            client: reqwest::Client::new(),
        }
    }

    async fn poll_once(&self, etag: &mut Option<String>) {
        let mut request = self.client.get(&self.url).bearer_auth(&self.token);
        if let Some(tag) = etag.as_deref() {
            request = request.header("If-None-Match", tag);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "control plane poll request failed");
                counters::inc_config_reload_failure();
                return;
            }
        };

        match response.status() {
            StatusCode::NOT_MODIFIED => {}
            StatusCode::OK => self.apply(response, etag).await,
            other => {
                tracing::warn!(status = %other, "control plane returned unexpected status");
                counters::inc_config_reload_failure();
            }
        }
    }

    async fn apply(&self, response: reqwest::Response, etag: &mut Option<String>) {
        let new_etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "control plane response body unreadable");
                counters::inc_config_reload_failure();
                return;
            }
        };

        let config: Config = match serde_json::from_str(&body) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "control plane config is not valid JSON");
                counters::inc_config_reload_failure();
                return;
            }
        };

        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "control plane config failed validation");
            counters::inc_config_reload_failure();
            return;
        }

        match Snapshot::build(config) {
            Ok(snapshot) => {
                counters::observe_reload(&snapshot.version);
                tracing::info!(version = %snapshot.version.version_hash, "config reloaded from control plane");
                self.manager.swap(snapshot);
                *etag = new_etag;
            }
            Err(e) => {
                tracing::warn!(error = %e, "control plane config failed to build a snapshot");
                counters::inc_config_reload_failure();
            }
        }
    }
}

#[async_trait]
impl BackgroundService for ControlPlanePoller {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let mut etag: Option<String> = None;
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("control plane poller shutdown");
                    return;
                }
                _ = ticker.tick() => {
                    self.poll_once(&mut etag).await;
                }
            }
        }
    }
}
