use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pingora::prelude::*;
use pingora_proxy::http_proxy_service;

mod config;
mod control_plane;
mod errors;
mod forwarder;
mod headers;
mod metrics;
mod normalize;
mod obs;
mod router;
mod server;
mod telemetry;
mod waf;

use config::{ConfigManager, Snapshot};
use control_plane::ControlPlanePoller;
use waf::ratelimit::BucketSweeper;

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn main() -> anyhow::Result<()> {
    let config_path = env_path("CONFIG_PATH", "config.yaml");
    let log_dir = env_path("LOG_DIR", "./logs");
    let listen_addr = env_string("LISTEN_ADDR", "0.0.0.0:8080");

    telemetry::init_tracing("aegis-waf", &log_dir)?;
    let obs = obs::ObsSink::new(&log_dir)?;

    let cfg_text = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("reading config file '{}': {e}", config_path.display()))?;
    let cfg: config::Config = serde_yaml::from_str(&cfg_text)
        .map_err(|e| anyhow::anyhow!("parsing config file '{}': {e}", config_path.display()))?;
    cfg.validate()?;

    let snapshot = Snapshot::build(cfg)?;
    tracing::info!(version = %snapshot.version.version_hash, "config loaded");
    metrics::counters::observe_reload(&snapshot.version);
    let manager = Arc::new(ConfigManager::new(snapshot));

    let mut my_server = Server::new(None)?;
    my_server.bootstrap();

    let sweeper = background_service("rate-limit-sweeper", BucketSweeper::new(manager.clone()));
    my_server.add_service(sweeper);

    if let Ok(url) = std::env::var("CONTROL_PLANE_URL") {
        let token = env_string("CONTROL_PLANE_TOKEN", "");
        let poll_seconds: u64 = std::env::var("CONTROL_PLANE_POLL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let poller = ControlPlanePoller::new(manager.clone(), url, token, Duration::from_secs(poll_seconds));
        my_server.add_service(background_service("control-plane-poller", poller));
    }

    let proxy = server::proxy::WafProxy::new(manager.clone(), obs);
    let mut svc = http_proxy_service(&my_server.configuration, proxy);
    svc.add_tcp(&listen_addr);
    my_server.add_service(svc);

    tracing::info!(%listen_addr, "aegis-waf listening");
    my_server.run_forever();
}
