use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::forwarder::Forwarder;
use crate::router::Router;
use crate::waf::engine::RuleEngine;
use crate::waf::ratelimit::RateLimiter;

use super::types::Config;

/// `{version_hash, loaded_at, last_error}` (§3). Computed locally on every
/// successful load, local file or control-plane, so the metric is always
/// meaningful even with no control plane configured.
#[derive(Debug, Clone)]
pub struct ConfigVersion {
    pub version_hash: String,
    pub loaded_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ConfigVersion {
    fn compute(config: &Config) -> Result<Self> {
        // `serde_json::Value`'s default map is BTreeMap-backed, so this
        // serialization is already canonical (sorted keys) without any
        // extra normalization pass.
        let canonical = serde_json::to_vec(config)?;
        let digest = Sha256::digest(&canonical);
        let version_hash = hex_prefix(&digest, 12);
        Ok(Self {
            version_hash,
            loaded_at: Utc::now(),
            last_error: None,
        })
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for b in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{b:02x}"));
    }
    out.truncate(chars);
    out
}

/// One fully-built, immutable generation of the dataplane (§4.H "Atomic
/// swap"): the compiled rule engine, router, rate limiter, and
/// connection-pooled forwarder, bundled with the settings derived from the
/// same `Config`. A reload replaces this whole struct in one step; readers
/// never observe a mixture of old and new fields.
pub struct Snapshot {
    pub engine: RuleEngine,
    pub router: Router,
    pub limiter: RateLimiter,
    pub forwarder: Forwarder,
    pub config: Config,
    pub version: ConfigVersion,
}

impl Snapshot {
    pub fn build(config: Config) -> Result<Self> {
        config.validate()?;
        let version = ConfigVersion::compute(&config)?;
        let allowlist = super::types::parse_ip_list(&config.ip_allowlist)?;
        let blocklist = super::types::parse_ip_list(&config.ip_blocklist)?;

        let engine = RuleEngine::new(
            allowlist,
            blocklist,
            &config.rules,
            config.thresholds,
            config.waf_settings.mode,
            config.waf_settings.max_inspect_bytes,
        );
        let router = Router::new(config.upstreams.clone());
        let limiter = RateLimiter::new();
        let forwarder = Forwarder::new(&config.proxy_settings)?;

        Ok(Self {
            engine,
            router,
            limiter,
            forwarder,
            config,
            version,
        })
    }

    pub fn trusted_proxies(&self) -> Result<Vec<ipnet::IpNet>> {
        super::types::parse_cidr_list(&self.config.trusted_proxies)
    }
}

/// Holds the current `Snapshot` behind a lock-free atomic pointer (§5
/// "published under a publication primitive that guarantees safe reader
/// visibility"). Readers clone the `Arc` once per request and never lock.
pub struct ConfigManager {
    current: ArcSwap<Snapshot>,
}

impl ConfigManager {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn swap(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{
        ProxySettingsConfig, RateLimitConfig, ThresholdsConfig, UpstreamConfig, WafMode,
        WafSettingsConfig,
    };

    fn minimal_config() -> Config {
        Config {
            upstreams: vec![UpstreamConfig {
                name: "default".into(),
                base_url: "http://127.0.0.1:8080".into(),
                hosts: None,
                path_prefixes: None,
                weight: 1,
                healthcheck_path: None,
            }],
            ip_allowlist: vec![],
            ip_blocklist: vec![],
            trusted_proxies: vec![],
            rules: vec![],
            thresholds: ThresholdsConfig { allow: 5, challenge: 6, block: 10 },
            rate_limits: RateLimitConfig { default_rpm: 600, per_path: Default::default() },
            proxy_settings: ProxySettingsConfig::default(),
            waf_settings: WafSettingsConfig {
                mode: WafMode::Block,
                max_inspect_bytes: 4096,
                max_body_bytes: 1_000_000,
                inspect_body: false,
            },
        }
    }

    #[test]
    fn build_computes_stable_version_hash() {
        let a = Snapshot::build(minimal_config()).unwrap();
        let b = Snapshot::build(minimal_config()).unwrap();
        assert_eq!(a.version.version_hash, b.version.version_hash);
        assert_eq!(a.version.version_hash.len(), 12);
    }

    #[test]
    fn manager_swap_replaces_current_atomically() {
        let manager = ConfigManager::new(Snapshot::build(minimal_config()).unwrap());
        let first = manager.current().version.version_hash.clone();

        let mut second_cfg = minimal_config();
        second_cfg.thresholds.block = 20;
        manager.swap(Snapshot::build(second_cfg).unwrap());

        let second = manager.current();
        assert_ne!(first, second.version.version_hash);
        assert_eq!(second.config.thresholds.block, 20);
    }
}
