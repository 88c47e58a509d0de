use std::collections::HashMap;
use std::net::IpAddr;

use anyhow::{anyhow, Context, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Top-level YAML / control-plane schema. Deserialized as-is, then checked
/// by `validate()` before it is ever used to build a `Snapshot`. `Serialize`
/// is needed too: the config version hash is a SHA-256 over this struct's
/// own canonical JSON encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub upstreams: Vec<UpstreamConfig>,
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
    #[serde(default)]
    pub ip_blocklist: Vec<String>,
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    pub thresholds: ThresholdsConfig,
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub proxy_settings: ProxySettingsConfig,
    pub waf_settings: WafSettingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub hosts: Option<Vec<String>>,
    #[serde(default)]
    pub path_prefixes: Option<Vec<String>>,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub healthcheck_path: Option<String>,
}

fn default_weight() -> i64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    Path,
    PathRaw,
    Query,
    Headers,
    Body,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target: RuleTarget,
    pub pattern: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    pub allow: i64,
    pub challenge: i64,
    pub block: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(alias = "requests_per_minute")]
    pub default_rpm: u32,
    #[serde(default)]
    pub per_path: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettingsConfig {
    pub timeout_seconds: u64,
    pub max_connections: usize,
    pub max_keepalive_connections: usize,
    pub keepalive_expiry_seconds: u64,
    pub retries: u32,
}

impl Default for ProxySettingsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            max_connections: 256,
            max_keepalive_connections: 64,
            keepalive_expiry_seconds: 90,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WafMode {
    Monitor,
    Block,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WafSettingsConfig {
    pub mode: WafMode,
    pub max_inspect_bytes: usize,
    pub max_body_bytes: usize,
    #[serde(default)]
    pub inspect_body: bool,
}

/// A parsed allow/block-list entry: either a single address or a network.
/// `original_source`'s model validator tries a bare IP first, then falls
/// back to a CIDR — we mirror that.
#[derive(Debug, Clone)]
pub enum IpEntry {
    Single(IpAddr),
    Net(IpNet),
}

impl IpEntry {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Ok(IpEntry::Single(ip));
        }
        let net: IpNet = raw
            .parse()
            .with_context(|| format!("'{raw}' is neither an IP address nor a CIDR"))?;
        Ok(IpEntry::Net(net))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match self {
            IpEntry::Single(addr) => *addr == ip,
            IpEntry::Net(net) => net.contains(&ip),
        }
    }
}

pub fn parse_ip_list(raw: &[String]) -> Result<Vec<IpEntry>> {
    raw.iter().map(|s| IpEntry::parse(s)).collect()
}

pub fn parse_cidr_list(raw: &[String]) -> Result<Vec<IpNet>> {
    raw.iter()
        .map(|s| s.parse::<IpNet>().with_context(|| format!("invalid CIDR '{s}'")))
        .collect()
}

impl Config {
    /// Structural validation per the data model's invariants. Individual
    /// rule patterns are allowed to fail here without aborting validation —
    /// the engine drops them at compile time instead (§4.B).
    pub fn validate(&self) -> Result<()> {
        if self.upstreams.is_empty() {
            return Err(anyhow!("at least one upstream is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for up in &self.upstreams {
            if up.base_url.trim().is_empty() {
                return Err(anyhow!("upstream '{}' has an empty base_url", up.name));
            }
            if up.weight < 1 {
                return Err(anyhow!("upstream '{}' weight must be >= 1 (got {})", up.name, up.weight));
            }
            if !seen.insert(up.name.clone()) {
                return Err(anyhow!("duplicate upstream name '{}'", up.name));
            }
        }

        parse_ip_list(&self.ip_allowlist).context("ip_allowlist")?;
        parse_ip_list(&self.ip_blocklist).context("ip_blocklist")?;
        parse_cidr_list(&self.trusted_proxies).context("trusted_proxies")?;

        let t = &self.thresholds;
        if !(t.allow <= t.challenge && t.challenge < t.block) {
            return Err(anyhow!(
                "thresholds must satisfy allow <= challenge < block (got {}, {}, {})",
                t.allow,
                t.challenge,
                t.block
            ));
        }

        if self.waf_settings.max_inspect_bytes > self.waf_settings.max_body_bytes {
            return Err(anyhow!("waf_settings.max_inspect_bytes must be <= max_body_bytes"));
        }

        Ok(())
    }
}
