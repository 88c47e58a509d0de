use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use pingora::http::RequestHeader;

use crate::config::types::ProxySettingsConfig;
use crate::errors::ApiError;
use crate::headers;

/// Chunk size the pipeline re-buffers upstream responses into before
/// handing them to the client write path (§4.F).
pub const STREAM_CHUNK_BYTES: usize = 8 * 1024;

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

pub struct ForwardedResponse {
    pub status: u16,
    pub headers: http::HeaderMap,
    pub body: BodyStream,
}

/// The one connection-pooled HTTP client that ever opens upstream sockets
/// (§4.F "Shared client"). Built once per `Snapshot` from `proxy_settings`.
pub struct Forwarder {
    client: reqwest::Client,
    retries: u32,
}

impl Forwarder {
    pub fn new(settings: &ProxySettingsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .pool_max_idle_per_host(settings.max_keepalive_connections)
            .pool_idle_timeout(Duration::from_secs(settings.keepalive_expiry_seconds))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("building upstream http client")?;
        Ok(Self {
            client,
            retries: settings.retries,
        })
    }

    /// Compose the upstream URL, filter/augment headers, send the request
    /// (prebuffered body if one was already read for size enforcement,
    /// otherwise none), and hand back a streaming response.
    pub async fn forward(
        &self,
        base_url: &str,
        req: &RequestHeader,
        client_ip: IpAddr,
        prebuffered_body: Option<Bytes>,
        scheme: &str,
        host: &str,
    ) -> Result<ForwardedResponse, ApiError> {
        let url = compose_url(base_url, req.uri.path(), req.uri.query());
        let method = reqwest::Method::from_bytes(req.method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let idempotent = matches!(req.method.as_str(), "GET" | "HEAD" | "OPTIONS");

        let mut out_headers = req.headers.clone();
        headers::filter_request(&mut out_headers);
        headers::add_forwarding(&mut out_headers, client_ip, scheme, host);

        let attempts = if self.retries > 0 && idempotent {
            1 + self.retries
        } else {
            1
        };

        let mut last_err = ApiError::UpstreamError {
            kind: "connection",
            message: "no attempt made".to_string(),
        };

        for attempt in 0..attempts {
            let mut builder = self
                .client
                .request(method.clone(), &url)
                .headers(out_headers.clone());
            if let Some(body) = &prebuffered_body {
                builder = builder.body(body.clone());
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let mut resp_headers = resp.headers().clone();
                    headers::filter_response(&mut resp_headers);
                    let body = resp.bytes_stream().map(|chunk| {
                        chunk.map_err(|e| ApiError::UpstreamError {
                            kind: "protocol",
                            message: e.to_string(),
                        })
                    });
                    return Ok(ForwardedResponse {
                        status,
                        headers: resp_headers,
                        body: Box::pin(body),
                    });
                }
                Err(e) if e.is_timeout() => {
                    last_err = ApiError::UpstreamError {
                        kind: "timeout",
                        message: "upstream timeout".to_string(),
                    };
                    break;
                }
                Err(e) => {
                    last_err = ApiError::UpstreamError {
                        kind: "connection",
                        message: e.to_string(),
                    };
                    if attempt + 1 >= attempts {
                        break;
                    }
                }
            }
        }

        Err(last_err)
    }
}

fn compose_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    let trimmed = base_url.trim_end_matches('/');
    match query {
        Some(q) if !q.is_empty() => format!("{trimmed}{path}?{q}"),
        _ => format!("{trimmed}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_url_with_and_without_query() {
        assert_eq!(compose_url("http://up/", "/x", None), "http://up/x");
        assert_eq!(compose_url("http://up", "/x", Some("a=1")), "http://up/x?a=1");
        assert_eq!(compose_url("http://up/", "/x", Some("")), "http://up/x");
    }
}
