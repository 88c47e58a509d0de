use serde::Serialize;
use thiserror::Error;

/// Every error shape the request pipeline can surface to a client.
///
/// Variants map 1:1 onto an HTTP status and a small JSON body; nothing
/// downstream of the pipeline ever sees a raw `anyhow`/`pingora` error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited")]
    RateLimited,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("blocked by waf")]
    WafBlocked { score: i64, rule_ids: Vec<String> },

    #[error("no upstream available")]
    NoUpstream,

    #[error("upstream error: {message}")]
    UpstreamError { kind: &'static str, message: String },

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::RateLimited => 429,
            ApiError::PayloadTooLarge => 413,
            ApiError::WafBlocked { .. } => 403,
            ApiError::NoUpstream => 502,
            ApiError::UpstreamError { .. } => 502,
            ApiError::Internal => 500,
        }
    }

    /// The `error_type` label used on `upstream_errors_total`, if applicable.
    pub fn upstream_error_type(&self) -> Option<&'static str> {
        match self {
            ApiError::UpstreamError { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn body(&self, request_id: &str) -> Vec<u8> {
        #[derive(Serialize)]
        struct RateLimited<'a> {
            error: &'a str,
            message: &'a str,
            request_id: &'a str,
        }
        #[derive(Serialize)]
        struct Simple<'a> {
            error: &'a str,
            request_id: &'a str,
        }
        #[derive(Serialize)]
        struct WithMessage<'a> {
            error: &'a str,
            message: &'a str,
            request_id: &'a str,
        }
        #[derive(Serialize)]
        struct WafBody<'a> {
            blocked: bool,
            reason: &'a str,
            score: i64,
            rule_ids: &'a [String],
            request_id: &'a str,
        }

        let json = match self {
            ApiError::RateLimited => serde_json::to_vec(&RateLimited {
                error: "rate_limited",
                message: "too many requests",
                request_id,
            }),
            ApiError::PayloadTooLarge => serde_json::to_vec(&Simple {
                error: "payload_too_large",
                request_id,
            }),
            ApiError::WafBlocked { score, rule_ids } => serde_json::to_vec(&WafBody {
                blocked: true,
                reason: "waf",
                score: *score,
                rule_ids,
                request_id,
            }),
            ApiError::NoUpstream => serde_json::to_vec(&Simple {
                error: "no_upstream",
                request_id,
            }),
            ApiError::UpstreamError { message, .. } => serde_json::to_vec(&WithMessage {
                error: "upstream_error",
                message,
                request_id,
            }),
            ApiError::Internal => serde_json::to_vec(&Simple {
                error: "internal_error",
                request_id,
            }),
        };
        json.unwrap_or_else(|_| b"{}".to_vec())
    }
}
