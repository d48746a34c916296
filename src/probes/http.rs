use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::EngineError;

/// Timeout for a connection check when the caller gives none.
pub const DEFAULT_CHECK_TIMEOUT_MS: u64 = 30_000;

/// Outcome of probing a connection's base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    /// True for a 2xx response.
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: f64,
}

impl ConnectionCheck {
    fn failed(error: String, latency_ms: f64) -> Self {
        Self {
            success: false,
            status_code: None,
            message: None,
            error: Some(error),
            latency_ms,
        }
    }
}

/// HTTP probe: a single HEAD request against a base URL.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, EngineError> {
        let client = Client::builder()
            .build()
            .map_err(|e| EngineError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn check(
        &self,
        base_url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> ConnectionCheck {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let parsed = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| e.to_string())
                .and_then(|n| HeaderValue::from_str(value).map(|v| (n, v)).map_err(|e| e.to_string()));
            match parsed {
                Ok((n, v)) => {
                    header_map.insert(n, v);
                }
                Err(e) => return ConnectionCheck::failed(format!("invalid header {:?}: {}", name, e), 0.0),
            }
        }

        let start = Instant::now();
        let result = self
            .client
            .head(base_url)
            .headers(header_map)
            .timeout(timeout)
            .send()
            .await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(resp) => {
                let status = resp.status();
                debug!(%base_url, status = status.as_u16(), latency_ms, "connection check answered");
                ConnectionCheck {
                    success: status.is_success(),
                    status_code: Some(status.as_u16()),
                    message: Some(if status.is_success() {
                        "Connection successful".to_string()
                    } else {
                        format!("HTTP {}", status.as_u16())
                    }),
                    error: None,
                    latency_ms,
                }
            }
            Err(e) if e.is_timeout() => ConnectionCheck::failed(
                format!("request timed out after {}ms", timeout.as_millis()),
                latency_ms,
            ),
            Err(e) => ConnectionCheck::failed(e.to_string(), latency_ms),
        }
    }
}
