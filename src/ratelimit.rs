//! Per-client rate limiting.
//!
//! A fixed window counter keyed by a hash of client IP and user agent.
//! The distributed backend (Upstash REST, atomic INCR + PEXPIRE) is
//! consulted first so the limit holds across server instances; when it is
//! unreachable the in-process fallback takes over for the duration of the
//! outage. The fallback is less durable (counters reset on restart),
//! which is an accepted degradation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::Config;

const REMOTE_TIMEOUT_SECS: u64 = 5;

/// Outcome of one limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
}

impl Decision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: u32::MAX,
        }
    }
}

#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    async fn check(&self, key: &str) -> Result<Decision>;
}

/// Stable client identity: same IP and user agent hash to the same key,
/// and the raw values never reach the rate-limit store.
pub fn client_key(ip: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

/// Combined limiter: remote first, local on remote failure. A zero
/// `max_requests` disables limiting entirely.
pub struct RateLimiter {
    max_requests: u32,
    remote: Option<Box<dyn RateLimitBackend>>,
    local: LocalLimiter,
}

impl RateLimiter {
    pub fn from_config(config: &Config) -> Self {
        let max_requests = config.rate_limit.max_requests;
        let window = Duration::from_secs(config.rate_limit.window_secs);

        let remote: Option<Box<dyn RateLimitBackend>> = match (
            &config.secrets.ratelimit_rest_url,
            &config.secrets.ratelimit_rest_token,
        ) {
            (Some(url), Some(token)) => Some(Box::new(RemoteLimiter::new(
                url.clone(),
                token.clone(),
                max_requests,
                window,
            ))),
            _ => None,
        };

        Self {
            max_requests,
            remote,
            local: LocalLimiter::new(max_requests, window),
        }
    }

    #[cfg(test)]
    fn with_remote(
        max_requests: u32,
        window: Duration,
        remote: Option<Box<dyn RateLimitBackend>>,
    ) -> Self {
        Self {
            max_requests,
            remote,
            local: LocalLimiter::new(max_requests, window),
        }
    }

    pub async fn check(&self, key: &str) -> Decision {
        if self.max_requests == 0 {
            return Decision::unlimited();
        }

        if let Some(remote) = &self.remote {
            match remote.check(key).await {
                Ok(decision) => return decision,
                Err(err) => {
                    warn!(%err, "remote rate limiter unavailable, using local fallback");
                }
            }
        }

        self.local.count(key).await
    }
}

/// Upstash REST backend. One pipelined round trip per check: INCR the
/// window counter, then PEXPIRE NX so the first hit of a window sets its
/// expiry.
pub struct RemoteLimiter {
    client: reqwest::Client,
    base_url: String,
    token: String,
    max_requests: u32,
    window: Duration,
}

impl RemoteLimiter {
    pub fn new(base_url: String, token: String, max_requests: u32, window: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REMOTE_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            max_requests,
            window,
        }
    }
}

#[async_trait]
impl RateLimitBackend for RemoteLimiter {
    async fn check(&self, key: &str) -> Result<Decision> {
        let redis_key = format!("ratelimit:{}", key);
        let window_ms = self.window.as_millis() as u64;
        let body = serde_json::json!([
            ["INCR", redis_key],
            ["PEXPIRE", redis_key, window_ms, "NX"],
        ]);

        let response = self
            .client
            .post(format!("{}/pipeline", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("rate limit store request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("rate limit store returned {}", status);
        }

        let results: serde_json::Value = response
            .json()
            .await
            .context("rate limit store response was not JSON")?;
        let count = results
            .get(0)
            .and_then(|r| r.get("result"))
            .and_then(|c| c.as_u64())
            .context("rate limit store response missing INCR result")?;

        Ok(Decision {
            allowed: count <= self.max_requests as u64,
            remaining: (self.max_requests as u64).saturating_sub(count) as u32,
        })
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// In-process fixed window counters. Increment-and-compare happens under
/// one lock acquisition so concurrent requests cannot both pass at the
/// boundary.
pub struct LocalLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<HashMap<String, Window>>,
}

impl LocalLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub async fn count(&self, key: &str) -> Decision {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if state.len() > 1024 {
            let window = self.window;
            state.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = state.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;

        Decision {
            allowed: entry.count <= self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
        }
    }
}

#[async_trait]
impl RateLimitBackend for LocalLimiter {
    async fn check(&self, key: &str) -> Result<Decision> {
        Ok(self.count(key).await)
    }
}
