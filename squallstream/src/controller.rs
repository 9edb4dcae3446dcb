//! Client for the control-plane HTTP service.
//!
//! The controller is a simple key/value config store plus a counter sink.
//! Config reads are cached for [`CACHE_LIFE`]; an unreachable controller
//! triggers a [`RETRY_DELAY`] cooldown during which the caller-supplied
//! default is returned. Nothing here is ever fatal to the transport.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::mutator::StatsSink;

/// How long a fetched config snapshot stays fresh.
pub const CACHE_LIFE: Duration = Duration::from_secs(1);

/// Cooldown after a failed controller request.
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

type FetchError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct CacheState {
    config: HashMap<String, f64>,
    fresh_until: Option<Instant>,
    retry_after: Option<Instant>,
}

pub struct ControllerClient {
    endpoint: String,
    agent: ureq::Agent,
    state: Mutex<CacheState>,
}

impl ControllerClient {
    /// `endpoint` is the controller base URL, e.g. `http://127.0.0.1:5000`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        // Bounded timeouts: a slow controller must not stall the caller
        // longer than a couple of seconds.
        let agent = ureq::builder()
            .timeout_connect(Duration::from_secs(2))
            .timeout(Duration::from_secs(2))
            .build();
        Self {
            endpoint: endpoint.into(),
            agent,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    /// Read a numeric config value, falling back to `default` when the key
    /// is absent or the controller cannot be reached.
    pub fn get_config(&self, key: &str, default: f64) -> f64 {
        let now = Instant::now();
        {
            let state = self.state.lock();
            if state.fresh_until.is_some_and(|t| now < t) {
                return state.config.get(key).copied().unwrap_or(default);
            }
            if state.retry_after.is_some_and(|t| now < t) {
                return default;
            }
        }

        match self.fetch_config() {
            Ok(config) => {
                let mut state = self.state.lock();
                state.config = config;
                state.fresh_until = Some(now + CACHE_LIFE);
                state.retry_after = None;
                state.config.get(key).copied().unwrap_or(default)
            }
            Err(err) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    %err,
                    "controller unreachable, backing off for {}s",
                    RETRY_DELAY.as_secs()
                );
                self.state.lock().retry_after = Some(now + RETRY_DELAY);
                default
            }
        }
    }

    fn fetch_config(&self) -> Result<HashMap<String, f64>, FetchError> {
        let response = self.agent.get(&self.url("/config")).call()?;
        let body: serde_json::Value = response.into_json()?;
        let mut config = HashMap::new();
        if let Some(object) = body.as_object() {
            for (key, value) in object {
                if let Some(number) = value.as_f64() {
                    config.insert(key.clone(), number);
                }
            }
        }
        Ok(config)
    }
}

impl StatsSink for ControllerClient {
    /// Accumulate a `+1` delta for `key`. Best-effort: failures are logged
    /// and otherwise ignored.
    fn post_delta(&self, key: &str) {
        let mut body = serde_json::Map::new();
        body.insert(key.to_string(), 1.into());
        let result = self
            .agent
            .post(&self.url("/statistics"))
            .send_json(serde_json::Value::Object(body));
        match result {
            Ok(response) if response.status() == 200 => {}
            Ok(response) => {
                tracing::debug!(status = response.status(), key, "statistics post rejected");
            }
            Err(err) => {
                tracing::debug!(%err, key, "statistics post failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_controller_returns_default_and_cools_down() {
        // Nothing listens on this port.
        let client = ControllerClient::new("http://127.0.0.1:1");
        let started = Instant::now();
        assert_eq!(client.get_config("recv_delay", 2.5), 2.5);
        // Second call must come from the cooldown path, not another dial.
        assert_eq!(client.get_config("recv_delay", 2.5), 2.5);
        assert!(started.elapsed() < RETRY_DELAY);
        assert!(client.state.lock().retry_after.is_some());
    }

    #[test]
    fn url_join_tolerates_trailing_slash() {
        let client = ControllerClient::new("http://host:5000/");
        assert_eq!(client.url("/config"), "http://host:5000/config");
    }
}
