//! Configuration for proxy rotation.

use crate::user_agents::UserAgentMode;

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the rotation controller and the middleware.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Proxy list, a `.txt` or `.json` file.
    pub proxy_file: Option<PathBuf>,
    /// Transport failures after which a proxy is retired as dead.
    pub retry_times_per_proxy: u32,
    /// Resubmissions allowed for one logical request.
    pub retry_times_per_url: u32,
    /// Which user-agents proxies draw from.
    pub user_agent_mode: UserAgentMode,
    /// Statuses the default ban policy accepts.
    pub allowed_statuses: Vec<u16>,
    /// Maximum requests per second per routing slot. Middleware only.
    pub max_requests_per_second: Option<f64>,
    /// Timeout for a single attempt. Middleware only.
    #[serde(with = "seconds")]
    pub request_timeout: Duration,
}

impl RotationConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RotationConfigBuilder {
        RotationConfigBuilder::new()
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfigBuilder::new().build()
    }
}

/// Builder for `RotationConfig`.
pub struct RotationConfigBuilder {
    proxy_file: Option<PathBuf>,
    retry_times_per_proxy: Option<u32>,
    retry_times_per_url: Option<u32>,
    user_agent_mode: Option<UserAgentMode>,
    allowed_statuses: Option<Vec<u16>>,
    max_requests_per_second: Option<f64>,
    request_timeout: Option<Duration>,
}

impl RotationConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            proxy_file: None,
            retry_times_per_proxy: None,
            retry_times_per_url: None,
            user_agent_mode: None,
            allowed_statuses: None,
            max_requests_per_second: None,
            request_timeout: None,
        }
    }

    /// Set the proxy list file.
    pub fn proxy_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.proxy_file = Some(path.into());
        self
    }

    /// Set how many transport failures retire a proxy.
    pub fn retry_times_per_proxy(mut self, count: u32) -> Self {
        self.retry_times_per_proxy = Some(count);
        self
    }

    /// Set how many times one logical request may be resubmitted.
    pub fn retry_times_per_url(mut self, count: u32) -> Self {
        self.retry_times_per_url = Some(count);
        self
    }

    /// Set the user-agent mode.
    pub fn user_agent_mode(mut self, mode: UserAgentMode) -> Self {
        self.user_agent_mode = Some(mode);
        self
    }

    /// Set the statuses that do not count as a ban.
    pub fn allowed_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.allowed_statuses = Some(statuses.into_iter().collect());
        self
    }

    /// Set the maximum requests per second per routing slot.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Set the timeout of a single attempt.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RotationConfig {
        RotationConfig {
            proxy_file: self.proxy_file,
            retry_times_per_proxy: self.retry_times_per_proxy.unwrap_or(5),
            retry_times_per_url: self.retry_times_per_url.unwrap_or(10),
            user_agent_mode: self.user_agent_mode.unwrap_or_default(),
            allowed_statuses: self.allowed_statuses.unwrap_or_else(|| vec![200]),
            max_requests_per_second: self.max_requests_per_second,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
        }
    }
}

impl Default for RotationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
