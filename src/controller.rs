//! Binding requests to proxies and reacting to their outcomes.

use crate::config::RotationConfig;
use crate::error::{BindError, ConfigError, RequestAbandoned};
use crate::policy::{BanPolicy, ResponseOutcome, StatusBanPolicy};
use crate::pool::ProxyPool;
use crate::proxy::ProxyEndpoint;
use crate::request::CrawlRequest;
use crate::user_agents::UserAgentCorpus;

use http::header::USER_AGENT;
use http::HeaderValue;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;

/// What the crawler should do with a response.
#[derive(Debug)]
pub enum Verdict {
    /// Hand the response to the spider.
    Accept,
    /// Drop the response and dispatch this request instead.
    Retry(CrawlRequest),
}

/// Assigns proxies to outgoing requests and retires proxies that fail or get
/// banned, producing replacement requests for the affected work.
///
/// Transport failures always produce a replacement, even past
/// `retry_times_per_url`; the ceiling is enforced when the replacement comes
/// back through [`bind`](Self::bind).
pub struct RotationController {
    pool: Arc<ProxyPool>,
    retry_times_per_proxy: u32,
    retry_times_per_url: u32,
    ban_policy: Box<dyn BanPolicy>,
}

impl RotationController {
    /// Create a controller over `pool` with the retry limits and status
    /// allow-list from `config`.
    pub fn new(pool: Arc<ProxyPool>, config: &RotationConfig) -> Self {
        Self {
            pool,
            retry_times_per_proxy: config.retry_times_per_proxy,
            retry_times_per_url: config.retry_times_per_url,
            ban_policy: Box::new(StatusBanPolicy::new(config.allowed_statuses.iter().copied())),
        }
    }

    /// Load the pool from `config.proxy_file` with the builtin user-agents.
    pub fn from_config(config: &RotationConfig) -> Result<Self, ConfigError> {
        let path = config
            .proxy_file
            .as_ref()
            .ok_or(ConfigError::MissingProxySource)?;
        let pool = ProxyPool::from_file(path, &UserAgentCorpus::builtin(), config.user_agent_mode)?;
        Ok(Self::new(Arc::new(pool), config))
    }

    /// Replace the ban policy.
    pub fn with_ban_policy(mut self, policy: impl BanPolicy + 'static) -> Self {
        self.ban_policy = Box::new(policy);
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Bind `request` to a proxy before it is dispatched.
    ///
    /// Retries are sent through proven proxies when there are any. A request
    /// retried more than `retry_times_per_url` times is abandoned.
    pub fn bind(&self, request: &mut CrawlRequest) -> Result<ProxyEndpoint, BindError> {
        let retry_times = request.meta.retry_times;
        let mut proven_only = false;
        if retry_times > 0 {
            if retry_times <= self.retry_times_per_url {
                info!("Retry request to {} {} times", request.url, retry_times);
                proven_only = true;
            } else {
                info!("Request to {} retried {} times, abandoned", request.url, retry_times);
                return Err(RequestAbandoned {
                    url: request.url.to_string(),
                    retry_times,
                }
                .into());
            }
        }

        let pinned = request
            .meta
            .proxy
            .as_deref()
            .and_then(|proxy| self.pool.find_by_address(proxy));
        let proxy = match pinned {
            Some(proxy) => proxy,
            None => {
                let stats = self.pool.stats();
                debug!(
                    "Proxy number: total={} live={} proven={}",
                    stats.total, stats.live, stats.proven
                );
                self.pool.select_random(proven_only)?
            }
        };

        request.meta.proxy = Some(proxy.url());
        request.meta.session = Some(proxy.session);
        request.meta.routing_slot = Some(proxy.routing_slot());
        if !request.headers.contains_key(USER_AGENT) {
            match HeaderValue::from_str(&proxy.user_agent) {
                Ok(value) => {
                    request.headers.insert(USER_AGENT, value);
                    request.meta.pool_user_agent = true;
                }
                Err(_) => warn!("Proxy {} has an unusable user agent", proxy),
            }
        }

        Ok(proxy)
    }

    /// Handle a response received for `request`.
    pub fn on_response(&self, request: &CrawlRequest, outcome: &ResponseOutcome) -> Verdict {
        let Some(proxy) = self.bound_proxy(request) else {
            return Verdict::Accept;
        };

        self.pool.mark_checked(&proxy);

        if !self.ban_policy.is_ban(request, outcome) {
            return Verdict::Accept;
        }

        if self.pool.mark_banned(&proxy) {
            info!(
                "Removing banned proxy {} (status {}), {} proxies left",
                proxy,
                outcome.status,
                self.pool.live_count()
            );
        }

        // A request that was never retried still counts as one retry from here on.
        let retry_times = request.meta.retry_times.max(1);
        Verdict::Retry(replacement(request, retry_times))
    }

    /// Handle a transport-level failure of `request`.
    ///
    /// Returns `None` when the request was not routed through a pooled proxy.
    pub fn on_failure<E>(&self, request: &CrawlRequest, error: &E) -> Option<CrawlRequest>
    where
        E: fmt::Display + ?Sized,
    {
        debug!("Request to {} failed: {}", request.url, error);
        let proxy = self.bound_proxy(request)?;

        let failures = self.pool.record_failure(&proxy);
        if failures >= self.retry_times_per_proxy && self.pool.mark_dead(&proxy) {
            info!(
                "Removing failed proxy {} after {} failures, {} proxies left",
                proxy,
                failures,
                self.pool.live_count()
            );
        }

        let retry_times = request.meta.retry_times.max(1) + 1;
        Some(replacement(request, retry_times))
    }

    fn bound_proxy(&self, request: &CrawlRequest) -> Option<ProxyEndpoint> {
        let address = request.meta.proxy.as_deref()?;
        self.pool.find_by_address(address)
    }
}

/// Fresh copy of the session's first-hop request (or `request` itself when it
/// is the first hop) with the binding cleared.
fn replacement(request: &CrawlRequest, retry_times: u32) -> CrawlRequest {
    let mut retry = match &request.meta.parent {
        Some(parent) => CrawlRequest::clone(parent),
        None => request.clone(),
    };
    retry.clear_binding();
    retry.meta.retry_times = retry_times;
    retry.dont_filter = true;
    retry
}
