//! Middleware implementation for reqwest.
//!
//! The middleware plays the crawler's part for plain `reqwest` clients: it binds
//! each request through the [`RotationController`], sends it through the bound
//! proxy and feeds the outcome back, following replacement requests until one
//! is accepted or the controller gives up.

use crate::config::RotationConfig;
use crate::controller::{RotationController, Verdict};
use crate::error::ConfigError;
use crate::policy::ResponseOutcome;
use crate::proxy::ProxyEndpoint;
use crate::request::CrawlRequest;

use anyhow::anyhow;
use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use log::{info, warn};
use parking_lot::Mutex;
use reqwest::ResponseBuilderExt;
use reqwest_middleware::{Error, Middleware, Next};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Middleware that routes every request through a session-bound proxy.
///
/// Each proxy session gets its own `reqwest::Client` with its own cookie store,
/// so cookies never leak between sessions. Pass a [`CrawlRequest`] as a request
/// extension to pin a proxy or carry retry state; the accepted response carries
/// the bound `CrawlRequest` in its extensions. Headers on the `reqwest` request
/// are folded into the `CrawlRequest`, so a caller-set `User-Agent` wins over
/// the pool's. A retry that restarts from the session's first hop is sent as
/// that first-hop request alone, without the follow-up's body.
#[derive(Clone)]
pub struct SessionProxyMiddleware {
    controller: Arc<RotationController>,
    /// One client per session token.
    clients: Arc<Mutex<HashMap<usize, reqwest::Client>>>,
    /// Keyed by routing slot.
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
    timeout: Duration,
}

impl SessionProxyMiddleware {
    /// Create a middleware around an existing controller.
    pub fn new(controller: Arc<RotationController>, config: &RotationConfig) -> Self {
        let limiter = config.max_requests_per_second.map(|rps| {
            let per_second = NonZeroU32::new(rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
            Arc::new(RateLimiter::keyed(Quota::per_second(per_second)))
        });

        Self {
            controller,
            clients: Arc::new(Mutex::new(HashMap::new())),
            limiter,
            timeout: config.request_timeout,
        }
    }

    /// Load the proxy pool named in `config` and build the middleware.
    pub fn from_config(config: &RotationConfig) -> Result<Self, ConfigError> {
        let controller = RotationController::from_config(config)?;
        let stats = controller.pool().stats();
        info!("Proxy rotation initialized with {} proxies", stats.total);
        Ok(Self::new(Arc::new(controller), config))
    }

    pub fn controller(&self) -> &Arc<RotationController> {
        &self.controller
    }

    fn client_for(&self, proxy: &ProxyEndpoint) -> Result<reqwest::Client, reqwest::Error> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&proxy.session) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(proxy.url())?)
            .cookie_store(true)
            .timeout(self.timeout)
            .build()?;
        clients.insert(proxy.session, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Middleware for SessionProxyMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let mut crawl = match extensions.remove::<CrawlRequest>() {
            Some(mut crawl) => {
                for name in req.headers().keys() {
                    if !crawl.headers.contains_key(name) {
                        for value in req.headers().get_all(name) {
                            crawl.headers.append(name.clone(), value.clone());
                        }
                    }
                }
                crawl
            }
            None => crawl_request_from(&req),
        };
        // Set once a retry restarted from the first hop; `req` no longer applies.
        let mut restarted = false;

        loop {
            let proxy = match self.controller.bind(&mut crawl) {
                Ok(proxy) => proxy,
                Err(err) => {
                    let stats = self.controller.pool().stats();
                    warn!(
                        "Not dispatching {}: {}. Total: {}, Live: {}",
                        crawl.url, err, stats.total, stats.live
                    );
                    return Err(Error::Middleware(anyhow!(err)));
                }
            };

            let mut attempt = if restarted {
                reqwest::Request::new(crawl.method.clone(), crawl.url.clone())
            } else {
                let mut attempt = req.try_clone().ok_or_else(|| {
                    Error::Middleware(anyhow!(
                        "Request object is not cloneable. Are you passing a streaming body?"
                            .to_string()
                    ))
                })?;
                *attempt.method_mut() = crawl.method.clone();
                *attempt.url_mut() = crawl.url.clone();
                attempt
            };
            *attempt.headers_mut() = crawl.headers.clone();

            if let Some(limiter) = &self.limiter {
                limiter.until_key_ready(&proxy.routing_slot()).await;
            }

            info!(
                "Using proxy: {} for {} (session {}, retry {})",
                proxy, crawl.url, proxy.session, crawl.meta.retry_times
            );

            let sent = match self.client_for(&proxy) {
                Ok(client) => match client.execute(attempt).await {
                    Ok(response) => buffer(response).await,
                    Err(err) => Err(Error::Reqwest(err)),
                },
                Err(err) => Err(Error::Reqwest(err)),
            };

            let (mut response, body_len) = match sent {
                Ok(buffered) => buffered,
                Err(Error::Reqwest(err)) => {
                    warn!("Request failed with proxy {}: {}", proxy, err);
                    match self.controller.on_failure(&crawl, &err) {
                        Some(retry) => {
                            restarted |= crawl.meta.parent.is_some();
                            crawl = retry;
                            continue;
                        }
                        None => return Err(Error::Reqwest(err)),
                    }
                }
                Err(other) => return Err(other),
            };

            let outcome = ResponseOutcome::new(response.status().as_u16(), body_len);
            match self.controller.on_response(&crawl, &outcome) {
                Verdict::Accept => {
                    response.extensions_mut().insert(crawl);
                    return Ok(response);
                }
                Verdict::Retry(retry) => {
                    info!("Proxy {} banned by {}, retrying", proxy, crawl.url);
                    restarted |= crawl.meta.parent.is_some();
                    crawl = retry;
                }
            }
        }
    }
}

fn crawl_request_from(req: &reqwest::Request) -> CrawlRequest {
    let mut crawl = CrawlRequest::new(req.method().clone(), req.url().clone());
    crawl.headers = req.headers().clone();
    crawl
}

/// Read the whole body so the ban policy can see its length, then put the
/// response back together for the caller.
async fn buffer(response: reqwest::Response) -> reqwest_middleware::Result<(reqwest::Response, usize)> {
    let mut builder = http::Response::builder()
        .status(response.status())
        .version(response.version())
        .url(response.url().clone());
    if let Some(headers) = builder.headers_mut() {
        *headers = response.headers().clone();
    }

    let body = response.bytes().await?;
    let body_len = body.len();
    let rebuilt = builder
        .body(body)
        .map_err(|e| Error::Middleware(anyhow!(e)))?;
    Ok((reqwest::Response::from(rebuilt), body_len))
}
