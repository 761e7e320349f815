//! The request model shared with the crawler.

use http::header::USER_AGENT;
use http::{HeaderMap, Method};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Per-request metadata written and read by the rotation controller.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Proxy URL (`http://host:port`). Set by the caller to pin a proxy, or by `bind`.
    pub proxy: Option<String>,
    /// Session token (cookie-jar id) of the bound proxy.
    pub session: Option<usize>,
    /// Routing-slot key of the bound proxy.
    pub routing_slot: Option<String>,
    /// How many times this logical request has been resubmitted.
    pub retry_times: u32,
    /// The first-hop request of this crawl session. Retries restart from it.
    pub parent: Option<Arc<CrawlRequest>>,
    /// Free-form values the crawler wants to carry along.
    pub extra: HashMap<String, serde_json::Value>,
    /// The `User-Agent` header was filled in from the pool.
    pub(crate) pool_user_agent: bool,
}

/// An outbound request as seen by the rotation controller.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub meta: RequestMeta,
    /// Skip the crawler's duplicate filter. Set on every replacement request.
    pub dont_filter: bool,
}

impl CrawlRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            meta: RequestMeta::default(),
            dont_filter: false,
        }
    }

    /// A `GET` request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Next request of the same crawl session.
    ///
    /// It stays on this request's proxy and remembers the session's first hop,
    /// so a ban or failure later on restarts the whole session elsewhere.
    pub fn follow_up(&self, method: Method, url: Url) -> Self {
        let parent = self.meta.parent.clone().unwrap_or_else(|| {
            let mut first_hop = self.clone();
            first_hop.clear_binding();
            Arc::new(first_hop)
        });

        let mut next = Self::new(method, url);
        next.meta.proxy = self.meta.proxy.clone();
        next.meta.parent = Some(parent);
        next
    }

    /// Drop the proxy binding so the next `bind` picks a fresh proxy.
    ///
    /// A `User-Agent` header set by the caller is kept; one filled in from the
    /// pool is removed along with the rest of the binding.
    pub fn clear_binding(&mut self) {
        self.meta.proxy = None;
        self.meta.session = None;
        self.meta.routing_slot = None;
        if self.meta.pool_user_agent {
            self.headers.remove(USER_AGENT);
            self.meta.pool_user_agent = false;
        }
    }
}
