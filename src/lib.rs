//! # reqwest-session-proxies
//!
//! Session-affine proxy rotation for crawlers.
//!
//! A [`ProxyPool`] gives every proxy a fixed session token (cookie-jar id) and
//! user-agent. The [`RotationController`] binds outgoing requests to a proxy,
//! retires proxies that keep failing or get banned, and hands back replacement
//! requests that restart the session through another proxy. The controller does
//! no I/O itself; [`SessionProxyMiddleware`] drives it for `reqwest` clients.

pub mod config;
pub mod controller;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod pool;
pub mod proxy;
pub mod request;
pub mod source;
pub mod user_agents;

pub use config::{RotationConfig, RotationConfigBuilder};
pub use controller::{RotationController, Verdict};
pub use error::{BindError, ConfigError, PoolExhausted, RequestAbandoned};
pub use middleware::SessionProxyMiddleware;
pub use policy::{BanPolicy, ResponseOutcome, StatusBanPolicy};
pub use pool::{PoolStats, ProxyPool};
pub use proxy::{ProxyAddress, ProxyEndpoint};
pub use request::{CrawlRequest, RequestMeta};
pub use user_agents::{UserAgentCorpus, UserAgentMode};
