//! Proxy endpoint representation and health flags.

use std::fmt;

/// Network address of an upstream proxy. Unique within a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAddress {
    /// Host part, usually an IPv4 address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ProxyAddress {
    /// Create an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A proxy server together with the identity assigned to it and its health.
///
/// The pool hands out clones of its endpoints; flipping a flag on a clone has
/// no effect on the pool. Health changes go through the `ProxyPool` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEndpoint {
    /// Where the proxy listens.
    pub address: ProxyAddress,
    /// Session token (cookie-jar id), equal to the construction index.
    pub session: usize,
    /// User-agent sent by every request routed through this proxy.
    pub user_agent: String,
    /// Has produced at least one response through the controller.
    pub checked: bool,
    /// Exceeded its failure budget.
    pub dead: bool,
    /// Blocked by the target site according to the ban policy.
    pub banned: bool,
    /// Transport failures seen so far.
    pub failed_count: u32,
}

impl ProxyEndpoint {
    pub(crate) fn new(address: ProxyAddress, session: usize, user_agent: String) -> Self {
        Self {
            address,
            session,
            user_agent,
            checked: false,
            dead: false,
            banned: false,
            failed_count: 0,
        }
    }

    /// Proxy URL in the form written into request metadata, e.g. `http://10.0.0.1:3128`.
    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Routing-slot key: dots in the host become underscores, then `-port`.
    pub fn routing_slot(&self) -> String {
        format!("{}-{}", self.address.host.replace('.', "_"), self.address.port)
    }

    /// Neither dead nor banned.
    pub fn is_live(&self) -> bool {
        !self.dead && !self.banned
    }

    /// Live and checked.
    pub fn is_proven(&self) -> bool {
        self.is_live() && self.checked
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.address.fmt(f)
    }
}
