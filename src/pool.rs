//! Core proxy pool implementation.

use crate::error::{ConfigError, PoolExhausted};
use crate::proxy::{ProxyAddress, ProxyEndpoint};
use crate::source;
use crate::user_agents::{UserAgentCorpus, UserAgentMode};

use log::{debug, info, warn};
use parking_lot::RwLock;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

fn embedded_address() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//(.+?):(\d+)").expect("valid regex"))
}

/// Counts of the pool's views at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub live: usize,
    pub proven: usize,
}

/// An in-memory registry of proxies with per-proxy identity and health.
///
/// Endpoints are never removed. Marking one dead or banned only hides it from
/// selection, so its session token stays valid for requests still in flight.
pub struct ProxyPool {
    /// All proxies, indexed by session token.
    proxies: RwLock<Vec<ProxyEndpoint>>,
    /// Address to session token. Fixed after construction.
    index: HashMap<ProxyAddress, usize>,
}

impl ProxyPool {
    /// Build a pool, giving every unique address a sequential session token
    /// and a random user-agent from the `mode` part of `agents`.
    pub fn new(
        addresses: impl IntoIterator<Item = ProxyAddress>,
        agents: &UserAgentCorpus,
        mode: UserAgentMode,
    ) -> Result<Self, ConfigError> {
        let candidates = agents.agents(mode);
        if candidates.is_empty() {
            return Err(ConfigError::NoUserAgents(mode));
        }

        let mut rng = rand::rng();
        let mut proxies = Vec::new();
        let mut index = HashMap::new();

        for address in addresses {
            if index.contains_key(&address) {
                warn!("Ignoring duplicate proxy {}", address);
                continue;
            }
            let session = proxies.len();
            let user_agent = candidates[rng.random_range(0..candidates.len())].to_string();
            index.insert(address.clone(), session);
            proxies.push(ProxyEndpoint::new(address, session, user_agent));
        }

        if proxies.is_empty() {
            return Err(ConfigError::EmptySource);
        }

        info!("Proxy pool built with {} proxies ({} user agents)", proxies.len(), mode);

        Ok(Self {
            proxies: RwLock::new(proxies),
            index,
        })
    }

    /// Build a pool from line-oriented `ip:port` text.
    pub fn from_txt(
        content: &str,
        agents: &UserAgentCorpus,
        mode: UserAgentMode,
    ) -> Result<Self, ConfigError> {
        Self::new(source::parse_txt(content), agents, mode)
    }

    /// Build a pool from a JSON list of `{ip, port}` records.
    pub fn from_json(
        content: &str,
        agents: &UserAgentCorpus,
        mode: UserAgentMode,
    ) -> Result<Self, ConfigError> {
        Self::new(source::parse_json(content)?, agents, mode)
    }

    /// Build a pool from a `.txt` or `.json` file.
    pub fn from_file(
        path: impl AsRef<Path>,
        agents: &UserAgentCorpus,
        mode: UserAgentMode,
    ) -> Result<Self, ConfigError> {
        Self::new(source::load_file(path)?, agents, mode)
    }

    /// Number of proxies, healthy or not.
    pub fn len(&self) -> usize {
        self.proxies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.read().is_empty()
    }

    /// Snapshot of the endpoint holding `session`, if any.
    pub fn get(&self, session: usize) -> Option<ProxyEndpoint> {
        self.proxies.read().get(session).cloned()
    }

    /// Look a proxy up by host and port, regardless of its health.
    pub fn find(&self, host: &str, port: u16) -> Option<ProxyEndpoint> {
        let session = *self.index.get(&ProxyAddress::new(host, port))?;
        self.get(session)
    }

    /// Look a proxy up by an address embedded in a URL-like string such as
    /// `http://10.0.0.1:3128`. Returns `None` when nothing matches.
    pub fn find_by_address(&self, address: &str) -> Option<ProxyEndpoint> {
        let caps = embedded_address().captures(address)?;
        let port = caps[2].parse::<u16>().ok()?;
        self.find(&caps[1], port)
    }

    /// Proxies that are neither dead nor banned.
    pub fn live(&self) -> Vec<ProxyEndpoint> {
        self.proxies.read().iter().filter(|p| p.is_live()).cloned().collect()
    }

    /// Live proxies that have been checked.
    pub fn proven(&self) -> Vec<ProxyEndpoint> {
        self.proxies.read().iter().filter(|p| p.is_proven()).cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.proxies.read().iter().filter(|p| p.is_live()).count()
    }

    pub fn proven_count(&self) -> usize {
        self.proxies.read().iter().filter(|p| p.is_proven()).count()
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        let proxies = self.proxies.read();
        PoolStats {
            total: proxies.len(),
            live: proxies.iter().filter(|p| p.is_live()).count(),
            proven: proxies.iter().filter(|p| p.is_proven()).count(),
        }
    }

    /// Pick a proxy uniformly at random.
    ///
    /// With `proven_only` the proven proxies are preferred, falling back to
    /// all live ones when none is proven yet.
    pub fn select_random(&self, proven_only: bool) -> Result<ProxyEndpoint, PoolExhausted> {
        let proxies = self.proxies.read();

        let mut candidates: Vec<&ProxyEndpoint> = Vec::new();
        if proven_only {
            candidates = proxies.iter().filter(|p| p.is_proven()).collect();
        }
        if candidates.is_empty() {
            candidates = proxies.iter().filter(|p| p.is_live()).collect();
        }
        if candidates.is_empty() {
            return Err(PoolExhausted);
        }

        let mut rng = rand::rng();
        let idx = rng.random_range(0..candidates.len());
        Ok(candidates[idx].clone())
    }

    /// Record that `proxy` produced a response. Returns whether it changed.
    pub fn mark_checked(&self, proxy: &ProxyEndpoint) -> bool {
        self.update(proxy, |p| !std::mem::replace(&mut p.checked, true))
            .unwrap_or(false)
    }

    /// Retire `proxy` as banned. Returns whether it changed.
    pub fn mark_banned(&self, proxy: &ProxyEndpoint) -> bool {
        self.update(proxy, |p| !std::mem::replace(&mut p.banned, true))
            .unwrap_or(false)
    }

    /// Retire `proxy` as dead. Returns whether it changed.
    pub fn mark_dead(&self, proxy: &ProxyEndpoint) -> bool {
        self.update(proxy, |p| !std::mem::replace(&mut p.dead, true))
            .unwrap_or(false)
    }

    /// Count one more transport failure for `proxy` and return the new total.
    /// Returns 0 when the proxy is not part of this pool.
    pub fn record_failure(&self, proxy: &ProxyEndpoint) -> u32 {
        self.update(proxy, |p| {
            p.failed_count += 1;
            debug!("Proxy {} failed {} times", p.address, p.failed_count);
            p.failed_count
        })
        .unwrap_or(0)
    }

    /// Run `f` on the pooled endpoint matching `proxy` under the write lock.
    fn update<T>(&self, proxy: &ProxyEndpoint, f: impl FnOnce(&mut ProxyEndpoint) -> T) -> Option<T> {
        let mut proxies = self.proxies.write();
        match proxies.get_mut(proxy.session) {
            Some(pooled) if pooled.address == proxy.address => Some(f(pooled)),
            _ => {
                warn!("Proxy {} is not part of this pool", proxy.address);
                None
            }
        }
    }
}
