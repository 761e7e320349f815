//! Deciding whether a response means the proxy got banned.

use crate::request::CrawlRequest;

/// What the crawler got back for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseOutcome {
    /// HTTP status code.
    pub status: u16,
    /// Length of the response body in bytes.
    pub body_len: usize,
}

impl ResponseOutcome {
    pub fn new(status: u16, body_len: usize) -> Self {
        Self { status, body_len }
    }
}

/// Classifies responses as bans.
///
/// Only responses are judged here; transport errors are handled by
/// `RotationController::on_failure` and never count as bans.
pub trait BanPolicy: Send + Sync {
    fn is_ban(&self, request: &CrawlRequest, outcome: &ResponseOutcome) -> bool;
}

/// Bans every status outside an allow-list, and `200` responses with no body.
#[derive(Debug, Clone)]
pub struct StatusBanPolicy {
    allowed: Vec<u16>,
}

impl StatusBanPolicy {
    pub fn new(allowed: impl IntoIterator<Item = u16>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn allowed(&self) -> &[u16] {
        &self.allowed
    }
}

impl Default for StatusBanPolicy {
    fn default() -> Self {
        Self::new([200])
    }
}

impl BanPolicy for StatusBanPolicy {
    fn is_ban(&self, _request: &CrawlRequest, outcome: &ResponseOutcome) -> bool {
        if !self.allowed.contains(&outcome.status) {
            return true;
        }
        // Anti-bot walls like to answer 200 with nothing in it.
        outcome.status == 200 && outcome.body_len == 0
    }
}

impl<F> BanPolicy for F
where
    F: Fn(&CrawlRequest, &ResponseOutcome) -> bool + Send + Sync,
{
    fn is_ban(&self, request: &CrawlRequest, outcome: &ResponseOutcome) -> bool {
        self(request, outcome)
    }
}
