//! User-agent corpora assigned to proxies.

use crate::error::ConfigError;

use http::HeaderValue;
use log::warn;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const DESKTOP_AGENTS: &str = include_str!("agents/desktop.txt");
const MOBILE_AGENTS: &str = include_str!("agents/mobile.txt");

/// Which part of the corpus proxies draw their user-agent from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAgentMode {
    /// Desktop and mobile agents.
    #[default]
    All,
    /// Desktop browsers only.
    Desktop,
    /// Mobile browsers only.
    Mobile,
}

impl fmt::Display for UserAgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UserAgentMode::All => "all",
            UserAgentMode::Desktop => "desktop",
            UserAgentMode::Mobile => "mobile",
        })
    }
}

impl FromStr for UserAgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(UserAgentMode::All),
            "desktop" => Ok(UserAgentMode::Desktop),
            "mobile" => Ok(UserAgentMode::Mobile),
            other => Err(format!("unknown user agent mode: {}", other)),
        }
    }
}

/// Desktop and mobile user-agent strings.
#[derive(Debug, Clone, Default)]
pub struct UserAgentCorpus {
    desktop: Vec<String>,
    mobile: Vec<String>,
}

impl UserAgentCorpus {
    /// The corpus shipped with the crate.
    pub fn builtin() -> Self {
        Self::from_lines(DESKTOP_AGENTS, MOBILE_AGENTS)
    }

    /// Build a corpus from two line-oriented sources.
    pub fn from_lines(desktop: &str, mobile: &str) -> Self {
        Self {
            desktop: parse_lines(desktop),
            mobile: parse_lines(mobile),
        }
    }

    /// Build a corpus from two line-oriented files.
    pub fn from_files(
        desktop: impl AsRef<Path>,
        mobile: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::from_lines(&read(desktop.as_ref())?, &read(mobile.as_ref())?))
    }

    /// The agents available for `mode`.
    pub fn agents(&self, mode: UserAgentMode) -> Vec<&str> {
        let desktop = self.desktop.iter().map(String::as_str);
        let mobile = self.mobile.iter().map(String::as_str);
        match mode {
            UserAgentMode::All => desktop.chain(mobile).collect(),
            UserAgentMode::Desktop => desktop.collect(),
            UserAgentMode::Mobile => mobile.collect(),
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            // The agent ends up in a header, so it has to be a valid one.
            let valid = HeaderValue::from_str(line).is_ok();
            if !valid {
                warn!("Skipping user agent that is not a valid header value: {:?}", line);
            }
            valid
        })
        .map(str::to_string)
        .collect()
}
