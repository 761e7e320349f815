//! Loading proxy lists from text and JSON sources.

use crate::error::ConfigError;
use crate::proxy::ProxyAddress;

use log::{info, warn};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

fn ipv4_port() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+\.\d+\.\d+\.\d+):(\d+)").expect("valid regex"))
}

/// One entry of a structured proxy list.
#[derive(Debug, Deserialize)]
struct ProxyRecord {
    ip: String,
    port: PortField,
}

/// Ports show up both as JSON numbers and as strings in the wild.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u64),
    Text(String),
}

impl ProxyRecord {
    fn into_address(self) -> Result<ProxyAddress, ConfigError> {
        let port = match &self.port {
            PortField::Number(n) => u16::try_from(*n).ok(),
            PortField::Text(s) => s.trim().parse::<u16>().ok(),
        };
        match port {
            Some(port) => Ok(ProxyAddress::new(self.ip, port)),
            None => Err(ConfigError::InvalidPort {
                host: self.ip,
                port: match self.port {
                    PortField::Number(n) => n.to_string(),
                    PortField::Text(s) => s,
                },
            }),
        }
    }
}

/// Extract `ip:port` pairs from line-oriented text.
///
/// Only the first IPv4 `address:port` on each line is used; everything else on
/// the line is ignored, as are lines without one.
pub fn parse_txt(content: &str) -> Vec<ProxyAddress> {
    content
        .lines()
        .filter_map(|line| {
            let caps = ipv4_port().captures(line)?;
            let host = &caps[1];
            match caps[2].parse::<u16>() {
                Ok(port) => Some(ProxyAddress::new(host, port)),
                Err(_) => {
                    warn!("Skipping proxy {} with out of range port {}", host, &caps[2]);
                    None
                }
            }
        })
        .collect()
}

/// Parse a JSON array of `{"ip": ..., "port": ...}` records.
pub fn parse_json(content: &str) -> Result<Vec<ProxyAddress>, ConfigError> {
    let records: Vec<ProxyRecord> = serde_json::from_str(content)?;
    records.into_iter().map(ProxyRecord::into_address).collect()
}

/// Read a proxy list from disk, choosing the parser by file extension.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<ProxyAddress>, ConfigError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let read = || {
        std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    };

    let addresses = match extension.as_deref() {
        Some("txt") => parse_txt(&read()?),
        Some("json") => parse_json(&read()?)?,
        _ => return Err(ConfigError::UnsupportedSource(path.to_path_buf())),
    };

    info!("Loaded {} proxies from {}", addresses.len(), path.display());
    Ok(addresses)
}
