//! services/api/src/adapters/ipdb.rs
//!
//! A read-only IP range database loaded from a text file, one range per line:
//!
//! ```text
//! # cidr|country|province|city
//! 1.1.1.0/24|Australia|Queensland|Brisbane
//! 2001:db8::/32|Reserved|Documentation|
//! ```
//!
//! Bare addresses are treated as single-host ranges. When ranges overlap the
//! most specific (longest prefix) one wins.

use async_trait::async_trait;
use conversation_analytics_core::domain::GeoLocation;
use conversation_analytics_core::ports::{IpDatabase, PortResult};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum IpDbError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct IpRangeDatabase {
    ranges: Vec<(IpNetwork, GeoLocation)>,
}

impl IpRangeDatabase {
    /// Loads and parses the range file at `path`.
    pub fn load(path: &Path) -> Result<Self, IpDbError> {
        let contents = std::fs::read_to_string(path).map_err(|source| IpDbError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self::parse(&contents)?;
        info!("Loaded {} IP ranges from {}", db.len(), path.display());
        Ok(db)
    }

    /// Parses range lines. Blank lines and `#` comments are skipped.
    pub fn parse(contents: &str) -> Result<Self, IpDbError> {
        let mut ranges = Vec::new();
        for (index, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let invalid = |reason: String| IpDbError::InvalidLine {
                line: index + 1,
                reason,
            };

            let (range, location) = line
                .split_once('|')
                .ok_or_else(|| invalid("expected cidr|country|province|city".to_string()))?;
            let network = parse_network(range.trim()).map_err(invalid)?;
            let location = location.parse::<GeoLocation>().map_err(invalid)?;
            ranges.push((network, location));
        }
        Ok(Self { ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Finds the most specific range containing `ip`.
    pub fn find(&self, ip: IpAddr) -> Option<&GeoLocation> {
        self.ranges
            .iter()
            .filter(|(network, _)| network.contains(ip))
            .max_by_key(|(network, _)| network.prefix())
            .map(|(_, location)| location)
    }
}

fn parse_network(raw: &str) -> Result<IpNetwork, String> {
    if let Ok(network) = raw.parse::<IpNetwork>() {
        return Ok(network);
    }
    let ip = raw
        .parse::<IpAddr>()
        .map_err(|_| format!("invalid IP/CIDR '{}'", raw))?;
    let prefix = match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    IpNetwork::new(ip, prefix).map_err(|e| e.to_string())
}

#[async_trait]
impl IpDatabase for IpRangeDatabase {
    async fn lookup(&self, ip: IpAddr) -> PortResult<Option<GeoLocation>> {
        let found = self.find(ip).cloned();
        if found.is_none() {
            debug!("No IP range covers {}", ip);
        }
        Ok(found)
    }
}
