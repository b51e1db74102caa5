//! Target resolution.
//!
//! A target is either a network block (`10.0.1.0/24`) that discovery sweeps,
//! or an explicit, comma-separated address list that is used in the given
//! order, each address once.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A validated, canonical scan target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDescriptor {
    /// A network block to be swept by discovery. Host bits are truncated.
    Network(IpNet),
    /// Known hosts, in the order the operator gave them.
    Addresses(Vec<IpAddr>),
}

impl TargetDescriptor {
    /// Resolve a user-supplied target string.
    ///
    /// A string containing a comma is an address list; every segment must be
    /// an IPv4/IPv6 literal, and repeats after the first are dropped.
    /// Anything else is parsed as a network block. A bare address without a
    /// prefix is treated as a single-host block.
    pub fn resolve(spec: &str) -> Result<Self> {
        let spec = spec.trim();

        if spec.contains(',') {
            let addrs = spec
                .split(',')
                .map(|segment| parse_address(segment.trim()))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self::Addresses(first_seen(addrs)));
        }

        parse_network(spec).map(Self::Network)
    }

    /// Build an explicit address list from newline-delimited text.
    ///
    /// Blank lines and `#` comments are ignored. At least one address is required.
    pub fn from_lines(content: &str) -> Result<Self> {
        let addrs = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(parse_address)
            .collect::<Result<Vec<_>>>()?;

        if addrs.is_empty() {
            return Err(CoreError::InvalidTarget(
                "target list contains no addresses".to_string(),
            ));
        }
        Ok(Self::Addresses(first_seen(addrs)))
    }

    /// The explicit addresses, if this target bypasses discovery. Each
    /// address appears once, in first-seen order.
    pub fn explicit_hosts(&self) -> Option<Vec<String>> {
        match self {
            Self::Network(_) => None,
            Self::Addresses(addrs) => Some(
                first_seen(addrs.clone())
                    .iter()
                    .map(IpAddr::to_string)
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(net) => write!(f, "{net}"),
            Self::Addresses(addrs) => {
                let joined: Vec<String> = addrs.iter().map(IpAddr::to_string).collect();
                write!(f, "{}", joined.join(","))
            }
        }
    }
}

fn first_seen(mut addrs: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut seen = HashSet::new();
    addrs.retain(|addr| seen.insert(*addr));
    addrs
}

fn parse_address(segment: &str) -> Result<IpAddr> {
    segment
        .parse()
        .map_err(|e| CoreError::InvalidTarget(format!("invalid address {segment:?}: {e}")))
}

fn parse_network(spec: &str) -> Result<IpNet> {
    if let Ok(net) = spec.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    match spec.parse::<IpAddr>() {
        Ok(addr) => Ok(IpNet::from(addr)),
        Err(_) => Err(CoreError::InvalidTarget(format!(
            "invalid network range {spec:?}"
        ))),
    }
}
