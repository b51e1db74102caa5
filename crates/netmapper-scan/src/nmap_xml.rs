//! Nmap XML output deserialization.
//!
//! Nmap's `-oX <file>` flag writes structured XML. This module provides typed
//! Rust structs that deserialize from that XML using `quick-xml` with serde,
//! plus a pattern-based scrape for files nmap left truncated (a scan cut off
//! by `--host-timeout` never writes its closing tags).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, ScanError};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
}

/// A single host from scan results.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub ports: Option<Ports>,
    pub os: Option<OsMatches>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<NmapPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapPort {
    #[serde(rename = "@portid")]
    pub port_id: u16,
    pub state: PortState,
    pub service: Option<NmapService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapService {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatches {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@accuracy")]
    pub accuracy: Option<String>,
}

/// What the port/service stage keeps from one host's scan artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortScanFindings {
    /// `(port, service description)` for each open port, in scan order.
    pub services: Vec<(u16, String)>,
    /// Best OS match as `"{name} (accuracy: {n}%)"`.
    pub os: Option<String>,
}

impl NmapHost {
    /// The host's IP address (IPv4 preferred over IPv6), if present.
    pub fn ip(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == "ipv4")
            .or_else(|| self.addresses.iter().find(|a| a.addr_type == "ipv6"))
            .map(|a| a.addr.as_str())
    }

    /// Check if the host is up.
    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    /// Open ports with their service description.
    pub fn open_services(&self) -> Vec<(u16, String)> {
        self.ports
            .iter()
            .flat_map(|p| p.ports.iter())
            .filter(|p| p.state.state == "open")
            .map(|p| {
                let description = match &p.service {
                    Some(svc) => {
                        describe_service(&svc.name, svc.product.as_deref(), svc.version.as_deref())
                    }
                    None => "unknown".to_string(),
                };
                (p.port_id, description)
            })
            .collect()
    }

    /// The best OS match (first in list), with its accuracy.
    pub fn os_guess(&self) -> Option<String> {
        self.os
            .as_ref()
            .and_then(|os| os.matches.first())
            .map(|m| format_os(&m.name, m.accuracy.as_deref()))
    }
}

/// `"{name} ({product} {version})"`, dropping whatever parts are missing.
pub fn describe_service(name: &str, product: Option<&str>, version: Option<&str>) -> String {
    let product = product.filter(|p| !p.is_empty());
    let version = version.filter(|v| !v.is_empty());
    match (product, version) {
        (Some(p), Some(v)) => format!("{name} ({p} {v})"),
        (Some(p), None) => format!("{name} ({p})"),
        _ => name.to_string(),
    }
}

fn format_os(name: &str, accuracy: Option<&str>) -> String {
    match accuracy {
        Some(acc) => format!("{name} (accuracy: {acc}%)"),
        None => name.to_string(),
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| ScanError::XmlParse(format!("{e}")))
}

/// Extract open services and the OS guess from a single-host scan artifact.
///
/// Falls back to scraping the raw text when the XML does not deserialize.
pub fn extract_findings(xml: &[u8]) -> PortScanFindings {
    match parse_nmap_xml(xml) {
        Ok(run) => {
            let host = run
                .hosts
                .iter()
                .find(|h| h.is_up())
                .or_else(|| run.hosts.first());
            match host {
                Some(h) => PortScanFindings {
                    services: h.open_services(),
                    os: h.os_guess(),
                },
                None => PortScanFindings::default(),
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "Nmap XML did not parse, scraping raw output");
            let text = String::from_utf8_lossy(xml);
            PortScanFindings {
                services: scrape_open_services(&text),
                os: scrape_os_guess(&text),
            }
        }
    }
}

static OPEN_PORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"<port protocol="[^"]+" portid="(\d+)"><state state="open"[^>]*>"#,
        r#"(?:<service name="([^"]*)"(?: product="([^"]*)")?(?: version="([^"]*)")?)?"#,
    ))
    .expect("valid open port pattern")
});

static OS_MATCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<osmatch name="([^"]*)" accuracy="([^"]*)""#).expect("valid osmatch pattern")
});

/// Pull `(port, description)` pairs for open ports out of raw nmap XML text.
pub fn scrape_open_services(text: &str) -> Vec<(u16, String)> {
    OPEN_PORT_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let port = caps.get(1)?.as_str().parse().ok()?;
            let description = match caps.get(2) {
                Some(name) => describe_service(
                    name.as_str(),
                    caps.get(3).map(|m| m.as_str()),
                    caps.get(4).map(|m| m.as_str()),
                ),
                None => "unknown".to_string(),
            };
            Some((port, description))
        })
        .collect()
}

/// First `<osmatch>` in raw nmap XML text.
pub fn scrape_os_guess(text: &str) -> Option<String> {
    OS_MATCH_RE
        .captures(text)
        .map(|caps| format_os(&caps[1], Some(&caps[2])))
}
