//! Live host discovery.
//!
//! Explicit address lists pass straight through. Network blocks are swept
//! twice: a fast masscan probe over a few common ports, then an nmap ping
//! sweep. The two result sets are unioned, so a host either tool saw counts
//! as live. The final list is sorted numerically and written to
//! `discovery/live_hosts.txt` before it is returned.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use ipnet::IpNet;
use netmapper_core::TargetDescriptor;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::layout::RunLayout;
use crate::nmap_xml;
use crate::runner::{CommandRunner, ToolCommand};

pub struct Discovery<R> {
    runner: Arc<R>,
    config: Arc<ScanConfig>,
    layout: RunLayout,
}

impl<R: CommandRunner> Discovery<R> {
    pub fn new(runner: Arc<R>, config: Arc<ScanConfig>, layout: RunLayout) -> Self {
        Self {
            runner,
            config,
            layout,
        }
    }

    /// Resolve the target into the ordered live-host list and persist it.
    ///
    /// An empty result is not an error: both probes may legitimately find nothing.
    pub async fn discover(&self, target: &TargetDescriptor) -> Result<Vec<String>> {
        fs::create_dir_all(self.layout.discovery_dir())?;

        let hosts = match target {
            TargetDescriptor::Addresses(_) => {
                let hosts = target.explicit_hosts().unwrap_or_default();
                tracing::info!(count = hosts.len(), "Using provided address list");
                hosts
            }
            TargetDescriptor::Network(net) => self.sweep(net).await?,
        };

        write_live_hosts(&self.layout.live_hosts_file(), &hosts)?;
        tracing::info!(live_hosts = hosts.len(), "Host discovery complete");
        Ok(hosts)
    }

    async fn sweep(&self, net: &IpNet) -> Result<Vec<String>> {
        let mut live: BTreeSet<IpAddr> = BTreeSet::new();

        let masscan_file = self.layout.discovery_dir().join("masscan_results.txt");
        remove_stale(&masscan_file)?;
        let masscan = ToolCommand::new(&self.config.masscan_path)
            .arg(net.to_string())
            .arg(format!("--rate={}", self.config.discovery_rate))
            .args(["-p", self.config.discovery_ports.as_str()])
            .arg("-oL")
            .arg(masscan_file.display().to_string());
        self.runner.run(&masscan).await;

        match fs::read_to_string(&masscan_file) {
            Ok(text) => {
                let found = parse_masscan_list(&text);
                tracing::info!(hosts = found.len(), "masscan probe finished");
                live.extend(found);
            }
            Err(e) => tracing::warn!(error = %e, "masscan produced no results file"),
        }

        let ping_file = self.layout.discovery_dir().join("nmap_ping_scan.xml");
        remove_stale(&ping_file)?;
        let ping = ToolCommand::new(&self.config.nmap_path)
            .args(["-sn", "-T4", "-oX"])
            .arg(ping_file.display().to_string())
            .arg(net.to_string());
        let stdout = self.runner.run(&ping).await;

        let xml = fs::read(&ping_file).ok();
        let found = parse_ping_sweep(xml.as_deref(), &stdout);
        tracing::info!(hosts = found.len(), "nmap ping sweep finished");
        live.extend(found);

        Ok(live.into_iter().map(|ip| ip.to_string()).collect())
    }
}

/// Parse masscan `-oL` output: `open <proto> <port> <addr> <timestamp>`.
pub fn parse_masscan_list(text: &str) -> Vec<IpAddr> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 4 && parts[0] == "open" {
                parts[3].parse().ok()
            } else {
                None
            }
        })
        .collect()
}

static SCAN_REPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Nmap scan report for (?:\S+ \()?([0-9A-Fa-f:.]+)\)?")
        .expect("valid scan report pattern")
});

/// Live hosts from an nmap ping sweep.
///
/// Reads the XML artifact when it parses, otherwise scrapes the normal
/// output's `Nmap scan report for` lines.
pub fn parse_ping_sweep(xml: Option<&[u8]>, stdout: &str) -> Vec<IpAddr> {
    if let Some(Ok(run)) = xml.map(nmap_xml::parse_nmap_xml) {
        return run
            .hosts
            .iter()
            .filter(|h| h.is_up())
            .filter_map(|h| h.ip()?.parse().ok())
            .collect();
    }

    SCAN_REPORT_RE
        .captures_iter(stdout)
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}

fn write_live_hosts(path: &Path, hosts: &[String]) -> Result<()> {
    let mut content = String::new();
    for host in hosts {
        content.push_str(host);
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
