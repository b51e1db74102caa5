//! Port and service scanning.
//!
//! A full nmap run (all ports, version and OS detection) is attempted first.
//! If its XML artifact is missing or implausibly small, a narrower connect
//! scan over well-known ports replaces it. Every host gets a `summary.txt`,
//! and every host comes back with a record, even when both probes failed.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use netmapper_core::HostRecord;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::layout::RunLayout;
use crate::nmap_xml::{self, PortScanFindings};
use crate::runner::{CommandRunner, ToolCommand};
use crate::stages::Stage;

pub struct PortScanStage<R> {
    runner: Arc<R>,
    config: Arc<ScanConfig>,
    layout: RunLayout,
}

impl<R: CommandRunner> PortScanStage<R> {
    pub fn new(runner: Arc<R>, config: Arc<ScanConfig>, layout: RunLayout) -> Self {
        Self {
            runner,
            config,
            layout,
        }
    }

    fn full_scan(&self, ip: &str, output: &Path) -> ToolCommand {
        ToolCommand::new(&self.config.nmap_path)
            .args([
                self.config.scan_mode.port_scan_flag(),
                "-sV",
                "-sC",
                "-O",
                "--version-all",
                "-p-",
                "--max-retries",
                "1",
                "-T4",
                "--max-scan-delay",
                "3s",
                "--host-timeout",
                self.config.host_timeout.as_str(),
                "-oX",
            ])
            .arg(output.display().to_string())
            .arg(ip)
    }

    fn fallback_scan(&self, ip: &str, output: &Path) -> ToolCommand {
        ToolCommand::new(&self.config.nmap_path)
            .args([
                "-sT",
                "-sV",
                "-p",
                self.config.fallback_ports.as_str(),
                "--host-timeout",
                self.config.host_timeout.as_str(),
                "-oX",
            ])
            .arg(output.display().to_string())
            .arg(ip)
    }

    async fn scan(&self, ip: &str) -> Result<PortScanFindings> {
        let host_dir = self.layout.ensure_host_dir(ip)?;
        let artifact = host_dir.join("nmap_scan.xml");

        self.runner.run(&self.full_scan(ip, &artifact)).await;

        if !artifact_usable(&artifact, self.config.min_artifact_bytes) {
            tracing::warn!(
                host = %ip,
                "Full scan produced no usable output, retrying with reduced options"
            );
            self.runner.run(&self.fallback_scan(ip, &artifact)).await;
        }

        if !artifact_usable(&artifact, self.config.min_artifact_bytes) {
            tracing::warn!(host = %ip, "Port scan produced no usable output");
            return Ok(PortScanFindings::default());
        }

        let xml = fs::read(&artifact)?;
        Ok(nmap_xml::extract_findings(&xml))
    }
}

impl<R: CommandRunner> Stage for PortScanStage<R> {
    fn name(&self) -> &'static str {
        "port-scan"
    }

    async fn process(&self, mut record: HostRecord) -> Result<HostRecord> {
        let ip = record.ip().to_string();

        let error = match self.scan(&ip).await {
            Ok(findings) => {
                for (port, service) in findings.services {
                    record.add_open_port(port, service);
                }
                if let Some(os) = findings.os {
                    record.os = os;
                }
                None
            }
            Err(e) => {
                tracing::error!(host = %ip, error = %e, "Error scanning host");
                Some(e.to_string())
            }
        };

        tracing::info!(
            host = %ip,
            open_ports = record.ports().len(),
            os = %record.os,
            "Port scan complete"
        );

        if let Err(e) = self.write_summary(&record, error.as_deref()) {
            tracing::warn!(host = %ip, error = %e, "Failed to write host summary");
        }

        Ok(record)
    }
}

impl<R> PortScanStage<R> {
    fn write_summary(&self, record: &HostRecord, error: Option<&str>) -> Result<()> {
        let dir = self.layout.ensure_host_dir(record.ip())?;
        fs::write(dir.join("summary.txt"), render_summary(record, error))?;
        Ok(())
    }
}

/// The `summary.txt` body for a host.
pub fn render_summary(record: &HostRecord, error: Option<&str>) -> String {
    let ports: Vec<String> = record.ports().iter().map(u16::to_string).collect();
    let mut out = format!(
        "IP: {}\nOpen Ports: {}\nServices: {}\nOS: {}\n",
        record.ip(),
        ports.join(", "),
        record.services().join(", "),
        record.os,
    );
    if let Some(e) = error {
        out.push_str(&format!("Scan Error: {e}\n"));
    }
    out
}

fn artifact_usable(path: &Path, min_bytes: u64) -> bool {
    fs::metadata(path).is_ok_and(|m| m.len() >= min_bytes)
}
