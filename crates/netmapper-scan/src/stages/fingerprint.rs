//! Service fingerprinting.
//!
//! Open ports are looked up in a static probe table. Web ports get a header
//! fetch plus an nmap banner probe, SSH gets the SSH enumeration scripts,
//! and database ports get their product's info script. Whatever identifies
//! the service lands in `HostRecord::fingerprints` keyed by port.

use std::collections::HashMap;
use std::sync::Arc;

use netmapper_core::HostRecord;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::layout::RunLayout;
use crate::runner::{CommandRunner, ToolCommand};
use crate::stages::{Stage, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    MsSql,
    MySql,
    PostgreSql,
}

impl DatabaseKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MsSql => "MSSQL",
            Self::MySql => "MySQL",
            Self::PostgreSql => "PostgreSQL",
        }
    }

    fn nmap_script(&self) -> &'static str {
        match self {
            Self::MsSql => "ms-sql-info",
            Self::MySql => "mysql-info",
            Self::PostgreSql => "pgsql-info",
        }
    }
}

/// What kind of probing a port gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFamily {
    Web { tls: bool },
    Shell,
    Database(DatabaseKind),
}

const PROBE_TABLE: &[(u16, ProbeFamily)] = &[
    (80, ProbeFamily::Web { tls: false }),
    (8080, ProbeFamily::Web { tls: false }),
    (443, ProbeFamily::Web { tls: true }),
    (8443, ProbeFamily::Web { tls: true }),
    (22, ProbeFamily::Shell),
    (1433, ProbeFamily::Database(DatabaseKind::MsSql)),
    (3306, ProbeFamily::Database(DatabaseKind::MySql)),
    (5432, ProbeFamily::Database(DatabaseKind::PostgreSql)),
];

static PROBES: Lazy<HashMap<u16, ProbeFamily>> =
    Lazy::new(|| PROBE_TABLE.iter().copied().collect());

/// Probe family for `port`, if it is one the stage knows how to fingerprint.
pub fn probe_family(port: u16) -> Option<ProbeFamily> {
    PROBES.get(&port).copied()
}

/// Web server signatures, most general first. The first match wins.
static WEB_SIGNATURES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("Apache", r"Apache[/\s]([0-9.]+)"),
        ("nginx", r"nginx[/\s]([0-9.]+)"),
        ("IIS", r"Microsoft-IIS[/\s]([0-9.]+)"),
        ("Tomcat", r"Apache Tomcat[/\s]([0-9.]+)"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid web signature")))
    .collect()
});

static SERVER_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^server:[ \t]*([^\r\n]+)").expect("valid server header pattern")
});

static SSH_BANNER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SSH-([0-9.]+)-(\S+)").expect("valid ssh banner pattern"));

static DB_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Version:\s*([0-9.]+)").expect("valid db version pattern"));

/// The `Server:` header value from a raw HTTP response head.
pub fn server_header(headers: &str) -> Option<&str> {
    SERVER_HEADER_RE
        .captures(headers)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Map a `Server:` header value onto `"{product} {version}"`.
pub fn match_web_signature(server: &str) -> Option<String> {
    WEB_SIGNATURES.iter().find_map(|(name, re)| {
        re.captures(server)
            .map(|caps| format!("{name} {}", &caps[1]))
    })
}

pub fn match_ssh_banner(output: &str) -> Option<String> {
    SSH_BANNER_RE
        .captures(output)
        .map(|caps| format!("SSH {} ({})", &caps[1], &caps[2]))
}

pub fn match_database_version(kind: DatabaseKind, output: &str) -> Option<String> {
    DB_VERSION_RE
        .captures(output)
        .map(|caps| format!("{} {}", kind.label(), &caps[1]))
}

pub struct FingerprintStage<R> {
    runner: Arc<R>,
    config: Arc<ScanConfig>,
    layout: RunLayout,
}

impl<R: CommandRunner> FingerprintStage<R> {
    pub fn new(runner: Arc<R>, config: Arc<ScanConfig>, layout: RunLayout) -> Self {
        Self {
            runner,
            config,
            layout,
        }
    }

    fn nmap_script(&self, ip: &str, port: u16, script: &str) -> ToolCommand {
        ToolCommand::new(&self.config.nmap_path)
            .arg("-sV")
            .arg(format!("--script={script}"))
            .args(["-p".to_string(), port.to_string(), ip.to_string()])
    }

    async fn probe_web(
        &self,
        ip: &str,
        port: u16,
        tls: bool,
        transcript: &mut Transcript,
    ) -> Result<Option<String>> {
        let scheme = if tls { "https" } else { "http" };
        let curl = ToolCommand::new(&self.config.curl_path)
            .args(["-s", "-I", "-k", "--max-time", "15"])
            .arg(format!("{scheme}://{ip}:{port}"));
        let headers = self.runner.run(&curl).await;
        let banner = self.runner.run(&self.nmap_script(ip, port, "banner")).await;

        transcript.line(&format!(
            "{} SERVICE (PORT {port}):",
            scheme.to_uppercase()
        ))?;
        transcript.section("Headers:", &headers)?;
        transcript.section("Nmap fingerprinting:", &banner)?;

        Ok(server_header(&headers).and_then(match_web_signature))
    }

    async fn probe_shell(
        &self,
        ip: &str,
        port: u16,
        transcript: &mut Transcript,
    ) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&self.nmap_script(ip, port, "ssh-auth-methods,ssh2-enum-algos"))
            .await;
        transcript.section(&format!("SSH SERVICE (PORT {port}):"), &output)?;
        Ok(match_ssh_banner(&output))
    }

    async fn probe_database(
        &self,
        ip: &str,
        port: u16,
        kind: DatabaseKind,
        transcript: &mut Transcript,
    ) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&self.nmap_script(ip, port, kind.nmap_script()))
            .await;
        transcript.section(
            &format!("{} SERVICE (PORT {port}):", kind.label().to_uppercase()),
            &output,
        )?;
        Ok(match_database_version(kind, &output))
    }
}

impl<R: CommandRunner> Stage for FingerprintStage<R> {
    fn name(&self) -> &'static str {
        "fingerprint"
    }

    async fn process(&self, mut record: HostRecord) -> Result<HostRecord> {
        let ip = record.ip().to_string();
        let targets: Vec<(u16, ProbeFamily)> = record
            .ports()
            .iter()
            .filter_map(|&port| probe_family(port).map(|family| (port, family)))
            .collect();

        if targets.is_empty() {
            tracing::debug!(host = %ip, "No fingerprintable ports");
            return Ok(record);
        }

        let dir = self.layout.ensure_host_dir(&ip)?;
        let mut transcript = Transcript::create(
            &dir.join("service_fingerprints.txt"),
            &format!("Service fingerprinting for {ip}"),
        )?;

        let mut identified = Vec::new();
        for (port, family) in targets {
            let found = match family {
                ProbeFamily::Web { tls } => self.probe_web(&ip, port, tls, &mut transcript).await?,
                ProbeFamily::Shell => self.probe_shell(&ip, port, &mut transcript).await?,
                ProbeFamily::Database(kind) => {
                    self.probe_database(&ip, port, kind, &mut transcript).await?
                }
            };

            if let Some(fingerprint) = found {
                transcript.line(&format!("Identified as: {fingerprint}\n"))?;
                record.fingerprints.insert(port, fingerprint.clone());
                identified.push((port, fingerprint));
            }
        }

        transcript.line("FINGERPRINTING SUMMARY:")?;
        transcript.line(&"-".repeat(30))?;
        for (port, fingerprint) in &identified {
            transcript.line(&format!("Port {port}: {fingerprint}"))?;
        }

        tracing::info!(host = %ip, identified = identified.len(), "Fingerprinting complete");
        Ok(record)
    }
}
