//! Default-credential checks.
//!
//! Login services found by the port scan are tried against a small shared
//! username and password list: hydra for SSH, FTP and SMB, medusa for MySQL
//! and PostgreSQL. Each accepted login becomes one weak-credential finding.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use netmapper_core::HostRecord;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::layout::RunLayout;
use crate::runner::{CommandRunner, ToolCommand};
use crate::stages::{Stage, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginService {
    Ssh,
    Ftp,
    Smb,
    MySql,
    PostgreSql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BruteTool {
    Hydra,
    Medusa,
}

impl LoginService {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ssh => "SSH",
            Self::Ftp => "FTP",
            Self::Smb => "SMB",
            Self::MySql => "MySQL",
            Self::PostgreSql => "PostgreSQL",
        }
    }

    pub fn tool(&self) -> BruteTool {
        match self {
            Self::Ssh | Self::Ftp | Self::Smb => BruteTool::Hydra,
            Self::MySql | Self::PostgreSql => BruteTool::Medusa,
        }
    }

    /// Hydra service scheme or medusa module name.
    fn module(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Ftp => "ftp",
            Self::Smb => "smb",
            Self::MySql => "mysql",
            Self::PostgreSql => "postgres",
        }
    }

    /// Parallel connections per target. SMB locks out under parallel logins.
    fn tasks(&self) -> u8 {
        match self {
            Self::Ssh | Self::Ftp => 4,
            Self::Smb | Self::MySql | Self::PostgreSql => 1,
        }
    }
}

const LOGIN_PORTS: &[(u16, LoginService)] = &[
    (21, LoginService::Ftp),
    (22, LoginService::Ssh),
    (139, LoginService::Smb),
    (445, LoginService::Smb),
    (3306, LoginService::MySql),
    (5432, LoginService::PostgreSql),
];

static LOGIN_SERVICES: Lazy<HashMap<u16, LoginService>> =
    Lazy::new(|| LOGIN_PORTS.iter().copied().collect());

pub fn login_service(port: u16) -> Option<LoginService> {
    LOGIN_SERVICES.get(&port).copied()
}

/// Login services present on a host, in port order, each listed once.
pub fn services_for(ports: &[u16]) -> Vec<LoginService> {
    let mut services = Vec::new();
    for service in ports.iter().filter_map(|&p| login_service(p)) {
        if !services.contains(&service) {
            services.push(service);
        }
    }
    services
}

static HYDRA_LOGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"login:[ \t]*(\S+)[ \t]+password:[ \t]*(\S*)").expect("valid hydra pattern")
});

static MEDUSA_LOGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?m)ACCOUNT FOUND:.*?User:[ \t]*(\S+)[ \t]+",
        r"Password:[ \t]*(.*?)[ \t]*(?:\[SUCCESS\])?[ \t]*\r?$",
    ))
    .expect("valid medusa pattern")
});

/// `(user, password)` pairs hydra reported as valid.
pub fn parse_hydra(output: &str) -> Vec<(String, String)> {
    HYDRA_LOGIN_RE
        .captures_iter(output)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// `(user, password)` pairs medusa reported as valid.
pub fn parse_medusa(output: &str) -> Vec<(String, String)> {
    MEDUSA_LOGIN_RE
        .captures_iter(output)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Write the shared wordlists if they do not exist yet.
pub fn ensure_wordlists(layout: &RunLayout, config: &ScanConfig) -> Result<()> {
    write_once(&layout.userlist_file(), &config.usernames)?;
    write_once(&layout.passlist_file(), &config.passwords)?;
    Ok(())
}

fn write_once(path: &Path, words: &[String]) -> Result<()> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for word in words {
        writeln!(file, "{word}")?;
    }
    Ok(())
}

pub struct CredentialStage<R> {
    runner: Arc<R>,
    config: Arc<ScanConfig>,
    layout: RunLayout,
}

impl<R: CommandRunner> CredentialStage<R> {
    /// Builds the stage and materializes the shared wordlists.
    pub fn new(runner: Arc<R>, config: Arc<ScanConfig>, layout: RunLayout) -> Result<Self> {
        ensure_wordlists(&layout, &config)?;
        Ok(Self {
            runner,
            config,
            layout,
        })
    }

    fn command(&self, service: LoginService, ip: &str, host_dir: &Path) -> ToolCommand {
        let users = self.layout.userlist_file().display().to_string();
        let passwords = self.layout.passlist_file().display().to_string();
        let tasks = service.tasks().to_string();

        match service.tool() {
            BruteTool::Hydra => ToolCommand::new(&self.config.hydra_path)
                .args(["-L".to_string(), users, "-P".to_string(), passwords])
                .args(["-t".to_string(), tasks])
                .args(["-f", "-e", "nsr", "-o"])
                .arg(
                    host_dir
                        .join(format!("hydra_{}.txt", service.module()))
                        .display()
                        .to_string(),
                )
                .arg(format!("{}://{ip}", service.module())),
            BruteTool::Medusa => ToolCommand::new(&self.config.medusa_path)
                .args(["-h", ip])
                .args(["-U".to_string(), users, "-P".to_string(), passwords])
                .args(["-t".to_string(), tasks])
                .args(["-f", "-M", service.module(), "-O"])
                .arg(
                    host_dir
                        .join(format!("medusa_{}.txt", service.module()))
                        .display()
                        .to_string(),
                ),
        }
    }
}

impl<R: CommandRunner> Stage for CredentialStage<R> {
    fn name(&self) -> &'static str {
        "credentials"
    }

    async fn process(&self, mut record: HostRecord) -> Result<HostRecord> {
        let ip = record.ip().to_string();
        let services = services_for(record.ports());
        if services.is_empty() {
            tracing::debug!(host = %ip, "No login services to check");
            return Ok(record);
        }

        let dir = self.layout.ensure_host_dir(&ip)?;
        let mut transcript = Transcript::create(
            &dir.join("credential_check.txt"),
            &format!("Credential check for {ip}"),
        )?;

        for service in services {
            tracing::debug!(host = %ip, service = service.label(), "Checking default credentials");
            let output = self.runner.run(&self.command(service, &ip, &dir)).await;
            transcript.section(
                &format!("{} CREDENTIAL CHECK:", service.label().to_uppercase()),
                &output,
            )?;

            let found = match service.tool() {
                BruteTool::Hydra => parse_hydra(&output),
                BruteTool::Medusa => parse_medusa(&output),
            };
            for (user, password) in found {
                let finding = format!("Weak {} credentials: {user}/{password}", service.label());
                tracing::warn!(host = %ip, finding = %finding, "Weak credentials found");
                transcript.line(&finding)?;
                record.add_weak_credential(finding);
            }
        }

        Ok(record)
    }
}
