//! Configuration for the netmapper scan pipeline.

use serde::Deserialize;

use crate::error::{Result, ScanError};

/// Top-level scan configuration.
///
/// Loaded from `netmapper.toml` `[scan]` section or
/// `NETMAPPER_SCAN__` environment variables. CLI flags override both.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    #[serde(default = "default_masscan_path")]
    pub masscan_path: String,

    #[serde(default = "default_curl_path")]
    pub curl_path: String,

    #[serde(default = "default_searchsploit_path")]
    pub searchsploit_path: String,

    #[serde(default = "default_hydra_path")]
    pub hydra_path: String,

    #[serde(default = "default_medusa_path")]
    pub medusa_path: String,

    /// Worker pool size for each stage.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Hosts per batch. The effective batch is `min(batch_size, threads)`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Port scan technique.
    #[serde(default)]
    pub scan_mode: ScanMode,

    #[serde(default = "default_true")]
    pub fingerprinting: bool,

    #[serde(default = "default_true")]
    pub vulnerability_scan: bool,

    #[serde(default = "default_true")]
    pub credential_check: bool,

    /// Per-host wall-clock limit passed to nmap's `--host-timeout`.
    #[serde(default = "default_host_timeout")]
    pub host_timeout: String,

    /// Port scan artifacts smaller than this are treated as failed runs.
    #[serde(default = "default_min_artifact_bytes")]
    pub min_artifact_bytes: u64,

    /// Port list for the fast masscan discovery sweep.
    #[serde(default = "default_discovery_ports")]
    pub discovery_ports: String,

    /// masscan packet rate.
    #[serde(default = "default_discovery_rate")]
    pub discovery_rate: u32,

    /// Port list for the reduced fallback scan.
    #[serde(default = "default_fallback_ports")]
    pub fallback_ports: String,

    /// Usernames tried by the credential stage.
    #[serde(default = "default_usernames")]
    pub usernames: Vec<String>,

    /// Passwords tried by the credential stage. May include the empty password.
    #[serde(default = "default_passwords")]
    pub passwords: Vec<String>,
}

/// How the port scan probes hosts.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Raw SYN scan, requires root: `-sS`
    #[default]
    Syn,
    /// Full TCP connect scan, unprivileged: `-sT`
    Connect,
}

impl ScanMode {
    /// Return the nmap scan technique flag for this mode.
    pub fn port_scan_flag(&self) -> &'static str {
        match self {
            Self::Syn => "-sS",
            Self::Connect => "-sT",
        }
    }
}

impl ScanConfig {
    /// Load the `[scan]` section from `{file_prefix}.toml` (optional) and
    /// `NETMAPPER_SCAN__*` environment variables.
    ///
    /// A missing section yields the defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("NETMAPPER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ScanError::Config(e.to_string()))?;

        let config = match cfg.get::<ScanConfig>("scan") {
            Ok(c) => c,
            Err(config::ConfigError::NotFound(_)) => ScanConfig::default(),
            Err(e) => return Err(ScanError::Config(e.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(ScanError::Config("threads must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ScanError::Config("batch_size must be at least 1".to_string()));
        }
        if self.usernames.is_empty() || self.passwords.is_empty() {
            return Err(ScanError::Config(
                "credential wordlists must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of hosts handed to one scheduler invocation.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.min(self.threads).max(1)
    }
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_masscan_path() -> String {
    "masscan".to_string()
}

fn default_curl_path() -> String {
    "curl".to_string()
}

fn default_searchsploit_path() -> String {
    "searchsploit".to_string()
}

fn default_hydra_path() -> String {
    "hydra".to_string()
}

fn default_medusa_path() -> String {
    "medusa".to_string()
}

fn default_threads() -> usize {
    10
}

fn default_batch_size() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_host_timeout() -> String {
    "10m".to_string()
}

fn default_min_artifact_bytes() -> u64 {
    100
}

fn default_discovery_ports() -> String {
    "80,443,22,3389".to_string()
}

fn default_discovery_rate() -> u32 {
    500
}

fn default_fallback_ports() -> String {
    "21,22,23,25,53,80,110,111,135,139,143,443,445,993,995,1723,3306,3389,5900,8080".to_string()
}

fn default_usernames() -> Vec<String> {
    ["admin", "root", "user", "test", "guest", "administrator"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_passwords() -> Vec<String> {
    ["password", "admin", "123456", "qwerty", "welcome", "test", ""]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            nmap_path: default_nmap_path(),
            masscan_path: default_masscan_path(),
            curl_path: default_curl_path(),
            searchsploit_path: default_searchsploit_path(),
            hydra_path: default_hydra_path(),
            medusa_path: default_medusa_path(),
            threads: default_threads(),
            batch_size: default_batch_size(),
            scan_mode: ScanMode::default(),
            fingerprinting: true,
            vulnerability_scan: true,
            credential_check: true,
            host_timeout: default_host_timeout(),
            min_artifact_bytes: default_min_artifact_bytes(),
            discovery_ports: default_discovery_ports(),
            discovery_rate: default_discovery_rate(),
            fallback_ports: default_fallback_ports(),
            usernames: default_usernames(),
            passwords: default_passwords(),
        }
    }
}
