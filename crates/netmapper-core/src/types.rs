//! Host records and the scan run aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::store::HostRecordStore;
use crate::target::TargetDescriptor;

/// OS guess used when no OS match could be extracted.
pub const UNKNOWN_OS: &str = "Unknown";

// ── Host Record ───────────────────────────────────────────────────

/// Accumulated scan data for one live host.
///
/// `ports[i]` is described by `services[i]`; the two lists only change
/// together through [`HostRecord::add_open_port`]. Deserializing a record
/// whose lists differ in length fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HostRecordFields")]
pub struct HostRecord {
    ip: String,
    ports: Vec<u16>,
    services: Vec<String>,
    pub os: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fingerprints: BTreeMap<u16, String>,
    vulnerabilities: Vec<String>,
    weak_credentials: Vec<String>,
}

/// Wire form of a [`HostRecord`], checked before it becomes one.
#[derive(Deserialize)]
struct HostRecordFields {
    ip: String,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    services: Vec<String>,
    #[serde(default = "unknown_os")]
    os: String,
    #[serde(default)]
    fingerprints: BTreeMap<u16, String>,
    #[serde(default)]
    vulnerabilities: Vec<String>,
    #[serde(default)]
    weak_credentials: Vec<String>,
}

impl TryFrom<HostRecordFields> for HostRecord {
    type Error = CoreError;

    fn try_from(fields: HostRecordFields) -> Result<Self> {
        if fields.ports.len() != fields.services.len() {
            return Err(CoreError::InvalidRecord(format!(
                "{}: {} ports but {} services",
                fields.ip,
                fields.ports.len(),
                fields.services.len()
            )));
        }
        Ok(Self {
            ip: fields.ip,
            ports: fields.ports,
            services: fields.services,
            os: fields.os,
            fingerprints: fields.fingerprints,
            vulnerabilities: fields.vulnerabilities,
            weak_credentials: fields.weak_credentials,
        })
    }
}

fn unknown_os() -> String {
    UNKNOWN_OS.to_string()
}

impl HostRecord {
    /// An empty record: host seen, nothing known about it yet.
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ports: Vec::new(),
            services: Vec::new(),
            os: unknown_os(),
            fingerprints: BTreeMap::new(),
            vulnerabilities: Vec::new(),
            weak_credentials: Vec::new(),
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn vulnerabilities(&self) -> &[String] {
        &self.vulnerabilities
    }

    pub fn weak_credentials(&self) -> &[String] {
        &self.weak_credentials
    }

    /// Record an open port with its service description.
    pub fn add_open_port(&mut self, port: u16, service: impl Into<String>) {
        self.ports.push(port);
        self.services.push(service.into());
    }

    /// Iterate `(port, service)` pairs in scan order.
    pub fn open_services(&self) -> impl Iterator<Item = (u16, &str)> {
        self.ports
            .iter()
            .copied()
            .zip(self.services.iter().map(String::as_str))
    }

    pub fn has_port(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    /// Append a vulnerability finding. Returns false if it was already present.
    pub fn add_vulnerability(&mut self, finding: impl Into<String>) -> bool {
        push_unique(&mut self.vulnerabilities, finding.into())
    }

    /// Append a weak-credential finding. Returns false if it was already present.
    pub fn add_weak_credential(&mut self, finding: impl Into<String>) -> bool {
        push_unique(&mut self.weak_credentials, finding.into())
    }

    pub fn is_vulnerable(&self) -> bool {
        !self.vulnerabilities.is_empty()
    }
}

fn push_unique(list: &mut Vec<String>, item: String) -> bool {
    if list.contains(&item) {
        return false;
    }
    list.push(item);
    true
}

// ── Scan Run ──────────────────────────────────────────────────────

/// One pipeline invocation: the target, what was found live, and every
/// host record. Serialized as `report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub run_id: Uuid,
    pub target: TargetDescriptor,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub live_hosts: Vec<String>,
    #[serde(default)]
    pub hosts: HostRecordStore,
    #[serde(default)]
    pub vulnerable_hosts: Vec<String>,
}

impl ScanRun {
    pub fn new(target: TargetDescriptor) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target,
            started_at: Utc::now(),
            live_hosts: Vec::new(),
            hosts: HostRecordStore::new(),
            vulnerable_hosts: Vec::new(),
        }
    }

    /// Recompute the vulnerable host list from the store.
    pub fn refresh_vulnerable_hosts(&mut self) {
        self.vulnerable_hosts = self.hosts.vulnerable_hosts();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
