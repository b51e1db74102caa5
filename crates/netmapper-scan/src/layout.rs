//! On-disk artifact layout for one run.
//!
//! ```text
//! {root}/
//!   scan.log
//!   userlist.txt  passlist.txt
//!   discovery/live_hosts.txt
//!   hosts/{address}/summary.txt
//!   hosts/{address}/service_fingerprints.txt
//!   hosts/{address}/vulnerabilities.txt
//!   hosts/{address}/credential_check.txt
//!   report.json  report.html
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("scan.log")
    }

    pub fn discovery_dir(&self) -> PathBuf {
        self.root.join("discovery")
    }

    pub fn live_hosts_file(&self) -> PathBuf {
        self.discovery_dir().join("live_hosts.txt")
    }

    pub fn hosts_dir(&self) -> PathBuf {
        self.root.join("hosts")
    }

    pub fn host_dir(&self, ip: &str) -> PathBuf {
        self.hosts_dir().join(ip)
    }

    /// Create (if needed) and return the per-host artifact directory.
    pub fn ensure_host_dir(&self, ip: &str) -> Result<PathBuf> {
        let dir = self.host_dir(ip);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn userlist_file(&self) -> PathBuf {
        self.root.join("userlist.txt")
    }

    pub fn passlist_file(&self) -> PathBuf {
        self.root.join("passlist.txt")
    }

    pub fn report_json(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn report_html(&self) -> PathBuf {
        self.root.join("report.html")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = RunLayout::new("/scans/run1");
        assert_eq!(
            layout.live_hosts_file(),
            PathBuf::from("/scans/run1/discovery/live_hosts.txt")
        );
        assert_eq!(
            layout.host_dir("10.0.0.1").join("summary.txt"),
            PathBuf::from("/scans/run1/hosts/10.0.0.1/summary.txt")
        );
    }

    #[test]
    fn test_ensure_host_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(tmp.path());
        let dir = layout.ensure_host_dir("10.0.0.7").unwrap();
        assert!(dir.is_dir());
        assert!(layout.hosts_dir().is_dir());
    }
}
