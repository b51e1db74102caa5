//! Per-host enrichment stages.
//!
//! Each stage takes one host's record, runs its external tools against that
//! host, and hands back the enriched record. The pipeline driver fans stages
//! out over batches and writes the returned records into the store.

pub mod credentials;
pub mod fingerprint;
pub mod ports;
pub mod vulns;

use std::fs::File;
use std::future::Future;
use std::io::Write;
use std::path::Path;

use netmapper_core::HostRecord;

use crate::error::Result;

pub use credentials::CredentialStage;
pub use fingerprint::FingerprintStage;
pub use ports::PortScanStage;
pub use vulns::VulnerabilityStage;

/// One pipeline phase, applied to every host independently.
pub trait Stage: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Enrich one host's record. The returned record replaces the stored one.
    fn process(&self, record: HostRecord) -> impl Future<Output = Result<HostRecord>> + Send;
}

/// Human-readable per-host artifact, written as the stage goes.
pub(crate) struct Transcript {
    file: File,
}

impl Transcript {
    /// Create (truncating) the file and write a title block.
    pub(crate) fn create(path: &Path, title: &str) -> Result<Self> {
        let mut file = File::create(path)?;
        writeln!(file, "{title}")?;
        writeln!(file, "{}\n", "=".repeat(50))?;
        Ok(Self { file })
    }

    pub(crate) fn section(&mut self, heading: &str, body: &str) -> Result<()> {
        writeln!(self.file, "{heading}")?;
        self.file.write_all(body.as_bytes())?;
        writeln!(self.file, "\n")?;
        Ok(())
    }

    pub(crate) fn line(&mut self, text: &str) -> Result<()> {
        writeln!(self.file, "{text}")?;
        Ok(())
    }
}
