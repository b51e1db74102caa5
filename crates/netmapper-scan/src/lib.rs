//! netmapper-scan: network reconnaissance pipeline.
//!
//! Discovers live hosts in a target range, then enriches each one through
//! port scanning, service fingerprinting, exploit correlation and
//! default-credential checks, all driven through external tools. Results
//! land in a per-run directory and a consolidated report.

pub mod batch;
pub mod config;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod logging;
pub mod nmap_xml;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stages;

#[cfg(test)]
mod testing;
