//! netmapper-core: Shared types for the netmapper reconnaissance pipeline.
//!
//! This crate provides the data model every pipeline stage works against:
//! - Target specifications (network block or explicit address list)
//! - Per-host scan records, enriched stage by stage
//! - The host record store shared across stages
//! - The scan run aggregate that is persisted as the final report

pub mod error;
pub mod store;
pub mod target;
pub mod types;

pub use error::CoreError;
pub use store::HostRecordStore;
pub use target::TargetDescriptor;
pub use types::{HostRecord, ScanRun};
