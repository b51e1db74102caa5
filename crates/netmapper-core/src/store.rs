//! The host record store.
//!
//! One store exists per run. It is created by the pipeline driver and passed
//! to each stage in turn, so later stages see what earlier ones recorded.
//! Records are kept in insertion order (the live-host order) and are never
//! removed during a run.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::HostRecord;

/// Address → record mapping, ordered by first insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRecordStore {
    order: Vec<String>,
    records: HashMap<String, HostRecord>,
}

impl HostRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, ip: &str) -> Option<&HostRecord> {
        self.records.get(ip)
    }

    /// Return the record for `ip`, creating an empty one if the host is new.
    pub fn ensure(&mut self, ip: &str) -> &mut HostRecord {
        if !self.records.contains_key(ip) {
            self.order.push(ip.to_string());
        }
        self.records
            .entry(ip.to_string())
            .or_insert_with(|| HostRecord::new(ip))
    }

    /// Replace the record for its address, keeping its original position.
    pub fn upsert(&mut self, record: HostRecord) {
        if !self.records.contains_key(record.ip()) {
            self.order.push(record.ip().to_string());
        }
        self.records.insert(record.ip().to_string(), record);
    }

    /// Addresses in insertion order.
    pub fn addresses(&self) -> &[String] {
        &self.order
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HostRecord> {
        self.order.iter().filter_map(|ip| self.records.get(ip))
    }

    /// Addresses whose record carries at least one vulnerability finding.
    pub fn vulnerable_hosts(&self) -> Vec<String> {
        self.iter()
            .filter(|r| r.is_vulnerable())
            .map(|r| r.ip().to_string())
            .collect()
    }
}

impl Serialize for HostRecordStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for record in self.iter() {
            map.serialize_entry(record.ip(), record)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HostRecordStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(StoreVisitor)
    }
}

struct StoreVisitor;

impl<'de> Visitor<'de> for StoreVisitor {
    type Value = HostRecordStore;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of address to host record")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut store = HostRecordStore::new();
        while let Some((_, record)) = access.next_entry::<String, HostRecord>()? {
            store.upsert(record);
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_creates_once() {
        let mut store = HostRecordStore::new();
        store.ensure("10.0.0.5").add_open_port(22, "ssh");
        store.ensure("10.0.0.5");

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("10.0.0.5").unwrap().ports(), &[22]);
    }

    #[test]
    fn test_upsert_keeps_insertion_order() {
        let mut store = HostRecordStore::new();
        store.ensure("10.0.0.5");
        store.ensure("10.0.0.1");

        let mut updated = HostRecord::new("10.0.0.5");
        updated.os = "Linux 5.15 (accuracy: 95%)".to_string();
        store.upsert(updated);

        assert_eq!(store.addresses(), &["10.0.0.5", "10.0.0.1"]);
        assert_eq!(store.get("10.0.0.5").unwrap().os, "Linux 5.15 (accuracy: 95%)");
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let mut store = HostRecordStore::new();
        store.ensure("10.0.0.9");
        store.ensure("10.0.0.2");

        let json = serde_json::to_string(&store).unwrap();
        let nine = json.find("\"10.0.0.9\":").unwrap();
        let two = json.find("\"10.0.0.2\":").unwrap();
        assert!(nine < two);

        let back: HostRecordStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
