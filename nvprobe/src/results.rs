//! The per-session result set and its JSON and text renderings.

use crate::telemetry::TelemetryRecord;
use crate::workload::Direction;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Key of the health entry; workload names may not use it.
pub const HEALTH_STATUS_KEY: &str = "health_status";

/// Measured outcome of one workload. Serialized field names match the
/// artifacts written by earlier releases of the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    #[serde(rename = "type")]
    pub direction: Direction,
    pub block_size: String,
    #[serde(rename = "IOPS")]
    pub iops: f64,
    #[serde(rename = "Bandwidth_MBps")]
    pub bandwidth_mbps: f64,
    #[serde(rename = "Latency_us")]
    pub latency_us: f64,
}

/// A workload that produced no measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error: String,
}

impl FailureRecord {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Outcome of one workload: a measurement or the reason there is none.
pub type WorkloadOutcome = Result<PerformanceRecord, FailureRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTag {
    HealthStatus,
}

/// Raw telemetry wrapped with its discriminator tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEntry {
    #[serde(rename = "type")]
    pub tag: HealthTag,
    pub details: TelemetryRecord,
}

impl HealthEntry {
    pub fn new(details: TelemetryRecord) -> Self {
        Self {
            tag: HealthTag::HealthStatus,
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEntry {
    Health(HealthEntry),
    Performance(PerformanceRecord),
    Failure(FailureRecord),
}

impl From<WorkloadOutcome> for ResultEntry {
    fn from(outcome: WorkloadOutcome) -> Self {
        match outcome {
            Ok(record) => ResultEntry::Performance(record),
            Err(failure) => ResultEntry::Failure(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("result key '{0}' was already recorded")]
pub struct DuplicateKey(pub String);

/// Append-only mapping from result key to entry, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    entries: Vec<(String, ResultEntry)>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: ResultEntry) -> Result<(), DuplicateKey> {
        let key = key.into();
        if self.contains_key(&key) {
            return Err(DuplicateKey(key));
        }
        self.entries.push((key, entry));
        Ok(())
    }

    pub fn record_health(&mut self, details: TelemetryRecord) -> Result<(), DuplicateKey> {
        self.insert(HEALTH_STATUS_KEY, ResultEntry::Health(HealthEntry::new(details)))
    }

    pub fn get(&self, key: &str) -> Option<&ResultEntry> {
        self.entries
            .iter()
            .find_map(|(k, entry)| (k == key).then_some(entry))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResultEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys whose entry is a failure.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &FailureRecord)> {
        self.iter().filter_map(|(k, entry)| match entry {
            ResultEntry::Failure(failure) => Some((k, failure)),
            _ => None,
        })
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, entry) in &self.entries {
            map.serialize_entry(key, entry)?;
        }
        map.end()
    }
}

/// Human-readable summary of a result set.
pub fn render_report(results: &ResultSet) -> String {
    Report(results).to_string()
}

/// Text form of a [`ResultSet`], one block per entry in insertion order.
pub struct Report<'a>(pub &'a ResultSet);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "NVMe probe results:")?;
        for (key, entry) in self.0.iter() {
            writeln!(f, "\n Test item: {key}")?;
            match entry {
                ResultEntry::Failure(failure) => {
                    writeln!(f, "Status: Failure")?;
                    writeln!(f, "Error: {}", failure.error)?;
                }
                ResultEntry::Performance(record) => {
                    writeln!(f, "Type: {}", record.direction)?;
                    writeln!(f, "Block Size: {}", record.block_size)?;
                    writeln!(f, "IOPS: {:.2}", record.iops)?;
                    writeln!(f, "Bandwidth (MB/s): {:.2}", record.bandwidth_mbps)?;
                    writeln!(f, "Latency (us): {:.2}", record.latency_us)?;
                }
                ResultEntry::Health(health) => {
                    writeln!(f, "Health Status Details:")?;
                    for (field, value) in health.details.fields() {
                        writeln!(f, "{field}: {value}")?;
                    }
                }
            }
        }
        Ok(())
    }
}
