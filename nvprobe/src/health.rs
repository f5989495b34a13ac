//! SMART health evaluation.
//!
//! Five independent rules, always evaluated in the same order. A field that
//! is missing or unreadable produces a warning for that rule only; the
//! remaining rules still run on their own fields.

use crate::telemetry::{FieldIssue, Reading, TelemetryRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CRITICAL_WARNING_MESSAGE: &str = "Critical warning detected!";

/// Limits above which a rule fires. Temperature is in the units nvme-cli
/// reports (Kelvin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthThresholds {
    pub max_temperature: f64,
    pub max_percent_used: f64,
    pub max_media_errors: f64,
    pub max_err_log_entries: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_temperature: 320.0,
            max_percent_used: 80.0,
            max_media_errors: 0.0,
            max_err_log_entries: 0.0,
        }
    }
}

/// The rules, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthRule {
    CriticalWarning,
    Temperature,
    PercentUsed,
    MediaErrors,
    ErrorLogEntries,
}

impl HealthRule {
    pub const ALL: [HealthRule; 5] = [
        HealthRule::CriticalWarning,
        HealthRule::Temperature,
        HealthRule::PercentUsed,
        HealthRule::MediaErrors,
        HealthRule::ErrorLogEntries,
    ];

    /// SMART log field the rule reads.
    pub fn field(&self) -> &'static str {
        match self {
            HealthRule::CriticalWarning => "critical_warning",
            HealthRule::Temperature => "temperature",
            HealthRule::PercentUsed => "percent_used",
            HealthRule::MediaErrors => "media_errors",
            HealthRule::ErrorLogEntries => "num_err_log_entries",
        }
    }

    fn check(&self, value: Reading, limits: &HealthThresholds) -> Option<String> {
        match self {
            HealthRule::CriticalWarning => {
                (!value.is_zero()).then(|| CRITICAL_WARNING_MESSAGE.to_string())
            }
            HealthRule::Temperature => value
                .exceeds(limits.max_temperature)
                .then(|| format!("High temperature detected: {value}K")),
            HealthRule::PercentUsed => value
                .exceeds(limits.max_percent_used)
                .then(|| format!("High usage detected: {value}%")),
            HealthRule::MediaErrors => value
                .exceeds(limits.max_media_errors)
                .then(|| format!("Media errors detected: {value}")),
            HealthRule::ErrorLogEntries => value
                .exceeds(limits.max_err_log_entries)
                .then(|| format!("Error log entries detected: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A limit was exceeded.
    Threshold,
    /// The record lacks the rule's field.
    MissingField,
    /// The field is present but not a number.
    UnreadableField,
}

/// One violated rule, or one rule that could not be checked.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthWarning {
    pub rule: HealthRule,
    pub kind: WarningKind,
    pub message: String,
}

impl HealthWarning {
    pub fn as_str(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HealthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Applies [`HealthRule::ALL`] to a telemetry record. Pure: no I/O.
#[derive(Debug, Clone, Default)]
pub struct HealthEvaluator {
    thresholds: HealthThresholds,
}

impl HealthEvaluator {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    pub fn evaluate(&self, record: &TelemetryRecord) -> Vec<HealthWarning> {
        HealthRule::ALL
            .iter()
            .filter_map(|rule| self.apply(*rule, record))
            .collect()
    }

    fn apply(&self, rule: HealthRule, record: &TelemetryRecord) -> Option<HealthWarning> {
        let field = rule.field();
        let (kind, message) = match record.numeric(field) {
            Ok(value) => (WarningKind::Threshold, rule.check(value, &self.thresholds)?),
            Err(FieldIssue::Missing) => (
                WarningKind::MissingField,
                format!("Missing SMART field: {field}"),
            ),
            Err(FieldIssue::Unreadable(raw)) => (
                WarningKind::UnreadableField,
                format!("Unreadable SMART field {field}: {raw}"),
            ),
        };
        Some(HealthWarning {
            rule,
            kind,
            message,
        })
    }
}

/// Convenience: evaluate with default thresholds and return the messages.
pub fn evaluate(record: &TelemetryRecord) -> Vec<String> {
    HealthEvaluator::default()
        .evaluate(record)
        .into_iter()
        .map(|w| w.message)
        .collect()
}
