//! Typed parsing of `NVPROBE_*` environment variables.
//!
//! Errors are collected rather than returned one at a time so a caller can
//! report every bad variable in a single message.

use super::source::{ConfigSource, Sourced};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Prefix shared by every probe variable.
pub const ENV_PREFIX: &str = "NVPROBE_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment parser with error accumulation.
pub struct EnvParser {
    prefix: &'static str,
    lookup: Lookup,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser over the process environment.
    pub fn new() -> Self {
        Self {
            prefix: ENV_PREFIX,
            lookup: Box::new(|key| std::env::var(key).ok()),
            errors: Vec::new(),
        }
    }

    /// Parser over a fixed set of variables instead of the process
    /// environment. Keys are full names, prefix included.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            prefix: ENV_PREFIX,
            lookup: Box::new(move |key| vars.get(key).cloned()),
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn read(&self, name: &str) -> (String, Option<String>) {
        let var_name = format!("{}{}", self.prefix, name);
        let value = (self.lookup)(&var_name);
        (var_name, value)
    }

    /// `None` when unset or set to the empty string.
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match self.read(name) {
            (var, Some(value)) if value.trim().is_empty() => Sourced::from_env(None, var),
            (var, Some(value)) => Sourced::from_env(Some(value), var),
            (_, None) => Sourced::default_value(None),
        }
    }

    /// Accepts 1/true/yes/on and 0/false/no/off/"" in any case.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let (var, Some(value)) = self.read(name) else {
            return Sourced::default_value(default);
        };
        let parsed = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var.clone(),
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                return Sourced::default_value(default);
            }
        };
        Sourced::from_env(parsed, var)
    }

    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let (var, Some(value)) = self.read(name) else {
            return Sourced::default_value(default);
        };
        match value.trim().parse::<u64>() {
            Ok(n) if (min..=max).contains(&n) => Sourced::from_env(n, var),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "unsigned integer".to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// Optional path with `~/` expanded against the home directory.
    pub fn get_optional_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        self.get_optional_string(name)
            .map(|value| value.map(|raw| expand_home(&raw)))
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EnvParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvParser")
            .field("prefix", &self.prefix)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

/// Expand a leading `~/` to the current user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}
