//! Benchmark workload definitions and the workload matrix.

use crate::results::HEALTH_STATUS_KEY;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// I/O access pattern of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPattern {
    #[serde(alias = "read")]
    SequentialRead,
    #[serde(alias = "write")]
    SequentialWrite,
    #[serde(alias = "randread")]
    RandomRead,
    #[serde(alias = "randwrite")]
    RandomWrite,
}

impl AccessPattern {
    /// The fio `--rw` value.
    pub fn fio_rw(&self) -> &'static str {
        match self {
            AccessPattern::SequentialRead => "read",
            AccessPattern::SequentialWrite => "write",
            AccessPattern::RandomRead => "randread",
            AccessPattern::RandomWrite => "randwrite",
        }
    }

    /// Which half of fio's report describes this pattern.
    pub fn direction(&self) -> Direction {
        if self.fio_rw().contains("read") {
            Direction::Read
        } else {
            Direction::Write
        }
    }
}

impl FromStr for AccessPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential-read" | "read" => Ok(Self::SequentialRead),
            "sequential-write" | "write" => Ok(Self::SequentialWrite),
            "random-read" | "randread" => Ok(Self::RandomRead),
            "random-write" | "randwrite" => Ok(Self::RandomWrite),
            other => Err(format!("unknown access pattern '{other}'")),
        }
    }
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessPattern::SequentialRead => "sequential-read",
            AccessPattern::SequentialWrite => "sequential-write",
            AccessPattern::RandomRead => "random-read",
            AccessPattern::RandomWrite => "random-write",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One benchmark case. Field aliases accept fio's own vocabulary in config
/// files (`rw`, `bs`, `numjobs`, `iodepth`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadSpec {
    pub name: String,
    #[serde(alias = "rw")]
    pub pattern: AccessPattern,
    /// Block size as fio spells it, e.g. `4K` or `128k`.
    #[serde(alias = "bs")]
    pub block_size: String,
    #[serde(alias = "numjobs")]
    pub parallelism: u32,
    #[serde(alias = "iodepth")]
    pub queue_depth: u32,
}

impl WorkloadSpec {
    pub fn new(
        name: impl Into<String>,
        pattern: AccessPattern,
        block_size: impl Into<String>,
        parallelism: u32,
        queue_depth: u32,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            block_size: block_size.into(),
            parallelism,
            queue_depth,
        }
    }

    pub fn direction(&self) -> Direction {
        self.pattern.direction()
    }

    /// Block size in bytes; `None` when the string is not `<digits>[kKmMgG]`.
    pub fn block_size_bytes(&self) -> Option<u64> {
        parse_block_size(&self.block_size)
    }
}

/// Parse a fio block size (binary multiples, as fio uses by default).
pub fn parse_block_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);
    let base: u64 = digits.parse().ok().filter(|n| *n > 0)?;
    let multiplier: u64 = match suffix {
        "" => 1,
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        _ => return None,
    };
    base.checked_mul(multiplier)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("workload matrix is empty")]
    Empty,

    #[error("duplicate workload name '{0}'")]
    DuplicateName(String),

    #[error("workload name '{0}' is reserved")]
    ReservedName(String),

    #[error("workload name must not be empty")]
    EmptyName,

    #[error("workload '{name}' has invalid block size '{value}'")]
    InvalidBlockSize { name: String, value: String },

    #[error("workload '{0}' must run at least one job")]
    ZeroParallelism(String),

    #[error("workload '{0}' must have a queue depth of at least one")]
    ZeroQueueDepth(String),
}

/// Ordered, validated set of workloads run by every session.
///
/// Names are unique and never collide with the health entry key, so each
/// workload maps to exactly one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WorkloadMatrix(Vec<WorkloadSpec>);

impl WorkloadMatrix {
    pub fn new(specs: Vec<WorkloadSpec>) -> Result<Self, MatrixError> {
        if specs.is_empty() {
            return Err(MatrixError::Empty);
        }
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.name.trim().is_empty() {
                return Err(MatrixError::EmptyName);
            }
            if spec.name == HEALTH_STATUS_KEY {
                return Err(MatrixError::ReservedName(spec.name.clone()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(MatrixError::DuplicateName(spec.name.clone()));
            }
            if spec.block_size_bytes().is_none() {
                return Err(MatrixError::InvalidBlockSize {
                    name: spec.name.clone(),
                    value: spec.block_size.clone(),
                });
            }
            if spec.parallelism == 0 {
                return Err(MatrixError::ZeroParallelism(spec.name.clone()));
            }
            if spec.queue_depth == 0 {
                return Err(MatrixError::ZeroQueueDepth(spec.name.clone()));
            }
        }
        Ok(Self(specs))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WorkloadSpec> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|spec| spec.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&WorkloadSpec> {
        self.0.iter().find(|spec| spec.name == name)
    }
}

impl Default for WorkloadMatrix {
    /// Small-block random I/O across four jobs, then large-block sequential
    /// I/O on one. Writes run before reads of the same size.
    fn default() -> Self {
        use AccessPattern::*;
        Self(vec![
            WorkloadSpec::new("randwrite_4K", RandomWrite, "4K", 4, 32),
            WorkloadSpec::new("randread_4K", RandomRead, "4K", 4, 32),
            WorkloadSpec::new("randwrite_128k", SequentialWrite, "128k", 1, 32),
            WorkloadSpec::new("randread_128k", SequentialRead, "128k", 1, 32),
        ])
    }
}

impl<'a> IntoIterator for &'a WorkloadMatrix {
    type Item = &'a WorkloadSpec;
    type IntoIter = std::slice::Iter<'a, WorkloadSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
