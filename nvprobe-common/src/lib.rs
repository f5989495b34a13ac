//! Shared plumbing for the nvprobe workspace.
//!
//! Holds the ambient concerns every nvprobe binary needs and that have
//! nothing to do with NVMe itself: tracing setup and environment-variable
//! configuration with source tracking.

#![forbid(unsafe_code)]

pub mod config;
pub mod logging;

pub use config::{ConfigSource, EnvError, EnvParser, Sourced};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
