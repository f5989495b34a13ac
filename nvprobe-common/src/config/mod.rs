//! Environment-driven configuration helpers.

pub mod env;
pub mod source;

pub use env::{ENV_PREFIX, EnvError, EnvParser, expand_home};
pub use source::{ConfigSource, Sourced};
