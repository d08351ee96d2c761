//! Zero Common - Shared configuration and logging for the Zero services.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.codecoder/config.json` + `ZERO_*` env)
//! - Logging setup with noise suppression

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;

pub use config::{Config, FundFlowConfig, ObservabilityConfig};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, FundFlowConfig, ObservabilityConfig};
    pub use crate::logging::{init_from_config, init_logging};
}
