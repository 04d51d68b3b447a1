//! Deployment Configuration Module
//!
//! One immutable [`SentinelConfig`] is built at startup and handed to the
//! components that need it. There is no global config.
//!
//! ## Loading Order
//!
//! 1. TOML file: `--config` / `SENTINEL_CONFIG`, else `./sentinel.toml` if present
//! 2. Environment variable overrides (`LINE_NAME`, `MQTT_HOST`, `MODEL_WINDOW_SIZE`, ...)
//! 3. [`SentinelConfig::validate`], which reports every problem at once
//!
//! ```ignore
//! let config = SentinelConfig::load(args.config.as_deref())?;
//! let policy = config.detector.three_sigma_policy();
//! ```

pub mod defaults;
mod sentinel_config;
pub mod validation;

pub use sentinel_config::*;
