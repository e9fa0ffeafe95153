// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the autodetect job engine.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Consistent environment variable naming (`AUTODETECT_*`)
//! - Installation of the `tracing` subscriber from the logging section
//!
//! # Usage
//!
//! ```ignore
//! use autodetect_config::{init_tracing, load_config};
//!
//! let config = load_config()?;
//! init_tracing(&config.logging)?;
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::EngineConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Fully resolved engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
	pub jobs: JobsConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`AUTODETECT_*`)
/// 2. Config file (`/etc/autodetect/engine.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<EngineConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<EngineConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<EngineConfig, ConfigError> {
	load_from(vec![Box::new(DefaultsSource), Box::new(EnvSource)])
}

pub fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<EngineConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = EngineConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	Ok(finalize(merged))
}

fn finalize(layer: EngineConfigLayer) -> EngineConfig {
	let jobs = layer.jobs.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	info!(
		max_jobs_factor = jobs.max_jobs_factor,
		timeout_retry_backoff_secs = jobs.timeout_retry_backoff_secs,
		default_idle_timeout_secs = jobs.default_idle_timeout_secs,
		log_level = %logging.level,
		"configuration loaded"
	);

	EngineConfig { jobs, logging }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the configured level. Returns an error if a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
	let registry = tracing_subscriber::registry().with(filter);

	let result = if config.json {
		registry.with(fmt::layer().json()).try_init()
	} else {
		registry.with(fmt::layer()).try_init()
	};
	result.map_err(|e| ConfigError::Tracing(e.to_string()))
}
