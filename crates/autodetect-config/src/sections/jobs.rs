// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs configuration section.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_JOBS_FACTOR: f64 = 3.0;
pub const DEFAULT_TIMEOUT_RETRY_BACKOFF_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	/// Kept raw so that a malformed value degrades to the default instead of
	/// failing the whole load.
	#[serde(default, deserialize_with = "deserialize_factor")]
	pub max_jobs_factor: Option<String>,
	pub timeout_retry_backoff_secs: Option<u64>,
	pub default_idle_timeout_secs: Option<u64>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_jobs_factor.is_some() {
			self.max_jobs_factor = other.max_jobs_factor;
		}
		if other.timeout_retry_backoff_secs.is_some() {
			self.timeout_retry_backoff_secs = other.timeout_retry_backoff_secs;
		}
		if other.default_idle_timeout_secs.is_some() {
			self.default_idle_timeout_secs = other.default_idle_timeout_secs;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		JobsConfig {
			max_jobs_factor: self
				.max_jobs_factor
				.as_deref()
				.map_or(DEFAULT_MAX_JOBS_FACTOR, parse_max_jobs_factor),
			timeout_retry_backoff_secs: self
				.timeout_retry_backoff_secs
				.unwrap_or(DEFAULT_TIMEOUT_RETRY_BACKOFF_SECS),
			default_idle_timeout_secs: self
				.default_idle_timeout_secs
				.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
	/// Multiplier applied to the CPU core count to derive the hardware job cap.
	pub max_jobs_factor: f64,
	/// Wait before the single retry of an idle-timeout close that hit a busy job.
	pub timeout_retry_backoff_secs: u64,
	pub default_idle_timeout_secs: u64,
}

impl JobsConfig {
	pub fn timeout_retry_backoff(&self) -> Duration {
		Duration::from_secs(self.timeout_retry_backoff_secs)
	}
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			max_jobs_factor: DEFAULT_MAX_JOBS_FACTOR,
			timeout_retry_backoff_secs: DEFAULT_TIMEOUT_RETRY_BACKOFF_SECS,
			default_idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
		}
	}
}

/// Parse the hardware cap factor. Anything that is not a finite positive number
/// logs a warning and yields [`DEFAULT_MAX_JOBS_FACTOR`].
pub fn parse_max_jobs_factor(raw: &str) -> f64 {
	match raw.trim().parse::<f64>() {
		Ok(factor) if factor.is_finite() && factor > 0.0 => factor,
		_ => {
			warn!(
				value = raw,
				default = DEFAULT_MAX_JOBS_FACTOR,
				"Invalid max jobs factor, using default"
			);
			DEFAULT_MAX_JOBS_FACTOR
		}
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFactor {
	Float(f64),
	Integer(i64),
	Text(String),
}

fn deserialize_factor<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = Option::<RawFactor>::deserialize(deserializer)?;
	Ok(raw.map(|raw| match raw {
		RawFactor::Float(f) => f.to_string(),
		RawFactor::Integer(i) => i.to_string(),
		RawFactor::Text(s) => s,
	}))
}
