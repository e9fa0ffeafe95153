// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduler configuration and persisted scheduler state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a scheduled job pulls its records from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
	Elasticsearch,
	File,
}

impl fmt::Display for DataSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DataSource::Elasticsearch => write!(f, "ELASTICSEARCH"),
			DataSource::File => write!(f, "FILE"),
		}
	}
}

/// Data extraction settings of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
	pub data_source: DataSource,
	pub base_url: String,
	/// Epoch millis of the first record to extract. `None` means full history.
	pub start_time_ms: Option<i64>,
	/// Epoch millis to stop at. When set the scheduler runs a lookback only.
	pub end_time_ms: Option<i64>,
	/// Real-time polling frequency; derived from the bucket span when absent.
	pub frequency_secs: Option<u64>,
}

impl SchedulerConfig {
	pub fn new(data_source: DataSource, base_url: impl Into<String>) -> Self {
		Self {
			data_source,
			base_url: base_url.into(),
			start_time_ms: None,
			end_time_ms: None,
			frequency_secs: None,
		}
	}
}

/// Lifecycle of a job's scheduler.
///
/// `Stopped -> Started -> Stopping -> Stopped`; a shutdown-time halt finishes in
/// `Started` so the scheduler is resumed on the next startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerStatus {
	Started,
	Stopping,
	Stopped,
}

impl fmt::Display for SchedulerStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SchedulerStatus::Started => write!(f, "STARTED"),
			SchedulerStatus::Stopping => write!(f, "STOPPING"),
			SchedulerStatus::Stopped => write!(f, "STOPPED"),
		}
	}
}

/// Checkpoint of where the scheduler's extraction pointer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
	pub start_time_ms: i64,
	pub end_time_ms: Option<i64>,
}

impl SchedulerState {
	pub fn new(start_time_ms: i64, end_time_ms: Option<i64>) -> Self {
		Self {
			start_time_ms,
			end_time_ms,
		}
	}
}
