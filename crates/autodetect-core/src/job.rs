// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job documents and the configuration they are created from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{JobError, Result};
use crate::frequency::default_frequency_secs;
use crate::scheduler::{SchedulerConfig, SchedulerState, SchedulerStatus};

/// Free-form user settings stored alongside a job.
pub type CustomSettings = serde_json::Map<String, serde_json::Value>;

/// Longest accepted bucket span: one year.
pub const MAX_BUCKET_SPAN_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest accepted idle timeout: one year.
pub const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// A single analysis function applied to the record stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detector {
	pub function: String,
	pub field_name: Option<String>,
	pub by_field_name: Option<String>,
	pub over_field_name: Option<String>,
	pub partition_field_name: Option<String>,
	pub detector_description: Option<String>,
}

impl Detector {
	pub fn new(function: impl Into<String>) -> Self {
		Self {
			function: function.into(),
			..Default::default()
		}
	}

	pub fn with_field(mut self, field: impl Into<String>) -> Self {
		self.field_name = Some(field.into());
		self
	}

	pub fn with_by_field(mut self, field: impl Into<String>) -> Self {
		self.by_field_name = Some(field.into());
		self
	}

	pub fn with_partition_field(mut self, field: impl Into<String>) -> Self {
		self.partition_field_name = Some(field.into());
		self
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.detector_description = Some(description.into());
		self
	}

	pub fn uses_partitioning(&self) -> bool {
		self.partition_field_name
			.as_deref()
			.is_some_and(|name| !name.is_empty())
	}

	/// Human readable summary, e.g. `mean(responsetime) by airline`.
	pub fn default_description(&self) -> String {
		let mut description = self.function.clone();
		if let Some(field) = non_empty(&self.field_name) {
			description.push('(');
			description.push_str(field);
			description.push(')');
		}
		if let Some(by) = non_empty(&self.by_field_name) {
			description.push_str(" by ");
			description.push_str(by);
		}
		if let Some(over) = non_empty(&self.over_field_name) {
			description.push_str(" over ");
			description.push_str(over);
		}
		if let Some(partition) = non_empty(&self.partition_field_name) {
			description.push_str(" partitionfield=");
			description.push_str(partition);
		}
		description
	}
}

fn non_empty(value: &Option<String>) -> Option<&str> {
	value.as_deref().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
	pub bucket_span_secs: u64,
	pub detectors: Vec<Detector>,
}

impl AnalysisConfig {
	pub fn uses_partitioning(&self) -> bool {
		self.detectors.iter().any(Detector::uses_partitioning)
	}
}

/// Caller supplied description of a job to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
	pub id: Option<String>,
	pub description: Option<String>,
	pub analysis_config: AnalysisConfig,
	pub scheduler_config: Option<SchedulerConfig>,
	pub timeout_secs: Option<u64>,
	#[serde(default)]
	pub custom_settings: CustomSettings,
}

impl JobConfiguration {
	pub fn new(analysis_config: AnalysisConfig) -> Self {
		Self {
			id: None,
			description: None,
			analysis_config,
			scheduler_config: None,
			timeout_secs: None,
			custom_settings: CustomSettings::new(),
		}
	}

	pub fn validate(&self) -> Result<()> {
		let bucket_span_secs = self.analysis_config.bucket_span_secs;
		if bucket_span_secs == 0 {
			return Err(JobError::JobConfiguration(
				"bucket span must be greater than zero".to_string(),
			));
		}
		if bucket_span_secs > MAX_BUCKET_SPAN_SECS {
			return Err(JobError::JobConfiguration(format!(
				"bucket span {bucket_span_secs}s exceeds the maximum of {MAX_BUCKET_SPAN_SECS}s"
			)));
		}
		if let Some(timeout_secs) = self.timeout_secs.filter(|t| *t > MAX_TIMEOUT_SECS) {
			return Err(JobError::JobConfiguration(format!(
				"timeout {timeout_secs}s exceeds the maximum of {MAX_TIMEOUT_SECS}s"
			)));
		}
		if self.analysis_config.detectors.is_empty() {
			return Err(JobError::JobConfiguration(
				"at least one detector must be configured".to_string(),
			));
		}
		if let Some(detector) = self
			.analysis_config
			.detectors
			.iter()
			.find(|d| d.function.trim().is_empty())
		{
			return Err(JobError::JobConfiguration(format!(
				"detector function must be set: {detector:?}"
			)));
		}
		if let Some(scheduler) = &self.scheduler_config {
			if let (Some(start), Some(end)) = (scheduler.start_time_ms, scheduler.end_time_ms) {
				if end <= start {
					return Err(JobError::JobConfiguration(format!(
						"scheduler end time {end} must be after start time {start}"
					)));
				}
			}
		}
		Ok(())
	}

	/// Build the job document, filling every default the configuration left out.
	pub fn into_job(self, id: String, default_timeout_secs: u64, now: DateTime<Utc>) -> Job {
		let bucket_span_secs = self.analysis_config.bucket_span_secs;

		let mut analysis_config = self.analysis_config;
		for detector in &mut analysis_config.detectors {
			if non_empty(&detector.detector_description).is_none() {
				detector.detector_description = Some(detector.default_description());
			}
		}

		let scheduler_config = self.scheduler_config.map(|mut config| {
			if config.frequency_secs.is_none() {
				config.frequency_secs = i64::try_from(bucket_span_secs)
					.ok()
					.and_then(|span| default_frequency_secs(span).ok());
			}
			config
		});
		let scheduler_status = scheduler_config.as_ref().map(|_| SchedulerStatus::Stopped);

		Job {
			id,
			description: self.description.unwrap_or_default(),
			create_time: now,
			last_data_time: None,
			status: JobStatus::Closed,
			scheduler_status,
			scheduler_state: None,
			analysis_config,
			scheduler_config,
			timeout_secs: self.timeout_secs.unwrap_or(default_timeout_secs),
			counts: DataCounts::default(),
			model_size_stats: None,
			ignore_downtime: false,
			custom_settings: self.custom_settings,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
	Closed,
	Running,
	Closing,
	Failed,
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			JobStatus::Closed => write!(f, "CLOSED"),
			JobStatus::Running => write!(f, "RUNNING"),
			JobStatus::Closing => write!(f, "CLOSING"),
			JobStatus::Failed => write!(f, "FAILED"),
		}
	}
}

/// Ingestion counters reported by the analysis process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCounts {
	pub processed_record_count: u64,
	pub input_record_count: u64,
	pub input_bytes: u64,
	pub invalid_date_count: u64,
	pub out_of_order_timestamp_count: u64,
	pub latest_record_timestamp_ms: Option<i64>,
}

impl DataCounts {
	/// Fold the counts of one upload into the running totals.
	pub fn accumulate(&mut self, upload: &DataCounts) {
		self.processed_record_count += upload.processed_record_count;
		self.input_record_count += upload.input_record_count;
		self.input_bytes += upload.input_bytes;
		self.invalid_date_count += upload.invalid_date_count;
		self.out_of_order_timestamp_count += upload.out_of_order_timestamp_count;
		self.latest_record_timestamp_ms = self
			.latest_record_timestamp_ms
			.max(upload.latest_record_timestamp_ms);
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSizeStats {
	pub model_bytes: u64,
	pub total_by_field_count: u64,
	pub total_partition_field_count: u64,
	pub bucket_allocation_failures_count: u64,
	pub memory_status: String,
}

/// Persisted job document. Treated as an immutable snapshot; changes go
/// through [`crate::JobUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
	pub id: String,
	pub description: String,
	pub create_time: DateTime<Utc>,
	pub last_data_time: Option<DateTime<Utc>>,
	pub status: JobStatus,
	pub scheduler_status: Option<SchedulerStatus>,
	pub scheduler_state: Option<SchedulerState>,
	pub analysis_config: AnalysisConfig,
	pub scheduler_config: Option<SchedulerConfig>,
	pub timeout_secs: u64,
	pub counts: DataCounts,
	pub model_size_stats: Option<ModelSizeStats>,
	pub ignore_downtime: bool,
	pub custom_settings: CustomSettings,
}

impl Job {
	pub fn bucket_span_ms(&self) -> i64 {
		i64::try_from(self.analysis_config.bucket_span_secs)
			.unwrap_or(i64::MAX)
			.saturating_mul(1000)
	}

	/// Idle timeout as a duration. A timeout too large to represent comes back
	/// as zero, which the timeout manager treats as never firing by itself.
	pub fn idle_timeout(&self) -> chrono::Duration {
		i64::try_from(self.timeout_secs)
			.ok()
			.and_then(chrono::Duration::try_seconds)
			.unwrap_or_else(chrono::Duration::zero)
	}

	pub fn has_processed_records(&self) -> bool {
		self.counts.processed_record_count > 0
	}

	pub fn is_scheduled(&self) -> bool {
		self.scheduler_config.is_some()
	}
}
