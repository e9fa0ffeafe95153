// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial updates to persisted job documents.
//!
//! A [`JobUpdate`] is an ordered list of field assignments. Persistence
//! collaborators either apply it to a stored [`Job`] or render it as a
//! field-name to value map with [`JobUpdate::to_map`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::job::{CustomSettings, DataCounts, Job, JobStatus, ModelSizeStats};
use crate::scheduler::{SchedulerState, SchedulerStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum JobFieldUpdate {
	Status(JobStatus),
	SchedulerStatus(SchedulerStatus),
	SchedulerState(Option<SchedulerState>),
	IgnoreDowntime(bool),
	LastDataTime(DateTime<Utc>),
	Description(String),
	Counts(DataCounts),
	ModelSizeStats(ModelSizeStats),
	CustomSettings(CustomSettings),
}

impl JobFieldUpdate {
	pub fn field_name(&self) -> &'static str {
		match self {
			JobFieldUpdate::Status(_) => "status",
			JobFieldUpdate::SchedulerStatus(_) => "scheduler_status",
			JobFieldUpdate::SchedulerState(_) => "scheduler_state",
			JobFieldUpdate::IgnoreDowntime(_) => "ignore_downtime",
			JobFieldUpdate::LastDataTime(_) => "last_data_time",
			JobFieldUpdate::Description(_) => "description",
			JobFieldUpdate::Counts(_) => "counts",
			JobFieldUpdate::ModelSizeStats(_) => "model_size_stats",
			JobFieldUpdate::CustomSettings(_) => "custom_settings",
		}
	}

	fn value(&self) -> Result<Value> {
		let value = match self {
			JobFieldUpdate::Status(v) => serde_json::to_value(v)?,
			JobFieldUpdate::SchedulerStatus(v) => serde_json::to_value(v)?,
			JobFieldUpdate::SchedulerState(v) => serde_json::to_value(v)?,
			JobFieldUpdate::IgnoreDowntime(v) => Value::Bool(*v),
			JobFieldUpdate::LastDataTime(v) => serde_json::to_value(v)?,
			JobFieldUpdate::Description(v) => Value::String(v.clone()),
			JobFieldUpdate::Counts(v) => serde_json::to_value(v)?,
			JobFieldUpdate::ModelSizeStats(v) => serde_json::to_value(v)?,
			JobFieldUpdate::CustomSettings(v) => Value::Object(v.clone()),
		};
		Ok(value)
	}

	fn apply(&self, job: &mut Job) {
		match self {
			JobFieldUpdate::Status(v) => job.status = *v,
			JobFieldUpdate::SchedulerStatus(v) => job.scheduler_status = Some(*v),
			JobFieldUpdate::SchedulerState(v) => job.scheduler_state = *v,
			JobFieldUpdate::IgnoreDowntime(v) => job.ignore_downtime = *v,
			JobFieldUpdate::LastDataTime(v) => job.last_data_time = Some(*v),
			JobFieldUpdate::Description(v) => job.description = v.clone(),
			JobFieldUpdate::Counts(v) => job.counts = v.clone(),
			JobFieldUpdate::ModelSizeStats(v) => job.model_size_stats = Some(v.clone()),
			JobFieldUpdate::CustomSettings(v) => job.custom_settings = v.clone(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
	fields: Vec<JobFieldUpdate>,
}

impl JobUpdate {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(mut self, field: JobFieldUpdate) -> Self {
		self.fields.push(field);
		self
	}

	pub fn status(self, status: JobStatus) -> Self {
		self.set(JobFieldUpdate::Status(status))
	}

	pub fn scheduler_status(self, status: SchedulerStatus) -> Self {
		self.set(JobFieldUpdate::SchedulerStatus(status))
	}

	pub fn scheduler_state(self, state: Option<SchedulerState>) -> Self {
		self.set(JobFieldUpdate::SchedulerState(state))
	}

	pub fn ignore_downtime(self, ignore: bool) -> Self {
		self.set(JobFieldUpdate::IgnoreDowntime(ignore))
	}

	pub fn last_data_time(self, time: DateTime<Utc>) -> Self {
		self.set(JobFieldUpdate::LastDataTime(time))
	}

	pub fn description(self, description: impl Into<String>) -> Self {
		self.set(JobFieldUpdate::Description(description.into()))
	}

	pub fn counts(self, counts: DataCounts) -> Self {
		self.set(JobFieldUpdate::Counts(counts))
	}

	pub fn model_size_stats(self, stats: ModelSizeStats) -> Self {
		self.set(JobFieldUpdate::ModelSizeStats(stats))
	}

	pub fn custom_settings(self, settings: CustomSettings) -> Self {
		self.set(JobFieldUpdate::CustomSettings(settings))
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	pub fn fields(&self) -> &[JobFieldUpdate] {
		&self.fields
	}

	/// Apply every assignment in order; a later assignment to the same field wins.
	pub fn apply(&self, job: &mut Job) {
		for field in &self.fields {
			field.apply(job);
		}
	}

	/// Render as a field-name to value map.
	pub fn to_map(&self) -> Result<Map<String, Value>> {
		let mut map = Map::new();
		for field in &self.fields {
			map.insert(field.field_name().to_string(), field.value()?);
		}
		Ok(map)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::job::{AnalysisConfig, Detector, JobConfiguration};

	fn job() -> Job {
		JobConfiguration::new(AnalysisConfig {
			bucket_span_secs: 300,
			detectors: vec![Detector::new("count")],
		})
		.into_job("farequote".to_string(), 600, Utc::now())
	}

	#[test]
	fn test_apply_sets_only_named_fields() {
		let mut job = job();
		let before = job.clone();

		JobUpdate::new()
			.status(JobStatus::Running)
			.ignore_downtime(true)
			.apply(&mut job);

		assert_eq!(job.status, JobStatus::Running);
		assert!(job.ignore_downtime);
		assert_eq!(job.description, before.description);
		assert_eq!(job.analysis_config, before.analysis_config);
	}

	#[test]
	fn test_later_assignment_wins() {
		let mut job = job();
		JobUpdate::new()
			.description("first")
			.description("second")
			.apply(&mut job);
		assert_eq!(job.description, "second");
	}

	#[test]
	fn test_to_map_uses_field_names() {
		let update = JobUpdate::new()
			.scheduler_status(SchedulerStatus::Started)
			.scheduler_state(Some(SchedulerState::new(0, Some(3_600_000))));

		let map = update.to_map().unwrap();

		assert_eq!(map["scheduler_status"], Value::String("STARTED".to_string()));
		assert_eq!(map["scheduler_state"]["start_time_ms"], Value::from(0));
		assert_eq!(map["scheduler_state"]["end_time_ms"], Value::from(3_600_000));
	}

	#[test]
	fn test_clearing_scheduler_state() {
		let mut job = job();
		job.scheduler_state = Some(SchedulerState::new(10, None));
		JobUpdate::new().scheduler_state(None).apply(&mut job);
		assert!(job.scheduler_state.is_none());
	}
}
