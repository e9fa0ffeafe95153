// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Collaborators the orchestrator depends on but does not implement.

use async_trait::async_trait;
use autodetect_core::{
	AuditMessage, DataCounts, DataLoadParams, InterimResultsParams, Job, JobUpdate, ModelSnapshot,
	Result,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;

/// Storage for job documents, snapshots and the audit log.
#[async_trait]
pub trait JobProvider: Send + Sync {
	async fn job_exists(&self, job_id: &str) -> Result<bool>;

	async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

	async fn get_jobs(&self) -> Result<Vec<Job>>;

	async fn create_job(&self, job: &Job) -> Result<()>;

	/// Fails with `unknown_job` if the job does not exist.
	async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<()>;

	async fn delete_job(&self, job_id: &str) -> Result<()>;

	/// Remove results, snapshots and any other documents owned by the job.
	async fn delete_job_artifacts(&self, job_id: &str) -> Result<()>;

	async fn model_snapshots(&self, job_id: &str) -> Result<Vec<ModelSnapshot>>;

	async fn update_model_snapshot(&self, snapshot: &ModelSnapshot) -> Result<()>;

	async fn audit(&self, message: AuditMessage) -> Result<()>;

	/// Persist the engine's capability descriptor.
	async fn save_info(&self, info: &Value) -> Result<()>;
}

/// Manages the external analysis process backing each job.
#[async_trait]
pub trait ProcessManager: Send + Sync {
	async fn close_job(&self, job_id: &str) -> Result<()>;

	async fn flush_job(&self, job_id: &str, params: &InterimResultsParams) -> Result<()>;

	/// Stream one upload into the job's process, starting the process if needed.
	async fn process_data_load_job(
		&self,
		job: &Job,
		data: Bytes,
		params: &DataLoadParams,
	) -> Result<DataCounts>;

	async fn write_update_config_message(&self, job_id: &str, config: &str) -> Result<()>;

	fn number_of_running_jobs(&self) -> usize;

	fn job_is_running(&self, job_id: &str) -> bool;

	/// Capability descriptor, e.g. `{"jobs": 10, "detectors": -1, "partitions": -1}`.
	async fn get_info(&self) -> Result<String>;
}

/// Pulls records for one scheduled job.
///
/// Each `new_search` starts a finite, ordered, non-restartable sequence of batches
/// covering `[start_ms, end_ms)`.
#[async_trait]
pub trait DataExtractor: Send {
	async fn new_search(&mut self, start_ms: i64, end_ms: i64) -> Result<()>;

	fn has_next(&self) -> bool;

	/// `Ok(None)` means the source had nothing for this step; keep polling `has_next`.
	async fn next(&mut self) -> Result<Option<Bytes>>;

	/// Abandon the current search and release its resources.
	fn clear(&mut self);
}

pub trait DataExtractorFactory: Send + Sync {
	fn new_extractor(&self, job: &Job) -> Result<Box<dyn DataExtractor>>;
}

/// The submission path shared by API callers and schedulers.
#[async_trait]
pub trait DataProcessor: Send + Sync {
	async fn submit_data_load_job(
		&self,
		job_id: &str,
		data: Bytes,
		params: DataLoadParams,
	) -> Result<DataCounts>;

	async fn flush_job(&self, job_id: &str, params: InterimResultsParams) -> Result<()>;

	async fn close_job(&self, job_id: &str) -> Result<()>;
}

pub trait Clock: Send + Sync {
	/// Milliseconds since the Unix epoch.
	fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> i64 {
		Utc::now().timestamp_millis()
	}
}
