// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for job orchestration.
//!
//! Every failure that crosses a crate boundary is a [`JobError`]. Callers that need
//! to branch on the failure use [`JobError::code`] rather than the message text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::license::LicenseConstraint;
use crate::scheduler::SchedulerStatus;

/// Result type for job operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// Machine-readable classification of a [`JobError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
	UnknownJob,
	JobIdAlreadyExists,
	JobInUse,
	LicenseViolation,
	TooManyJobsRunningConcurrently,
	JobConfigInvalid,
	NoSuchScheduledJob,
	CannotStartScheduler,
	CannotStopScheduler,
	NoSuchModelSnapshot,
	ModelSnapshotDescriptionInUse,
	NativeProcessError,
	DataUploadError,
	DataStoreError,
}

impl ErrorCode {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorCode::UnknownJob => "unknown_job",
			ErrorCode::JobIdAlreadyExists => "job_id_already_exists",
			ErrorCode::JobInUse => "job_in_use",
			ErrorCode::LicenseViolation => "license_violation",
			ErrorCode::TooManyJobsRunningConcurrently => "too_many_jobs_running_concurrently",
			ErrorCode::JobConfigInvalid => "job_config_invalid",
			ErrorCode::NoSuchScheduledJob => "no_such_scheduled_job",
			ErrorCode::CannotStartScheduler => "cannot_start_scheduler",
			ErrorCode::CannotStopScheduler => "cannot_stop_scheduler",
			ErrorCode::NoSuchModelSnapshot => "no_such_model_snapshot",
			ErrorCode::ModelSnapshotDescriptionInUse => "model_snapshot_description_in_use",
			ErrorCode::NativeProcessError => "native_process_error",
			ErrorCode::DataUploadError => "data_upload_error",
			ErrorCode::DataStoreError => "data_store_error",
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors that can occur while orchestrating jobs.
#[derive(Debug, Clone, Error)]
pub enum JobError {
	#[error("No known job with id '{0}'")]
	UnknownJob(String),

	#[error("The job cannot be created with the Id '{0}'. The Id is already used.")]
	JobIdAlreadyExists(String),

	#[error("{message}")]
	JobInUse { job_id: String, message: String },

	#[error("{message}")]
	LicenseViolation {
		constraint: LicenseConstraint,
		limit: String,
		message: String,
	},

	#[error("{message}")]
	TooManyJobs { limit: usize, message: String },

	#[error("invalid job configuration: {0}")]
	JobConfiguration(String),

	#[error("There is no job '{0}' with a scheduler configured")]
	NoSuchScheduledJob(String),

	#[error("Cannot start scheduler for job '{job_id}' while its status is {status}")]
	CannotStartScheduler {
		job_id: String,
		status: SchedulerStatus,
	},

	#[error("Cannot stop scheduler for job '{job_id}' while its status is {status}")]
	CannotStopScheduler {
		job_id: String,
		status: SchedulerStatus,
	},

	#[error("No matching model snapshot exists for job '{job_id}'")]
	NoSuchModelSnapshot { job_id: String },

	#[error("Model snapshot description '{description}' has already been used for job '{job_id}'")]
	ModelSnapshotDescriptionInUse { job_id: String, description: String },

	#[error("native process error: {0}")]
	NativeProcess(String),

	#[error("data upload error: {0}")]
	DataUpload(String),

	#[error("data store error: {0}")]
	DataStore(String),
}

impl JobError {
	pub fn code(&self) -> ErrorCode {
		match self {
			JobError::UnknownJob(_) => ErrorCode::UnknownJob,
			JobError::JobIdAlreadyExists(_) => ErrorCode::JobIdAlreadyExists,
			JobError::JobInUse { .. } => ErrorCode::JobInUse,
			JobError::LicenseViolation { .. } => ErrorCode::LicenseViolation,
			JobError::TooManyJobs { .. } => ErrorCode::TooManyJobsRunningConcurrently,
			JobError::JobConfiguration(_) => ErrorCode::JobConfigInvalid,
			JobError::NoSuchScheduledJob(_) => ErrorCode::NoSuchScheduledJob,
			JobError::CannotStartScheduler { .. } => ErrorCode::CannotStartScheduler,
			JobError::CannotStopScheduler { .. } => ErrorCode::CannotStopScheduler,
			JobError::NoSuchModelSnapshot { .. } => ErrorCode::NoSuchModelSnapshot,
			JobError::ModelSnapshotDescriptionInUse { .. } => ErrorCode::ModelSnapshotDescriptionInUse,
			JobError::NativeProcess(_) => ErrorCode::NativeProcessError,
			JobError::DataUpload(_) => ErrorCode::DataUploadError,
			JobError::DataStore(_) => ErrorCode::DataStoreError,
		}
	}

	pub fn is_in_use(&self) -> bool {
		self.code() == ErrorCode::JobInUse
	}
}

impl From<serde_json::Error> for JobError {
	fn from(e: serde_json::Error) -> Self {
		JobError::DataStore(e.to_string())
	}
}
