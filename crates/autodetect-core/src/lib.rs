// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the autodetect job engine.
//!
//! This crate holds the value types shared by the orchestration layer: job
//! documents and their partial updates, scheduler configuration and state,
//! model snapshots, audit entries, the error taxonomy, and the admission rules
//! derived from the license descriptor.

pub mod audit;
pub mod error;
pub mod frequency;
pub mod id;
pub mod job;
pub mod license;
pub mod params;
pub mod scheduler;
pub mod snapshot;
pub mod update;

pub use audit::{messages, AuditLevel, AuditMessage};
pub use error::{ErrorCode, JobError, Result};
pub use frequency::default_frequency_secs;
pub use id::{validate_job_id, JobIdFactory, MAX_JOB_ID_LENGTH};
pub use job::{
	AnalysisConfig, CustomSettings, DataCounts, Detector, Job, JobConfiguration, JobStatus,
	ModelSizeStats, MAX_BUCKET_SPAN_SECS, MAX_TIMEOUT_SECS,
};
pub use license::{hardware_job_cap, LicenseConstraint, LicenseGate, UNLIMITED};
pub use params::{DataLoadParams, InterimResultsParams, TimeRange};
pub use scheduler::{DataSource, SchedulerConfig, SchedulerState, SchedulerStatus};
pub use snapshot::{next_restore_priority, ModelSnapshot, RevertRequest};
pub use update::{JobFieldUpdate, JobUpdate};
