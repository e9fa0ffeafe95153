// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit log entries recorded for job lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
	Info,
	Warning,
	Error,
}

impl fmt::Display for AuditLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AuditLevel::Info => write!(f, "info"),
			AuditLevel::Warning => write!(f, "warning"),
			AuditLevel::Error => write!(f, "error"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMessage {
	pub id: Uuid,
	/// `None` for engine-wide events.
	pub job_id: Option<String>,
	pub level: AuditLevel,
	pub message: String,
	pub timestamp: DateTime<Utc>,
}

impl AuditMessage {
	pub fn new(job_id: Option<&str>, level: AuditLevel, message: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4(),
			job_id: job_id.map(str::to_string),
			level,
			message: message.into(),
			timestamp: Utc::now(),
		}
	}

	pub fn info(job_id: &str, message: impl Into<String>) -> Self {
		Self::new(Some(job_id), AuditLevel::Info, message)
	}

	pub fn warning(job_id: &str, message: impl Into<String>) -> Self {
		Self::new(Some(job_id), AuditLevel::Warning, message)
	}

	pub fn error(job_id: &str, message: impl Into<String>) -> Self {
		Self::new(Some(job_id), AuditLevel::Error, message)
	}

	pub fn system_info(message: impl Into<String>) -> Self {
		Self::new(None, AuditLevel::Info, message)
	}
}

/// Audit message texts.
pub mod messages {
	pub const JOB_CREATED: &str = "Job created";
	pub const JOB_CLOSED: &str = "Job closed";
	pub const JOB_DELETED: &str = "Job deleted";
	pub const JOB_REVERTED: &str = "Job model reverted to snapshot";
	pub const ENGINE_STARTED: &str = "Engine started";
	pub const ENGINE_SHUTDOWN: &str = "Engine shutting down";

	pub const SCHEDULER_LOOKBACK_COMPLETED: &str = "Scheduler lookback completed";
	pub const SCHEDULER_CONTINUED_REALTIME: &str = "Scheduler continued in real-time";
	pub const SCHEDULER_STARTED_REALTIME: &str = "Scheduler started in real-time";
	pub const SCHEDULER_STOPPED: &str = "Scheduler stopped";
	pub const SCHEDULER_RECOVERED: &str = "Scheduler has recovered data extraction and analysis";

	pub fn scheduler_started(from: &str, to: &str) -> String {
		format!("Scheduler started (from: {from} to: {to})")
	}

	pub fn scheduler_extraction_error(problem: &str) -> String {
		format!("Scheduler is encountering errors extracting data: {problem}")
	}

	pub fn scheduler_analysis_error(problem: &str) -> String {
		format!("Scheduler is encountering errors submitting data for analysis: {problem}")
	}
}
