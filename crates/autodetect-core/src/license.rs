// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! License-based admission control.
//!
//! The analysis process reports its capabilities as a JSON descriptor of the form
//! `{"jobs": N, "detectors": N, "partitions": N}`. A value of `-1` (or a missing or
//! non-numeric field) means "no limit". Partitioning is all-or-nothing: it is
//! allowed only when the partitions constraint is exactly `-1`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

use crate::error::{JobError, Result};
use crate::job::AnalysisConfig;

/// Sentinel for an unconstrained license dimension.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseConstraint {
	Jobs,
	Detectors,
	Partitions,
}

impl LicenseConstraint {
	/// Key of this constraint in the capability descriptor.
	pub fn key(&self) -> &'static str {
		match self {
			LicenseConstraint::Jobs => "jobs",
			LicenseConstraint::Detectors => "detectors",
			LicenseConstraint::Partitions => "partitions",
		}
	}
}

impl fmt::Display for LicenseConstraint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.key())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseGate {
	pub max_jobs: i64,
	pub max_detectors: i64,
	pub max_partitions: i64,
}

impl Default for LicenseGate {
	fn default() -> Self {
		Self::unlimited()
	}
}

impl LicenseGate {
	pub fn unlimited() -> Self {
		Self {
			max_jobs: UNLIMITED,
			max_detectors: UNLIMITED,
			max_partitions: UNLIMITED,
		}
	}

	/// Parse the capability descriptor reported by the analysis process.
	///
	/// A descriptor that is not a JSON object leaves every dimension unlimited.
	pub fn parse(descriptor: &str) -> Self {
		let doc: Value = match serde_json::from_str(descriptor) {
			Ok(doc) => doc,
			Err(e) => {
				warn!(descriptor, error = %e, "Failed to parse license descriptor");
				return Self::unlimited();
			}
		};
		match doc.as_object() {
			Some(_) => Self::from_descriptor(&doc),
			None => {
				warn!(descriptor, "License descriptor is not a JSON object");
				Self::unlimited()
			}
		}
	}

	pub fn from_descriptor(doc: &Value) -> Self {
		let gate = Self {
			max_jobs: constraint_value(doc, LicenseConstraint::Jobs),
			max_detectors: constraint_value(doc, LicenseConstraint::Detectors),
			max_partitions: constraint_value(doc, LicenseConstraint::Partitions),
		};
		info!(
			license_job_limit = gate.max_jobs,
			max_detectors_per_job = gate.max_detectors,
			max_partitions_per_job = gate.max_partitions,
			"License constraints loaded"
		);
		gate
	}

	pub fn job_limit_violated(&self, current_count: usize) -> bool {
		self.max_jobs != UNLIMITED && current_count as i64 >= self.max_jobs
	}

	pub fn detector_limit_violated(&self, current_count: usize, additional: usize) -> bool {
		self.max_detectors != UNLIMITED && (current_count + additional) as i64 > self.max_detectors
	}

	pub fn partitions_allowed(&self) -> bool {
		self.max_partitions == UNLIMITED
	}

	/// Admission check for a new job.
	///
	/// `running_jobs` and `running_detectors` describe the population currently
	/// held by analysis processes.
	pub fn check_on_create(
		&self,
		analysis_config: &AnalysisConfig,
		running_jobs: usize,
		running_detectors: usize,
	) -> Result<()> {
		if self.job_limit_violated(running_jobs) {
			return Err(JobError::LicenseViolation {
				constraint: LicenseConstraint::Jobs,
				limit: self.max_jobs.to_string(),
				message: format!(
					"Cannot create new job - your license limits you to {} concurrently running {}. \
					 You must close a job before you can create a new one.",
					self.max_jobs,
					plural(self.max_jobs, "job", "jobs")
				),
			});
		}

		let configured = analysis_config.detectors.len();
		if self.detector_limit_violated(running_detectors, configured) {
			return Err(JobError::LicenseViolation {
				constraint: LicenseConstraint::Detectors,
				limit: self.max_detectors.to_string(),
				message: format!(
					"Cannot create new job - your license limits you to {} running {}, \
					 but you have {} running and have configured {} more",
					self.max_detectors,
					plural(self.max_detectors, "detector", "detectors"),
					running_detectors,
					configured
				),
			});
		}

		if !self.partitions_allowed() && analysis_config.uses_partitioning() {
			return Err(JobError::LicenseViolation {
				constraint: LicenseConstraint::Partitions,
				limit: self.max_partitions.to_string(),
				message: "Cannot create new job - your license disallows partition fields, \
				          but you have configured one."
					.to_string(),
			});
		}

		Ok(())
	}

	/// Admission check for reactivating a closed job.
	///
	/// The hardware cap and the license cap are independent; the hardware cap is
	/// checked first and reported with a distinct error.
	pub fn check_on_reactivate(
		&self,
		job_id: &str,
		running_jobs: usize,
		hardware_cap: usize,
	) -> Result<()> {
		if running_jobs >= hardware_cap {
			return Err(JobError::TooManyJobs {
				limit: hardware_cap,
				message: format!(
					"Cannot reactivate job with id '{job_id}'. The maximum number of concurrently \
					 running jobs is limited as a function of the number of CPU cores; the current \
					 hardware limit is {hardware_cap}"
				),
			});
		}

		if self.job_limit_violated(running_jobs) {
			return Err(JobError::LicenseViolation {
				constraint: LicenseConstraint::Jobs,
				limit: self.max_jobs.to_string(),
				message: format!(
					"Cannot reactivate job with id '{job_id}' - your license limits you to {} \
					 concurrently running {}. You must close a job before you can reactivate \
					 a closed one.",
					self.max_jobs,
					plural(self.max_jobs, "job", "jobs")
				),
			});
		}

		Ok(())
	}
}

/// Hardware-derived concurrency cap: `ceil(cores * factor)`.
pub fn hardware_job_cap(cores: usize, factor: f64) -> usize {
	(cores as f64 * factor).ceil() as usize
}

fn constraint_value(doc: &Value, constraint: LicenseConstraint) -> i64 {
	match doc.get(constraint.key()) {
		Some(Value::Number(n)) => n
			.as_i64()
			.or_else(|| n.as_f64().map(|f| f as i64))
			.unwrap_or(UNLIMITED),
		Some(Value::String(s)) => s.trim().parse().unwrap_or(UNLIMITED),
		_ => UNLIMITED,
	}
}

fn plural(count: i64, singular: &'static str, plural: &'static str) -> &'static str {
	if count == 1 {
		singular
	} else {
		plural
	}
}
