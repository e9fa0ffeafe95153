// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use autodetect_core::{messages, AuditMessage, JobError, JobStatus, JobUpdate, Result};
use tracing::{info, instrument, warn};

use crate::action::{ActionGuardian, JobAction};
use crate::traits::{JobProvider, ProcessManager};

/// Closes jobs on behalf of both API callers and idle timeouts.
pub struct JobCloser {
	provider: Arc<dyn JobProvider>,
	process_manager: Arc<dyn ProcessManager>,
	guardian: Arc<ActionGuardian<JobAction>>,
}

impl JobCloser {
	pub fn new(
		provider: Arc<dyn JobProvider>,
		process_manager: Arc<dyn ProcessManager>,
		guardian: Arc<ActionGuardian<JobAction>>,
	) -> Self {
		Self {
			provider,
			process_manager,
			guardian,
		}
	}

	#[instrument(skip(self))]
	pub async fn close_job(&self, job_id: &str) -> Result<()> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Closing)?;
		self.close_held(job_id).await
	}

	/// Close a job whose action lock the caller already holds.
	pub(crate) async fn close_held(&self, job_id: &str) -> Result<()> {
		if !self.provider.job_exists(job_id).await? {
			return Err(JobError::UnknownJob(job_id.to_string()));
		}

		self.process_manager.close_job(job_id).await?;
		self.provider
			.update_job(job_id, JobUpdate::new().status(JobStatus::Closed))
			.await?;

		if let Err(e) = self
			.provider
			.audit(AuditMessage::info(job_id, messages::JOB_CLOSED))
			.await
		{
			warn!(job_id, error = %e, "Failed to record audit message");
		}
		info!(job_id, "Job closed");
		Ok(())
	}
}
