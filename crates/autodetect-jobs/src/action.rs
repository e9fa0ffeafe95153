// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-job mutual exclusion for mutating actions.
//!
//! An [`ActionGuardian`] is a table from job id to the action currently holding
//! that job. Acquisition never blocks: a second caller for a held job gets a
//! `job_in_use` error naming the action in progress. The returned
//! [`ActionTicket`] releases the job when dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use autodetect_core::{JobError, Result};
use tracing::trace;

use crate::lock;

/// An action that can hold a job exclusively.
pub trait GuardedAction: Copy + Send + Sync + fmt::Debug + 'static {
	/// Imperative form, e.g. `close`.
	fn verb(&self) -> &'static str;
	/// Progressive form, e.g. `closing`.
	fn gerund(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobAction {
	Closing,
	Deleting,
	Flushing,
	Updating,
	Writing,
	RevertingSnapshot,
}

impl GuardedAction for JobAction {
	fn verb(&self) -> &'static str {
		match self {
			JobAction::Closing => "close",
			JobAction::Deleting => "delete",
			JobAction::Flushing => "flush",
			JobAction::Updating => "update",
			JobAction::Writing => "write to",
			JobAction::RevertingSnapshot => "revert the model snapshot of",
		}
	}

	fn gerund(&self) -> &'static str {
		match self {
			JobAction::Closing => "closing",
			JobAction::Deleting => "deleting",
			JobAction::Flushing => "flushing",
			JobAction::Updating => "updating",
			JobAction::Writing => "writing to",
			JobAction::RevertingSnapshot => "reverting the model snapshot of",
		}
	}
}

/// Start/stop requests against a job's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduledAction {
	Starting,
	Stopping,
}

impl GuardedAction for ScheduledAction {
	fn verb(&self) -> &'static str {
		match self {
			ScheduledAction::Starting => "start the scheduler of",
			ScheduledAction::Stopping => "stop the scheduler of",
		}
	}

	fn gerund(&self) -> &'static str {
		match self {
			ScheduledAction::Starting => "starting the scheduler of",
			ScheduledAction::Stopping => "stopping the scheduler of",
		}
	}
}

type HeldActions<A> = Arc<Mutex<HashMap<String, A>>>;

pub struct ActionGuardian<A: GuardedAction> {
	held: HeldActions<A>,
}

impl<A: GuardedAction> Default for ActionGuardian<A> {
	fn default() -> Self {
		Self::new()
	}
}

impl<A: GuardedAction> ActionGuardian<A> {
	pub fn new() -> Self {
		Self {
			held: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Claim `job_id` for `action`, failing immediately if another action holds it.
	pub fn try_acquire(&self, job_id: &str, action: A) -> Result<ActionTicket<A>> {
		let mut held = lock(&self.held);
		if let Some(current) = held.get(job_id) {
			return Err(JobError::JobInUse {
				job_id: job_id.to_string(),
				message: format!(
					"Cannot {} job '{}' while another connection is {} the job",
					action.verb(),
					job_id,
					current.gerund()
				),
			});
		}
		held.insert(job_id.to_string(), action);
		trace!(job_id, action = ?action, "action acquired");

		Ok(ActionTicket {
			job_id: job_id.to_string(),
			held: Arc::clone(&self.held),
		})
	}

	pub fn current_action(&self, job_id: &str) -> Option<A> {
		lock(&self.held).get(job_id).copied()
	}
}

/// Exclusive hold on one job. Dropping the ticket releases the job.
#[must_use = "the job is released as soon as the ticket is dropped"]
pub struct ActionTicket<A: GuardedAction> {
	job_id: String,
	held: HeldActions<A>,
}

impl<A: GuardedAction> ActionTicket<A> {
	pub fn job_id(&self) -> &str {
		&self.job_id
	}
}

impl<A: GuardedAction> Drop for ActionTicket<A> {
	fn drop(&mut self) {
		lock(&self.held).remove(&self.job_id);
		trace!(job_id = %self.job_id, "action released");
	}
}

impl<A: GuardedAction> fmt::Debug for ActionTicket<A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ActionTicket")
			.field("job_id", &self.job_id)
			.finish()
	}
}
