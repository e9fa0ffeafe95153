// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job orchestration for the autodetect engine.
//!
//! [`JobManager`] is the entry point: it admits jobs against the license and
//! hardware caps, serialises mutating actions per job, runs one
//! [`JobScheduler`] per scheduled job and closes idle jobs through the
//! [`IdleTimeoutManager`]. Storage, the analysis process and data extraction
//! are supplied by the caller through the traits in [`traits`].

pub mod action;
pub mod closer;
pub mod manager;
pub mod memory;
mod problem;
pub mod scheduler;
pub mod timeout;
pub mod traits;

pub use action::{ActionGuardian, ActionTicket, GuardedAction, JobAction, ScheduledAction};
pub use closer::JobCloser;
pub use manager::{JobManager, JobManagerDeps};
pub use memory::MemoryJobProvider;
pub use scheduler::{interval_start, JobScheduler, StartRequest};
pub use timeout::{CloseFn, IdleTimeoutManager};
pub use traits::{
	Clock, DataExtractor, DataExtractorFactory, DataProcessor, JobProvider, ProcessManager,
	SystemClock,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Every map guarded this way is consistent between statements, so a poisoned
/// lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
