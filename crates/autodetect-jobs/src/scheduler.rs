// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-job data extraction loop.
//!
//! A run first performs a lookback over already elapsed time and then, unless
//! the run has an explicit end, polls in real time on bucket-aligned intervals.
//! A cycle that fails leaves the extraction pointer where it was, so the same
//! interval is requested again by the next cycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use autodetect_core::{
	default_frequency_secs, messages, AuditMessage, DataLoadParams, InterimResultsParams, Job,
	JobError, JobUpdate, Result, SchedulerState, SchedulerStatus,
};
use chrono::{DateTime, SecondsFormat};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::lock;
use crate::problem::{ProblemKind, ProblemTracker};
use crate::traits::{Clock, DataExtractor, DataProcessor, JobProvider};

/// Delay past an interval boundary before the real-time search runs.
const NEXT_TASK_DELAY_MS: i64 = 100;

/// Optional overrides of the configured extraction window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartRequest {
	pub start_ms: Option<i64>,
	/// When set the run is lookback only and closes the job afterwards.
	pub end_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopMode {
	/// Halt now and record the scheduler as stopped.
	Manual,
	/// Let the current cycle finish, then record the scheduler as started.
	Auto,
	/// Halt now but record the scheduler as started so it resumes on restart.
	Shutdown,
}

impl StopMode {
	fn halts_immediately(self) -> bool {
		!matches!(self, StopMode::Auto)
	}

	fn final_status(self) -> SchedulerStatus {
		match self {
			StopMode::Manual => SchedulerStatus::Stopped,
			StopMode::Auto | StopMode::Shutdown => SchedulerStatus::Started,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
	Completed,
	Failed,
	Halted,
}

struct Run {
	handle: JoinHandle<()>,
	halt: CancellationToken,
	finish: CancellationToken,
	lookback_done: CancellationToken,
}

struct Core {
	job_id: String,
	bucket_span_ms: i64,
	frequency_ms: i64,
	extractor: tokio::sync::Mutex<Box<dyn DataExtractor>>,
	processor: Arc<dyn DataProcessor>,
	provider: Arc<dyn JobProvider>,
	clock: Arc<dyn Clock>,
	status: Mutex<SchedulerStatus>,
	checkpoint: Mutex<Option<SchedulerState>>,
}

pub struct JobScheduler {
	core: Arc<Core>,
	run: Mutex<Option<Run>>,
}

impl JobScheduler {
	pub fn new(
		job: &Job,
		extractor: Box<dyn DataExtractor>,
		processor: Arc<dyn DataProcessor>,
		provider: Arc<dyn JobProvider>,
		clock: Arc<dyn Clock>,
	) -> Result<Self> {
		let config = job
			.scheduler_config
			.as_ref()
			.ok_or_else(|| JobError::NoSuchScheduledJob(job.id.clone()))?;

		let bucket_span_ms = job.bucket_span_ms();
		if bucket_span_ms <= 0 {
			return Err(JobError::JobConfiguration(format!(
				"job '{}' has no bucket span",
				job.id
			)));
		}
		let frequency_secs = match config.frequency_secs {
			Some(secs) if secs > 0 => secs,
			_ => default_frequency_secs(job.analysis_config.bucket_span_secs as i64)?,
		};

		Ok(Self {
			core: Arc::new(Core {
				job_id: job.id.clone(),
				bucket_span_ms,
				frequency_ms: frequency_secs as i64 * 1000,
				extractor: tokio::sync::Mutex::new(extractor),
				processor,
				provider,
				clock,
				status: Mutex::new(SchedulerStatus::Stopped),
				checkpoint: Mutex::new(job.scheduler_state),
			}),
			run: Mutex::new(None),
		})
	}

	pub fn job_id(&self) -> &str {
		&self.core.job_id
	}

	pub fn status(&self) -> SchedulerStatus {
		*lock(&self.core.status)
	}

	pub fn is_started(&self) -> bool {
		self.status() == SchedulerStatus::Started
	}

	pub fn is_stopped(&self) -> bool {
		self.status() == SchedulerStatus::Stopped
	}

	/// Launch a run in the background. Fails unless the scheduler is stopped.
	pub async fn start(&self, job: &Job, request: StartRequest) -> Result<()> {
		let core = &self.core;
		{
			let mut status = lock(&core.status);
			if *status != SchedulerStatus::Stopped {
				return Err(JobError::CannotStartScheduler {
					job_id: core.job_id.clone(),
					status: *status,
				});
			}
			*status = SchedulerStatus::Started;
		}

		let config = job.scheduler_config.as_ref();
		let start_ms = match job.counts.latest_record_timestamp_ms {
			Some(latest) => latest + 1,
			None => request
				.start_ms
				.or_else(|| config.and_then(|c| c.start_time_ms))
				.unwrap_or(0),
		};
		let explicit_end = request.end_ms.or_else(|| config.and_then(|c| c.end_time_ms));
		let end_ms =
			explicit_end.unwrap_or_else(|| interval_start(core.clock.now_ms(), core.bucket_span_ms));

		*lock(&core.checkpoint) = Some(SchedulerState::new(start_ms, explicit_end));
		if let Err(e) = core.persist_status(SchedulerStatus::Started).await {
			*lock(&core.status) = SchedulerStatus::Stopped;
			return Err(e);
		}

		let mut run = lock(&self.run);
		if *lock(&core.status) != SchedulerStatus::Started {
			debug!(job_id = %core.job_id, "scheduler stopped before its run was launched");
			return Ok(());
		}

		info!(
			job_id = %core.job_id,
			start_ms,
			end_ms,
			lookback_only = explicit_end.is_some(),
			"Scheduler started"
		);

		let halt = CancellationToken::new();
		let finish = CancellationToken::new();
		let lookback_done = CancellationToken::new();
		let span = info_span!("scheduler", job_id = %core.job_id);
		let handle = tokio::spawn(
			Arc::clone(core)
				.run(
					start_ms,
					end_ms,
					explicit_end.is_some(),
					halt.clone(),
					finish.clone(),
					lookback_done.clone(),
				)
				.instrument(span),
		);
		*run = Some(Run {
			handle,
			halt,
			finish,
			lookback_done,
		});
		Ok(())
	}

	/// Halt immediately and block until the run has exited. The final status is
	/// `STOPPED`.
	pub async fn stop_manual(&self) -> Result<()> {
		self.stop(StopMode::Manual).await
	}

	/// Let the in-flight cycle finish, then halt. The final status stays `STARTED`.
	/// A scheduler that is not started is left alone.
	pub async fn stop_auto(&self) {
		let _ = self.stop(StopMode::Auto).await;
	}

	/// Halt immediately for engine shutdown, recording `STARTED` so the scheduler is
	/// resumed on the next startup.
	pub async fn stop_for_shutdown(&self) {
		let _ = self.stop(StopMode::Shutdown).await;
	}

	/// Wait until the lookback phase of the current run has finished. For a
	/// lookback-only run this includes closing the job.
	pub async fn await_lookback_termination(&self) {
		let done = lock(&self.run).as_ref().map(|r| r.lookback_done.clone());
		if let Some(done) = done {
			done.cancelled().await;
		}
	}

	async fn stop(&self, mode: StopMode) -> Result<()> {
		let core = &self.core;
		{
			let mut status = lock(&core.status);
			if *status != SchedulerStatus::Started {
				return match mode {
					StopMode::Manual => Err(JobError::CannotStopScheduler {
						job_id: core.job_id.clone(),
						status: *status,
					}),
					StopMode::Auto | StopMode::Shutdown => Ok(()),
				};
			}
			*status = SchedulerStatus::Stopping;
		}
		core.persist_status_logged(SchedulerStatus::Stopping).await;

		let run = lock(&self.run).take();
		if let Some(run) = run {
			if mode.halts_immediately() {
				run.halt.cancel();
			} else {
				run.finish.cancel();
			}
			if let Err(e) = run.handle.await {
				error!(job_id = %core.job_id, error = %e, "Scheduler task failed");
			}
		}

		core.finalize(mode.final_status()).await;
		Ok(())
	}
}

impl Core {
	async fn run(
		self: Arc<Self>,
		start_ms: i64,
		end_ms: i64,
		lookback_only: bool,
		halt: CancellationToken,
		finish: CancellationToken,
		lookback_done: CancellationToken,
	) {
		let lookback_guard = lookback_done.drop_guard();
		let mut tracker = ProblemTracker::default();
		let mut next_start = start_ms;

		let ran_lookback = end_ms > start_ms;
		if ran_lookback {
			info!("Starting lookback");
			self.audit(AuditMessage::info(
				&self.job_id,
				messages::scheduler_started(&format_epoch_ms(start_ms), &format_epoch_ms(end_ms)),
			))
			.await;

			if self.run_cycle(start_ms, end_ms, false, &halt, &mut tracker).await
				== CycleOutcome::Completed
			{
				next_start = end_ms;
				self.advance_checkpoint(end_ms, lookback_only.then_some(end_ms))
					.await;
			}

			info!("Lookback has finished");
			self.audit(AuditMessage::info(
				&self.job_id,
				messages::SCHEDULER_LOOKBACK_COMPLETED,
			))
			.await;
		}

		if halt.is_cancelled() || finish.is_cancelled() || !self.is_started() {
			return;
		}

		if lookback_only {
			self.finish_lookback().await;
			return;
		}

		let entered = if ran_lookback {
			messages::SCHEDULER_CONTINUED_REALTIME
		} else {
			messages::SCHEDULER_STARTED_REALTIME
		};
		self.audit(AuditMessage::info(&self.job_id, entered)).await;
		info!("Entering real-time mode");
		drop(lookback_guard);

		self.run_real_time(next_start, &halt, &finish, &mut tracker)
			.await;
	}

	async fn run_real_time(
		&self,
		mut next_start: i64,
		halt: &CancellationToken,
		finish: &CancellationToken,
		tracker: &mut ProblemTracker,
	) {
		loop {
			let delay = self.delay_until_next_run();
			tokio::select! {
				_ = halt.cancelled() => return,
				_ = finish.cancelled() => return,
				_ = tokio::time::sleep(delay) => {}
			}

			let end = interval_start(self.clock.now_ms(), self.bucket_span_ms);
			if end <= next_start {
				continue;
			}

			if self.run_cycle(next_start, end, true, halt, tracker).await == CycleOutcome::Completed {
				next_start = end;
				self.advance_checkpoint(end, None).await;
			}

			if halt.is_cancelled() || finish.is_cancelled() {
				return;
			}
		}
	}

	/// Search `[start, end)`, submit every batch in order and flush.
	async fn run_cycle(
		&self,
		start: i64,
		end: i64,
		real_time: bool,
		halt: &CancellationToken,
		tracker: &mut ProblemTracker,
	) -> CycleOutcome {
		let mut extractor = self.extractor.lock().await;

		if let Err(e) = extractor.new_search(start, end).await {
			error!(start, end, error = %e, "An error has occurred while starting a new search");
			self.report_problem(tracker, ProblemKind::Extraction, &e).await;
			self.finish_cycle(tracker).await;
			return CycleOutcome::Failed;
		}

		let mut outcome = CycleOutcome::Completed;
		let mut submitted = 0usize;
		while extractor.has_next() {
			if halt.is_cancelled() {
				outcome = CycleOutcome::Halted;
				break;
			}

			let batch = match extractor.next().await {
				Ok(Some(batch)) => batch,
				Ok(None) => continue,
				Err(e) => {
					error!(error = %e, "An error occurred while extracting data");
					self.report_problem(tracker, ProblemKind::Extraction, &e).await;
					outcome = CycleOutcome::Failed;
					break;
				}
			};

			match self
				.processor
				.submit_data_load_job(&self.job_id, batch, DataLoadParams::default())
				.await
			{
				Ok(counts) => {
					submitted += 1;
					debug!(
						records = counts.processed_record_count,
						latest_record_ms = ?counts.latest_record_timestamp_ms,
						"batch submitted"
					);
				}
				Err(e) => {
					error!(error = %e, "An error has occurred while submitting data");
					self.report_problem(tracker, ProblemKind::Analysis, &e).await;
					outcome = CycleOutcome::Failed;
					break;
				}
			}
		}

		if outcome != CycleOutcome::Completed {
			extractor.clear();
		}
		drop(extractor);

		match outcome {
			CycleOutcome::Completed => {
				if submitted > 0 {
					self.flush(end, real_time).await;
				}
				self.finish_cycle(tracker).await;
			}
			CycleOutcome::Failed => self.finish_cycle(tracker).await,
			CycleOutcome::Halted => debug!(start, end, "cycle abandoned on halt"),
		}
		outcome
	}

	async fn flush(&self, end: i64, real_time: bool) {
		let mut params = InterimResultsParams::new().calc_interim(true);
		if real_time {
			params = params.advance_time(end / 1000);
		}
		if let Err(e) = self.processor.flush_job(&self.job_id, params).await {
			error!(error = %e, "An error has occurred while flushing the job");
		}
	}

	async fn finish_lookback(&self) {
		{
			let mut status = lock(&self.status);
			if *status != SchedulerStatus::Started {
				return;
			}
			*status = SchedulerStatus::Stopping;
		}
		self.persist_status_logged(SchedulerStatus::Stopping).await;

		if let Err(e) = self.processor.close_job(&self.job_id).await {
			error!(error = %e, "An error has occurred while closing the job");
		}
		self.finalize(SchedulerStatus::Stopped).await;
	}

	/// Record the final status and release the run's resources.
	async fn finalize(&self, status: SchedulerStatus) {
		*lock(&self.status) = status;
		self.persist_status_logged(status).await;
		self.extractor.lock().await.clear();

		if status == SchedulerStatus::Stopped {
			self.audit(AuditMessage::info(&self.job_id, messages::SCHEDULER_STOPPED))
				.await;
		}
		info!(job_id = %self.job_id, status = %status, "Scheduler status changed");
	}

	fn is_started(&self) -> bool {
		*lock(&self.status) == SchedulerStatus::Started
	}

	fn delay_until_next_run(&self) -> Duration {
		let now = self.clock.now_ms();
		let next = interval_start(now + self.frequency_ms, self.frequency_ms) + NEXT_TASK_DELAY_MS;
		Duration::from_millis((next - now).max(0) as u64)
	}

	async fn advance_checkpoint(&self, start_ms: i64, end_ms: Option<i64>) {
		let state = SchedulerState::new(start_ms, end_ms);
		*lock(&self.checkpoint) = Some(state);
		if let Err(e) = self
			.provider
			.update_job(&self.job_id, JobUpdate::new().scheduler_state(Some(state)))
			.await
		{
			warn!(error = %e, "Failed to persist scheduler state");
		}
	}

	async fn persist_status(&self, status: SchedulerStatus) -> Result<()> {
		let checkpoint = *lock(&self.checkpoint);
		self.provider
			.update_job(
				&self.job_id,
				JobUpdate::new()
					.scheduler_status(status)
					.scheduler_state(checkpoint),
			)
			.await
	}

	async fn persist_status_logged(&self, status: SchedulerStatus) {
		if let Err(e) = self.persist_status(status).await {
			warn!(job_id = %self.job_id, status = %status, error = %e, "Failed to persist scheduler status");
		}
	}

	async fn report_problem(&self, tracker: &mut ProblemTracker, kind: ProblemKind, e: &JobError) {
		if let Some(text) = tracker.report(kind, &e.to_string()) {
			self.audit(AuditMessage::error(&self.job_id, text)).await;
		}
	}

	async fn finish_cycle(&self, tracker: &mut ProblemTracker) {
		if let Some(text) = tracker.finish_cycle() {
			self.audit(AuditMessage::info(&self.job_id, text)).await;
		}
	}

	async fn audit(&self, message: AuditMessage) {
		if let Err(e) = self.provider.audit(message).await {
			warn!(job_id = %self.job_id, error = %e, "Failed to record audit message");
		}
	}
}

/// Start of the `span_ms`-aligned interval containing `epoch_ms`.
pub fn interval_start(epoch_ms: i64, span_ms: i64) -> i64 {
	epoch_ms.div_euclid(span_ms) * span_ms
}

fn format_epoch_ms(epoch_ms: i64) -> String {
	DateTime::from_timestamp_millis(epoch_ms)
		.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
		.unwrap_or_else(|| epoch_ms.to_string())
}
