// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The orchestrator façade.
//!
//! Every mutating action on a job holds that job's action lock for its whole
//! duration; a concurrent action on the same job fails with `job_in_use`
//! instead of waiting. Scheduler start/stop requests are serialised by a second,
//! independent lock table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use autodetect_config::JobsConfig;
use autodetect_core::{
	hardware_job_cap, messages, next_restore_priority, validate_job_id, AuditMessage,
	CustomSettings, DataCounts, DataLoadParams, InterimResultsParams, Job, JobConfiguration,
	JobError, JobIdFactory, JobStatus, JobUpdate, LicenseGate, ModelSnapshot, Result,
	RevertRequest, SchedulerStatus,
};
use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{ActionGuardian, JobAction, ScheduledAction};
use crate::closer::JobCloser;
use crate::lock;
use crate::scheduler::{JobScheduler, StartRequest};
use crate::timeout::{CloseFn, IdleTimeoutManager};
use crate::traits::{Clock, DataExtractorFactory, DataProcessor, JobProvider, ProcessManager};

/// Collaborators and settings a [`JobManager`] is built from.
pub struct JobManagerDeps {
	pub provider: Arc<dyn JobProvider>,
	pub process_manager: Arc<dyn ProcessManager>,
	pub extractor_factory: Arc<dyn DataExtractorFactory>,
	pub clock: Arc<dyn Clock>,
	pub config: JobsConfig,
	/// Core count used for the hardware job cap.
	pub cpu_cores: usize,
}

impl JobManagerDeps {
	pub fn new(
		provider: Arc<dyn JobProvider>,
		process_manager: Arc<dyn ProcessManager>,
		extractor_factory: Arc<dyn DataExtractorFactory>,
		config: JobsConfig,
	) -> Self {
		Self {
			provider,
			process_manager,
			extractor_factory,
			clock: Arc::new(crate::traits::SystemClock),
			config,
			cpu_cores: num_cpus::get(),
		}
	}
}

pub struct JobManager {
	provider: Arc<dyn JobProvider>,
	process_manager: Arc<dyn ProcessManager>,
	extractor_factory: Arc<dyn DataExtractorFactory>,
	clock: Arc<dyn Clock>,
	config: JobsConfig,
	license: LicenseGate,
	hardware_cap: usize,
	id_factory: JobIdFactory,
	guardian: Arc<ActionGuardian<JobAction>>,
	scheduled_guardian: ActionGuardian<ScheduledAction>,
	closer: Arc<JobCloser>,
	timeouts: IdleTimeoutManager,
	schedulers: Mutex<HashMap<String, Arc<JobScheduler>>>,
	restart_handles: Mutex<Vec<JoinHandle<()>>>,
	self_ref: Weak<JobManager>,
}

impl JobManager {
	/// Build a manager, loading license constraints from the process manager and
	/// persisting the engine's capability descriptor.
	pub async fn new(deps: JobManagerDeps) -> Result<Arc<Self>> {
		let raw_info = deps.process_manager.get_info().await?;
		let license = LicenseGate::parse(&raw_info);
		let hardware_cap = hardware_job_cap(deps.cpu_cores, deps.config.max_jobs_factor);
		info!(
			cpu_cores = deps.cpu_cores,
			max_jobs_factor = deps.config.max_jobs_factor,
			hardware_cap,
			"Hardware job cap computed"
		);

		let mut info_doc = match serde_json::from_str::<Value>(&raw_info) {
			Ok(Value::Object(map)) => map,
			_ => serde_json::Map::new(),
		};
		info_doc.insert(
			"appVer".to_string(),
			Value::String(env!("CARGO_PKG_VERSION").to_string()),
		);
		deps.provider.save_info(&Value::Object(info_doc)).await?;

		let guardian = Arc::new(ActionGuardian::new());
		let closer = Arc::new(JobCloser::new(
			Arc::clone(&deps.provider),
			Arc::clone(&deps.process_manager),
			Arc::clone(&guardian),
		));
		let timeouts = IdleTimeoutManager::new(
			close_callback(Arc::clone(&closer)),
			deps.config.timeout_retry_backoff(),
		);

		Ok(Arc::new_cyclic(|self_ref| Self {
			provider: deps.provider,
			process_manager: deps.process_manager,
			extractor_factory: deps.extractor_factory,
			clock: deps.clock,
			config: deps.config,
			license,
			hardware_cap,
			id_factory: JobIdFactory::new(),
			guardian,
			scheduled_guardian: ActionGuardian::new(),
			closer,
			timeouts,
			schedulers: Mutex::new(HashMap::new()),
			restart_handles: Mutex::new(Vec::new()),
			self_ref: self_ref.clone(),
		}))
	}

	pub fn license(&self) -> &LicenseGate {
		&self.license
	}

	pub fn hardware_job_cap(&self) -> usize {
		self.hardware_cap
	}

	pub async fn get_job(&self, job_id: &str) -> Result<Job> {
		self.provider
			.get_job(job_id)
			.await?
			.ok_or_else(|| JobError::UnknownJob(job_id.to_string()))
	}

	pub async fn get_jobs(&self) -> Result<Vec<Job>> {
		self.provider.get_jobs().await
	}

	#[instrument(skip(self, config), fields(job_id = ?config.id))]
	pub async fn create_job(&self, config: JobConfiguration) -> Result<Job> {
		config.validate()?;

		let job_id = match config.id.as_deref() {
			Some(id) => {
				validate_job_id(id)?;
				if self.provider.job_exists(id).await? {
					return Err(JobError::JobIdAlreadyExists(id.to_string()));
				}
				id.to_string()
			}
			None => self.generate_job_id().await?,
		};

		let running_jobs = self.process_manager.number_of_running_jobs();
		let running_detectors = self.running_detector_count().await?;
		self.license
			.check_on_create(&config.analysis_config, running_jobs, running_detectors)?;

		let job = config.into_job(job_id, self.config.default_idle_timeout_secs, Utc::now());
		self.provider.create_job(&job).await?;
		self.audit(AuditMessage::info(&job.id, messages::JOB_CREATED))
			.await;

		info!(job_id = %job.id, detectors = job.analysis_config.detectors.len(), "Job created");
		Ok(job)
	}

	async fn generate_job_id(&self) -> Result<String> {
		loop {
			let id = self.id_factory.next_id(Utc::now());
			if !self.provider.job_exists(&id).await? {
				return Ok(id);
			}
		}
	}

	async fn running_detector_count(&self) -> Result<usize> {
		Ok(self
			.provider
			.get_jobs()
			.await?
			.iter()
			.filter(|job| self.process_manager.job_is_running(&job.id))
			.map(|job| job.analysis_config.detectors.len())
			.sum())
	}

	/// Stream an upload into the job's analysis process.
	#[instrument(skip(self, data, params), fields(bytes = data.len()))]
	pub async fn submit_data_load_job(
		&self,
		job_id: &str,
		data: Bytes,
		mut params: DataLoadParams,
	) -> Result<DataCounts> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Writing)?;
		let job = self.get_job(job_id).await?;

		if !self.process_manager.job_is_running(job_id) {
			self.license.check_on_reactivate(
				job_id,
				self.process_manager.number_of_running_jobs(),
				self.hardware_cap,
			)?;
		}

		params.ignore_downtime |= job.ignore_downtime;
		let counts = match self
			.process_manager
			.process_data_load_job(&job, data, &params)
			.await
		{
			Ok(counts) => counts,
			Err(e) => {
				if matches!(e, JobError::NativeProcess(_)) {
					error!(job_id, error = %e, "Analysis process failed, closing job");
					if let Err(close_err) = self.closer.close_held(job_id).await {
						warn!(job_id, error = %close_err, "Failed to close job after process failure");
					}
				}
				return Err(e);
			}
		};

		let mut totals = job.counts.clone();
		totals.accumulate(&counts);
		let mut update = JobUpdate::new()
			.status(JobStatus::Running)
			.last_data_time(Utc::now())
			.counts(totals);
		if job.ignore_downtime && counts.processed_record_count > 0 {
			update = update.ignore_downtime(false);
		}
		self.provider.update_job(job_id, update).await?;

		self.timeouts.start_timeout(job_id, job.idle_timeout());

		debug!(
			job_id,
			processed = counts.processed_record_count,
			"data load complete"
		);
		Ok(counts)
	}

	#[instrument(skip(self))]
	pub async fn close_job(&self, job_id: &str) -> Result<()> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Closing)?;
		self.timeouts.stop_timeout(job_id);
		self.closer.close_held(job_id).await
	}

	/// Stop the scheduler, close the job if running, delete its artifacts, then
	/// delete the job record. Scheduler starts are refused until the delete
	/// finishes.
	#[instrument(skip(self))]
	pub async fn delete_job(&self, job_id: &str) -> Result<()> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Deleting)?;
		let _scheduled_ticket = self
			.scheduled_guardian
			.try_acquire(job_id, ScheduledAction::Stopping)?;
		if !self.provider.job_exists(job_id).await? {
			return Err(JobError::UnknownJob(job_id.to_string()));
		}

		let scheduler = lock(&self.schedulers).remove(job_id);
		if let Some(scheduler) = scheduler {
			if let Err(e) = scheduler.stop_manual().await {
				debug!(job_id, error = %e, "scheduler was not running");
			}
		}

		self.timeouts.stop_timeout(job_id);
		if self.process_manager.job_is_running(job_id) {
			self.closer.close_held(job_id).await?;
		}

		self.provider.delete_job_artifacts(job_id).await?;
		self.provider.delete_job(job_id).await?;
		self.audit(AuditMessage::info(job_id, messages::JOB_DELETED))
			.await;

		info!(job_id, "Job deleted");
		Ok(())
	}

	#[instrument(skip(self, params))]
	pub async fn flush_job(&self, job_id: &str, params: InterimResultsParams) -> Result<()> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Flushing)?;
		self.ensure_exists(job_id).await?;
		self.process_manager.flush_job(job_id, &params).await
	}

	#[instrument(skip(self, config))]
	pub async fn write_update_config_message(&self, job_id: &str, config: &str) -> Result<()> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Updating)?;
		self.ensure_exists(job_id).await?;
		self.process_manager
			.write_update_config_message(job_id, config)
			.await
	}

	pub async fn set_description(&self, job_id: &str, description: &str) -> Result<()> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Updating)?;
		self.provider
			.update_job(job_id, JobUpdate::new().description(description))
			.await
	}

	pub async fn update_custom_settings(&self, job_id: &str, settings: CustomSettings) -> Result<()> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Updating)?;
		self.provider
			.update_job(job_id, JobUpdate::new().custom_settings(settings))
			.await
	}

	/// Launch the job's scheduler. Returns once the run is launched; extraction
	/// proceeds in the background.
	#[instrument(skip(self, request))]
	pub async fn start_job_scheduler(&self, job_id: &str, request: StartRequest) -> Result<()> {
		let _ticket = self
			.scheduled_guardian
			.try_acquire(job_id, ScheduledAction::Starting)?;
		let job = self.get_job(job_id).await?;
		let scheduler = self.scheduler_for(&job)?;
		scheduler.start(&job, request).await
	}

	/// Stop the job's scheduler and wait until it has halted.
	#[instrument(skip(self))]
	pub async fn stop_job_scheduler(&self, job_id: &str) -> Result<()> {
		let _ticket = self
			.scheduled_guardian
			.try_acquire(job_id, ScheduledAction::Stopping)?;

		let scheduler = lock(&self.schedulers).get(job_id).cloned();
		match scheduler {
			Some(scheduler) => scheduler.stop_manual().await,
			None => {
				let job = self.get_job(job_id).await?;
				if job.is_scheduled() {
					Err(JobError::CannotStopScheduler {
						job_id: job_id.to_string(),
						status: SchedulerStatus::Stopped,
					})
				} else {
					Err(JobError::NoSuchScheduledJob(job_id.to_string()))
				}
			}
		}
	}

	pub fn scheduler_status(&self, job_id: &str) -> Option<SchedulerStatus> {
		lock(&self.schedulers).get(job_id).map(|s| s.status())
	}

	/// Wait until the lookback of the job's current scheduler run has finished.
	pub async fn await_lookback_termination(&self, job_id: &str) {
		let scheduler = lock(&self.schedulers).get(job_id).cloned();
		if let Some(scheduler) = scheduler {
			scheduler.await_lookback_termination().await;
		}
	}

	fn scheduler_for(&self, job: &Job) -> Result<Arc<JobScheduler>> {
		if !job.is_scheduled() {
			return Err(JobError::NoSuchScheduledJob(job.id.clone()));
		}
		if let Some(existing) = lock(&self.schedulers).get(&job.id) {
			return Ok(Arc::clone(existing));
		}

		let scheduler = Arc::new(JobScheduler::new(
			job,
			self.extractor_factory.new_extractor(job)?,
			Arc::new(WeakProcessor(self.self_ref.clone())),
			Arc::clone(&self.provider),
			Arc::clone(&self.clock),
		)?);
		let mut schedulers = lock(&self.schedulers);
		Ok(Arc::clone(
			schedulers.entry(job.id.clone()).or_insert(scheduler),
		))
	}

	/// Resume, in the background, every scheduler whose persisted status is
	/// `STARTED`. A failure to restart one job does not affect the others.
	#[instrument(skip(self))]
	pub async fn restart_scheduled_jobs(&self) -> Result<usize> {
		let jobs = self.provider.get_jobs().await?;
		let mut handles = Vec::new();

		for job in jobs
			.into_iter()
			.filter(|job| job.scheduler_status == Some(SchedulerStatus::Started))
		{
			let manager = self.self_ref.clone();
			handles.push(tokio::spawn(async move {
				let Some(manager) = manager.upgrade() else {
					return;
				};
				info!(job_id = %job.id, "Restarting scheduler");
				if let Err(e) = manager
					.start_job_scheduler(&job.id, StartRequest::default())
					.await
				{
					warn!(job_id = %job.id, error = %e, "Failed to restart scheduler");
				}
			}));
		}

		let restarted = handles.len();
		lock(&self.restart_handles).extend(handles);
		info!(restarted, "Scheduled jobs restarting");
		Ok(restarted)
	}

	/// Revert the job's model to the most recent snapshot matching `request`.
	#[instrument(skip(self, request))]
	pub async fn revert_to_snapshot(
		&self,
		job_id: &str,
		request: RevertRequest,
	) -> Result<ModelSnapshot> {
		let _ticket = self
			.guardian
			.try_acquire(job_id, JobAction::RevertingSnapshot)?;
		self.ensure_exists(job_id).await?;

		let snapshots = self.provider.model_snapshots(job_id).await?;
		let mut snapshot = request
			.select(&snapshots)
			.cloned()
			.ok_or_else(|| JobError::NoSuchModelSnapshot {
				job_id: job_id.to_string(),
			})?;

		snapshot.restore_priority = next_restore_priority(&snapshots);
		self.provider.update_model_snapshot(&snapshot).await?;
		self.provider
			.update_job(job_id, JobUpdate::new().ignore_downtime(true))
			.await?;
		self.audit(AuditMessage::info(
			job_id,
			format!("{} '{}'", messages::JOB_REVERTED, snapshot.snapshot_id),
		))
		.await;

		info!(job_id, snapshot_id = %snapshot.snapshot_id, "Model reverted");
		Ok(snapshot)
	}

	/// Rename a snapshot. `old_description` must identify exactly one snapshot and
	/// `new_description` must not belong to another snapshot of the job.
	#[instrument(skip(self))]
	pub async fn update_model_snapshot_description(
		&self,
		job_id: &str,
		old_description: &str,
		new_description: &str,
	) -> Result<ModelSnapshot> {
		let _ticket = self.guardian.try_acquire(job_id, JobAction::Updating)?;
		self.ensure_exists(job_id).await?;
		let snapshots = self.provider.model_snapshots(job_id).await?;

		let mut matching = snapshots
			.iter()
			.filter(|s| s.description == old_description);
		let mut snapshot = match (matching.next(), matching.next()) {
			(Some(only), None) => only.clone(),
			_ => {
				return Err(JobError::NoSuchModelSnapshot {
					job_id: job_id.to_string(),
				})
			}
		};

		if snapshots
			.iter()
			.any(|s| s.description == new_description && s.snapshot_id != snapshot.snapshot_id)
		{
			return Err(JobError::ModelSnapshotDescriptionInUse {
				job_id: job_id.to_string(),
				description: new_description.to_string(),
			});
		}

		snapshot.description = new_description.to_string();
		self.provider.update_model_snapshot(&snapshot).await?;
		Ok(snapshot)
	}

	/// Set `ignore_downtime` on every job that has processed data. Returns the
	/// number of jobs updated.
	#[instrument(skip(self))]
	pub async fn set_ignore_downtime_to_all_jobs(&self) -> Result<usize> {
		let mut updated = 0;
		for job in self.provider.get_jobs().await? {
			if !job.has_processed_records() {
				continue;
			}
			match self
				.provider
				.update_job(&job.id, JobUpdate::new().ignore_downtime(true))
				.await
			{
				Ok(()) => updated += 1,
				Err(e) => warn!(job_id = %job.id, error = %e, "Failed to set ignore downtime"),
			}
		}
		Ok(updated)
	}

	/// Join pending restarts, halt every scheduler (they stay `STARTED` so the
	/// next startup resumes them), then close every job with an idle timeout.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let restarts: Vec<_> = lock(&self.restart_handles).drain(..).collect();
		for handle in restarts {
			if let Err(e) = handle.await {
				warn!(error = %e, "Scheduler restart task failed");
			}
		}

		let schedulers: Vec<_> = lock(&self.schedulers).drain().map(|(_, s)| s).collect();
		info!(schedulers = schedulers.len(), "Stopping schedulers");
		for scheduler in &schedulers {
			scheduler.stop_for_shutdown().await;
		}

		self.timeouts.shutdown().await;
		self.audit(AuditMessage::system_info(messages::ENGINE_SHUTDOWN))
			.await;
		info!("Job manager shut down");
	}

	async fn ensure_exists(&self, job_id: &str) -> Result<()> {
		if self.provider.job_exists(job_id).await? {
			Ok(())
		} else {
			Err(JobError::UnknownJob(job_id.to_string()))
		}
	}

	async fn audit(&self, message: AuditMessage) {
		if let Err(e) = self.provider.audit(message).await {
			warn!(error = %e, "Failed to record audit message");
		}
	}
}

fn close_callback(closer: Arc<JobCloser>) -> CloseFn {
	Arc::new(move |job_id: String| {
		let closer = Arc::clone(&closer);
		async move { closer.close_job(&job_id).await }.boxed()
	})
}

/// Routes scheduler submissions back through the manager without keeping it alive.
struct WeakProcessor(Weak<JobManager>);

impl WeakProcessor {
	fn manager(&self) -> Result<Arc<JobManager>> {
		self.0
			.upgrade()
			.ok_or_else(|| JobError::DataUpload("job manager has shut down".to_string()))
	}
}

#[async_trait]
impl DataProcessor for WeakProcessor {
	async fn submit_data_load_job(
		&self,
		job_id: &str,
		data: Bytes,
		params: DataLoadParams,
	) -> Result<DataCounts> {
		self.manager()?
			.submit_data_load_job(job_id, data, params)
			.await
	}

	async fn flush_job(&self, job_id: &str, params: InterimResultsParams) -> Result<()> {
		self.manager()?.flush_job(job_id, params).await
	}

	async fn close_job(&self, job_id: &str) -> Result<()> {
		self.manager()?.close_job(job_id).await
	}
}
