// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process [`JobProvider`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use autodetect_core::{AuditMessage, Job, JobError, JobUpdate, ModelSnapshot, Result};
use serde_json::Value;
use tracing::debug;

use crate::lock;
use crate::traits::JobProvider;

#[derive(Default)]
pub struct MemoryJobProvider {
	jobs: Mutex<BTreeMap<String, Job>>,
	snapshots: Mutex<HashMap<String, Vec<ModelSnapshot>>>,
	audits: Mutex<Vec<AuditMessage>>,
	info: Mutex<Option<Value>>,
	deleted_artifacts: Mutex<Vec<String>>,
	failing_updates: Mutex<HashSet<String>>,
}

impl MemoryJobProvider {
	pub fn new() -> Self {
		Self::default()
	}

	/// Store a job as-is, replacing any job with the same id.
	pub fn insert_job(&self, job: Job) {
		lock(&self.jobs).insert(job.id.clone(), job);
	}

	pub fn add_model_snapshot(&self, snapshot: ModelSnapshot) {
		lock(&self.snapshots)
			.entry(snapshot.job_id.clone())
			.or_default()
			.push(snapshot);
	}

	pub fn audit_messages(&self) -> Vec<AuditMessage> {
		lock(&self.audits).clone()
	}

	pub fn job_audit_messages(&self, job_id: &str) -> Vec<String> {
		lock(&self.audits)
			.iter()
			.filter(|m| m.job_id.as_deref() == Some(job_id))
			.map(|m| m.message.clone())
			.collect()
	}

	pub fn info(&self) -> Option<Value> {
		lock(&self.info).clone()
	}

	pub fn deleted_artifacts(&self) -> Vec<String> {
		lock(&self.deleted_artifacts).clone()
	}

	/// Make every later update of `job_id` fail with a data store error.
	pub fn fail_updates_for(&self, job_id: &str) {
		lock(&self.failing_updates).insert(job_id.to_string());
	}
}

#[async_trait]
impl JobProvider for MemoryJobProvider {
	async fn job_exists(&self, job_id: &str) -> Result<bool> {
		Ok(lock(&self.jobs).contains_key(job_id))
	}

	async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
		Ok(lock(&self.jobs).get(job_id).cloned())
	}

	async fn get_jobs(&self) -> Result<Vec<Job>> {
		Ok(lock(&self.jobs).values().cloned().collect())
	}

	async fn create_job(&self, job: &Job) -> Result<()> {
		let mut jobs = lock(&self.jobs);
		if jobs.contains_key(&job.id) {
			return Err(JobError::JobIdAlreadyExists(job.id.clone()));
		}
		jobs.insert(job.id.clone(), job.clone());
		Ok(())
	}

	async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<()> {
		if lock(&self.failing_updates).contains(job_id) {
			return Err(JobError::DataStore(format!("update of job '{job_id}' rejected")));
		}
		let mut jobs = lock(&self.jobs);
		let job = jobs
			.get_mut(job_id)
			.ok_or_else(|| JobError::UnknownJob(job_id.to_string()))?;
		update.apply(job);
		debug!(job_id, fields = update.fields().len(), "job updated");
		Ok(())
	}

	async fn delete_job(&self, job_id: &str) -> Result<()> {
		lock(&self.jobs)
			.remove(job_id)
			.map(|_| ())
			.ok_or_else(|| JobError::UnknownJob(job_id.to_string()))
	}

	async fn delete_job_artifacts(&self, job_id: &str) -> Result<()> {
		lock(&self.snapshots).remove(job_id);
		lock(&self.deleted_artifacts).push(job_id.to_string());
		Ok(())
	}

	async fn model_snapshots(&self, job_id: &str) -> Result<Vec<ModelSnapshot>> {
		Ok(lock(&self.snapshots)
			.get(job_id)
			.cloned()
			.unwrap_or_default())
	}

	async fn update_model_snapshot(&self, snapshot: &ModelSnapshot) -> Result<()> {
		let mut snapshots = lock(&self.snapshots);
		let stored = snapshots
			.get_mut(&snapshot.job_id)
			.and_then(|all| all.iter_mut().find(|s| s.snapshot_id == snapshot.snapshot_id))
			.ok_or_else(|| JobError::NoSuchModelSnapshot {
				job_id: snapshot.job_id.clone(),
			})?;
		*stored = snapshot.clone();
		Ok(())
	}

	async fn audit(&self, message: AuditMessage) -> Result<()> {
		lock(&self.audits).push(message);
		Ok(())
	}

	async fn save_info(&self, info: &Value) -> Result<()> {
		*lock(&self.info) = Some(info.clone());
		Ok(())
	}
}
