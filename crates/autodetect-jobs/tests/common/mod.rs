// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use autodetect_config::JobsConfig;
use autodetect_core::{
	AnalysisConfig, DataCounts, DataLoadParams, DataSource, Detector, InterimResultsParams, Job,
	JobConfiguration, JobError, Result, SchedulerConfig,
};
use autodetect_jobs::{
	Clock, DataExtractor, DataExtractorFactory, DataProcessor, JobManager, JobManagerDeps,
	MemoryJobProvider, ProcessManager,
};
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{Notify, Semaphore};

/// 2016-03-15T00:00:00Z, aligned to every bucket span used in the tests.
pub const BASE_MS: i64 = 1_458_000_000_000;
pub const HOUR_MS: i64 = 3_600_000;

pub const UNLIMITED_LICENSE: &str = r#"{"jobs": -1, "detectors": -1, "partitions": -1}"#;

/// Clock driven by tokio's (pausable) time, starting at `base_ms`.
pub struct TokioClock {
	base_ms: i64,
	origin: tokio::time::Instant,
}

impl TokioClock {
	pub fn new(base_ms: i64) -> Self {
		Self {
			base_ms,
			origin: tokio::time::Instant::now(),
		}
	}
}

impl Clock for TokioClock {
	fn now_ms(&self) -> i64 {
		self.base_ms + self.origin.elapsed().as_millis() as i64
	}
}

fn guard<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
	mutex.lock().unwrap()
}

/// Parses uploads as newline separated epoch-millisecond record timestamps.
pub fn counts_for(data: &[u8]) -> DataCounts {
	let text = String::from_utf8_lossy(data);
	let timestamps: Vec<i64> = text
		.lines()
		.filter_map(|line| line.trim().parse().ok())
		.collect();
	DataCounts {
		processed_record_count: timestamps.len() as u64,
		input_record_count: timestamps.len() as u64,
		input_bytes: data.len() as u64,
		latest_record_timestamp_ms: timestamps.iter().copied().max(),
		..Default::default()
	}
}

pub fn records(timestamps: &[i64]) -> Bytes {
	let mut text = String::new();
	for ts in timestamps {
		text.push_str(&ts.to_string());
		text.push('\n');
	}
	Bytes::from(text)
}

#[derive(Default)]
pub struct FakeProcessManager {
	info: Mutex<String>,
	running: Mutex<HashSet<String>>,
	pub closed: Mutex<Vec<String>>,
	pub flushes: Mutex<Vec<(String, InterimResultsParams)>>,
	pub uploads: Mutex<Vec<(String, DataLoadParams)>>,
	pub config_messages: Mutex<Vec<(String, String)>>,
	upload_failure: Mutex<Option<JobError>>,
	close_gate: Mutex<Option<Arc<Semaphore>>>,
	pub close_entered: Notify,
	flush_gate: Mutex<Option<Arc<Semaphore>>>,
	pub flush_entered: Notify,
}

impl FakeProcessManager {
	pub fn with_info(info: &str) -> Self {
		Self {
			info: Mutex::new(info.to_string()),
			..Default::default()
		}
	}

	pub fn set_running(&self, job_id: &str) {
		guard(&self.running).insert(job_id.to_string());
	}

	pub fn fail_next_upload(&self, error: JobError) {
		*guard(&self.upload_failure) = Some(error);
	}

	/// Make every close block until [`release_closes`](Self::release_closes).
	pub fn gate_closes(&self) {
		*guard(&self.close_gate) = Some(Arc::new(Semaphore::new(0)));
	}

	pub fn release_closes(&self) {
		if let Some(gate) = guard(&self.close_gate).as_ref() {
			gate.add_permits(Semaphore::MAX_PERMITS / 2);
		}
	}

	/// Make every flush block until [`release_flushes`](Self::release_flushes).
	pub fn gate_flushes(&self) {
		*guard(&self.flush_gate) = Some(Arc::new(Semaphore::new(0)));
	}

	pub fn release_flushes(&self) {
		if let Some(gate) = guard(&self.flush_gate).as_ref() {
			gate.add_permits(Semaphore::MAX_PERMITS / 2);
		}
	}

	pub fn closed(&self) -> Vec<String> {
		guard(&self.closed).clone()
	}

	pub fn flushes(&self) -> Vec<(String, InterimResultsParams)> {
		guard(&self.flushes).clone()
	}
}

#[async_trait]
impl ProcessManager for FakeProcessManager {
	async fn close_job(&self, job_id: &str) -> Result<()> {
		let gate = guard(&self.close_gate).clone();
		if let Some(gate) = gate {
			self.close_entered.notify_one();
			gate.acquire()
				.await
				.map_err(|e| JobError::NativeProcess(e.to_string()))?
				.forget();
		}
		guard(&self.running).remove(job_id);
		guard(&self.closed).push(job_id.to_string());
		Ok(())
	}

	async fn flush_job(&self, job_id: &str, params: &InterimResultsParams) -> Result<()> {
		let gate = guard(&self.flush_gate).clone();
		if let Some(gate) = gate {
			self.flush_entered.notify_one();
			gate.acquire()
				.await
				.map_err(|e| JobError::NativeProcess(e.to_string()))?
				.forget();
		}
		guard(&self.flushes).push((job_id.to_string(), params.clone()));
		Ok(())
	}

	async fn process_data_load_job(
		&self,
		job: &Job,
		data: Bytes,
		params: &DataLoadParams,
	) -> Result<DataCounts> {
		if let Some(error) = guard(&self.upload_failure).take() {
			return Err(error);
		}
		guard(&self.running).insert(job.id.clone());
		guard(&self.uploads).push((job.id.clone(), params.clone()));
		Ok(counts_for(&data))
	}

	async fn write_update_config_message(&self, job_id: &str, config: &str) -> Result<()> {
		guard(&self.config_messages).push((job_id.to_string(), config.to_string()));
		Ok(())
	}

	fn number_of_running_jobs(&self) -> usize {
		guard(&self.running).len()
	}

	fn job_is_running(&self, job_id: &str) -> bool {
		guard(&self.running).contains(job_id)
	}

	async fn get_info(&self) -> Result<String> {
		Ok(guard(&self.info).clone())
	}
}

type BatchFn = dyn Fn(i64, i64) -> Vec<Bytes> + Send + Sync;

/// Shared state behind every extractor a [`FakeExtractorFactory`] hands out.
pub struct ExtractorState {
	searches: Mutex<Vec<(i64, i64)>>,
	batches: Box<BatchFn>,
	failing_searches: AtomicUsize,
	pub clears: AtomicUsize,
}

impl ExtractorState {
	pub fn searches(&self) -> Vec<(i64, i64)> {
		guard(&self.searches).clone()
	}

	pub fn fail_next_searches(&self, n: usize) {
		self.failing_searches.store(n, Ordering::SeqCst);
	}
}

pub struct FakeExtractorFactory {
	pub state: Arc<ExtractorState>,
	failing_jobs: Mutex<HashSet<String>>,
}

impl FakeExtractorFactory {
	/// Every search yields one batch holding a single record at the search start.
	pub fn new() -> Self {
		Self::with_batches(|start, end| {
			if end > start {
				vec![records(&[start])]
			} else {
				Vec::new()
			}
		})
	}

	pub fn with_batches(batches: impl Fn(i64, i64) -> Vec<Bytes> + Send + Sync + 'static) -> Self {
		Self {
			state: Arc::new(ExtractorState {
				searches: Mutex::new(Vec::new()),
				batches: Box::new(batches),
				failing_searches: AtomicUsize::new(0),
				clears: AtomicUsize::new(0),
			}),
			failing_jobs: Mutex::new(HashSet::new()),
		}
	}

	/// Refuse to build an extractor for `job_id`.
	pub fn fail_extractor_for(&self, job_id: &str) {
		guard(&self.failing_jobs).insert(job_id.to_string());
	}

	pub fn extractor(&self) -> Box<dyn DataExtractor> {
		Box::new(FakeExtractor {
			state: Arc::clone(&self.state),
			pending: VecDeque::new(),
		})
	}
}

impl DataExtractorFactory for FakeExtractorFactory {
	fn new_extractor(&self, job: &Job) -> Result<Box<dyn DataExtractor>> {
		if guard(&self.failing_jobs).contains(&job.id) {
			return Err(JobError::DataStore(format!("no data source for '{}'", job.id)));
		}
		Ok(self.extractor())
	}
}

struct FakeExtractor {
	state: Arc<ExtractorState>,
	pending: VecDeque<Bytes>,
}

#[async_trait]
impl DataExtractor for FakeExtractor {
	async fn new_search(&mut self, start_ms: i64, end_ms: i64) -> Result<()> {
		guard(&self.state.searches).push((start_ms, end_ms));
		if self
			.state
			.failing_searches
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok()
		{
			return Err(JobError::DataStore("search failed".to_string()));
		}
		self.pending = (self.state.batches)(start_ms, end_ms).into();
		Ok(())
	}

	fn has_next(&self) -> bool {
		!self.pending.is_empty()
	}

	async fn next(&mut self) -> Result<Option<Bytes>> {
		Ok(self.pending.pop_front())
	}

	fn clear(&mut self) {
		self.pending.clear();
		self.state.clears.fetch_add(1, Ordering::SeqCst);
	}
}

/// A [`DataProcessor`] that records what the scheduler sends it.
#[derive(Default)]
pub struct RecordingProcessor {
	submissions: Mutex<Vec<Bytes>>,
	flushes: Mutex<Vec<InterimResultsParams>>,
	pub closes: AtomicUsize,
	failing_submissions: AtomicUsize,
	submit_gate: Mutex<Option<Arc<Semaphore>>>,
	pub submit_entered: Notify,
}

impl RecordingProcessor {
	pub fn submissions(&self) -> Vec<Bytes> {
		guard(&self.submissions).clone()
	}

	pub fn flushes(&self) -> Vec<InterimResultsParams> {
		guard(&self.flushes).clone()
	}

	pub fn fail_next_submissions(&self, n: usize) {
		self.failing_submissions.store(n, Ordering::SeqCst);
	}

	/// Make every submission block until [`release_submissions`](Self::release_submissions).
	pub fn gate_submissions(&self) {
		*guard(&self.submit_gate) = Some(Arc::new(Semaphore::new(0)));
	}

	pub fn release_submissions(&self) {
		if let Some(gate) = guard(&self.submit_gate).as_ref() {
			gate.add_permits(Semaphore::MAX_PERMITS / 2);
		}
	}
}

#[async_trait]
impl DataProcessor for RecordingProcessor {
	async fn submit_data_load_job(
		&self,
		job_id: &str,
		data: Bytes,
		_params: DataLoadParams,
	) -> Result<DataCounts> {
		let gate = guard(&self.submit_gate).clone();
		if let Some(gate) = gate {
			self.submit_entered.notify_one();
			gate.acquire()
				.await
				.map_err(|e| JobError::DataUpload(e.to_string()))?
				.forget();
		}
		if self
			.failing_submissions
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok()
		{
			return Err(JobError::NativeProcess(format!("{job_id}: process crashed")));
		}
		let counts = counts_for(&data);
		guard(&self.submissions).push(data);
		Ok(counts)
	}

	async fn flush_job(&self, _job_id: &str, params: InterimResultsParams) -> Result<()> {
		guard(&self.flushes).push(params);
		Ok(())
	}

	async fn close_job(&self, _job_id: &str) -> Result<()> {
		self.closes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

pub fn analysis_config(bucket_span_secs: u64) -> AnalysisConfig {
	AnalysisConfig {
		bucket_span_secs,
		detectors: vec![Detector::new("count")],
	}
}

pub fn job_config(id: &str) -> JobConfiguration {
	let mut config = JobConfiguration::new(analysis_config(3600));
	config.id = Some(id.to_string());
	config
}

pub fn scheduled_job_config(
	id: &str,
	bucket_span_secs: u64,
	start_ms: Option<i64>,
	end_ms: Option<i64>,
) -> JobConfiguration {
	let mut config = JobConfiguration::new(analysis_config(bucket_span_secs));
	config.id = Some(id.to_string());
	let mut scheduler = SchedulerConfig::new(DataSource::Elasticsearch, "http://localhost:9200");
	scheduler.start_time_ms = start_ms;
	scheduler.end_time_ms = end_ms;
	config.scheduler_config = Some(scheduler);
	config
}

pub fn scheduled_job(id: &str, bucket_span_secs: u64, start_ms: Option<i64>, end_ms: Option<i64>) -> Job {
	scheduled_job_config(id, bucket_span_secs, start_ms, end_ms).into_job(
		id.to_string(),
		600,
		Utc::now(),
	)
}

pub struct Harness {
	pub manager: Arc<JobManager>,
	pub provider: Arc<MemoryJobProvider>,
	pub process: Arc<FakeProcessManager>,
	pub extractors: Arc<FakeExtractorFactory>,
}

pub struct HarnessBuilder {
	license: String,
	cpu_cores: usize,
	config: JobsConfig,
	extractors: FakeExtractorFactory,
	provider: MemoryJobProvider,
}

impl HarnessBuilder {
	pub fn new() -> Self {
		Self {
			license: UNLIMITED_LICENSE.to_string(),
			cpu_cores: 4,
			config: JobsConfig::default(),
			extractors: FakeExtractorFactory::new(),
			provider: MemoryJobProvider::new(),
		}
	}

	pub fn license(mut self, license: &str) -> Self {
		self.license = license.to_string();
		self
	}

	pub fn cpu_cores(mut self, cores: usize) -> Self {
		self.cpu_cores = cores;
		self
	}

	pub fn max_jobs_factor(mut self, factor: f64) -> Self {
		self.config.max_jobs_factor = factor;
		self
	}

	pub fn extractors(mut self, extractors: FakeExtractorFactory) -> Self {
		self.extractors = extractors;
		self
	}

	pub fn provider(mut self, provider: MemoryJobProvider) -> Self {
		self.provider = provider;
		self
	}

	pub async fn build(self) -> Harness {
		let provider = Arc::new(self.provider);
		let process = Arc::new(FakeProcessManager::with_info(&self.license));
		let extractors = Arc::new(self.extractors);
		let manager = JobManager::new(JobManagerDeps {
			provider: provider.clone(),
			process_manager: process.clone(),
			extractor_factory: extractors.clone(),
			clock: Arc::new(TokioClock::new(BASE_MS)),
			config: self.config,
			cpu_cores: self.cpu_cores,
		})
		.await
		.unwrap();

		Harness {
			manager,
			provider,
			process,
			extractors,
		}
	}
}

pub async fn harness() -> Harness {
	HarnessBuilder::new().build().await
}
