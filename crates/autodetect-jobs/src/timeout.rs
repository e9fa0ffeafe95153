// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deferred auto-close of idle jobs.
//!
//! Every tracked job owns one timer task. Whoever removes a job's entry from the
//! registry owns the close: the timer itself when it expires, or `shutdown`
//! when it drains the registry. Removal happens under the registry lock and is
//! checked against the entry's generation, so a replaced or cancelled timer can
//! never fire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autodetect_core::Result;
use futures::future::{join_all, BoxFuture};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lock;

/// Close callback invoked when a timeout fires.
pub type CloseFn = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct TimeoutEntry {
	generation: u64,
	cancel: CancellationToken,
	handle: JoinHandle<()>,
}

struct Registry {
	entries: HashMap<String, TimeoutEntry>,
	/// Timer tasks that claimed their entry and are closing the job.
	firing: Vec<JoinHandle<()>>,
}

struct Inner {
	close: CloseFn,
	retry_backoff: Duration,
	registry: Mutex<Registry>,
	generation: AtomicU64,
	shut_down: AtomicBool,
}

pub struct IdleTimeoutManager {
	inner: Arc<Inner>,
}

impl IdleTimeoutManager {
	pub fn new(close: CloseFn, retry_backoff: Duration) -> Self {
		Self {
			inner: Arc::new(Inner {
				close,
				retry_backoff,
				registry: Mutex::new(Registry {
					entries: HashMap::new(),
					firing: Vec::new(),
				}),
				generation: AtomicU64::new(0),
				shut_down: AtomicBool::new(false),
			}),
		}
	}

	/// Arm (or re-arm) the timeout for `job_id`.
	///
	/// A zero or negative duration is tracked but never fires by itself; it is
	/// only closed by [`shutdown`](Self::shutdown).
	pub fn start_timeout(&self, job_id: &str, timeout: chrono::Duration) {
		if self.inner.shut_down.load(Ordering::SeqCst) {
			debug!(job_id, "timeout manager shut down, ignoring start");
			return;
		}

		let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let cancel = CancellationToken::new();
		let delay = timeout.to_std().ok().filter(|d| !d.is_zero());

		let mut registry = lock(&self.inner.registry);
		let handle = tokio::spawn(run_timer(
			Arc::clone(&self.inner),
			job_id.to_string(),
			generation,
			delay,
			cancel.clone(),
		));
		let previous = registry.entries.insert(
			job_id.to_string(),
			TimeoutEntry {
				generation,
				cancel,
				handle,
			},
		);
		drop(registry);

		if let Some(previous) = previous {
			previous.cancel.cancel();
		}
		debug!(job_id, timeout_secs = timeout.num_seconds(), "timeout armed");
	}

	/// Disarm the timeout for `job_id`, if any.
	pub fn stop_timeout(&self, job_id: &str) {
		let removed = lock(&self.inner.registry).entries.remove(job_id);
		if let Some(entry) = removed {
			entry.cancel.cancel();
			debug!(job_id, "timeout disarmed");
		}
	}

	pub fn is_tracking(&self, job_id: &str) -> bool {
		lock(&self.inner.registry).entries.contains_key(job_id)
	}

	/// Close every tracked job now and wait for all closes, including those
	/// already in progress and their retries.
	pub async fn shutdown(&self) {
		self.inner.shut_down.store(true, Ordering::SeqCst);

		let (entries, firing) = {
			let mut registry = lock(&self.inner.registry);
			let entries: Vec<_> = registry.entries.drain().collect();
			let firing = std::mem::take(&mut registry.firing);
			(entries, firing)
		};

		info!(tracked = entries.len(), in_flight = firing.len(), "Shutting down idle timeouts");

		let mut closes = Vec::with_capacity(entries.len());
		for (job_id, entry) in entries {
			entry.cancel.cancel();
			let inner = Arc::clone(&self.inner);
			closes.push(async move { inner.close_with_retry(&job_id).await });
		}
		join_all(closes).await;

		for handle in firing {
			let _ = handle.await;
		}
	}
}

async fn run_timer(
	inner: Arc<Inner>,
	job_id: String,
	generation: u64,
	delay: Option<Duration>,
	cancel: CancellationToken,
) {
	match delay {
		Some(delay) => {
			tokio::select! {
				_ = cancel.cancelled() => return,
				_ = tokio::time::sleep(delay) => {}
			}
		}
		None => {
			cancel.cancelled().await;
			return;
		}
	}

	if !inner.claim(&job_id, generation) {
		return;
	}
	info!(job_id = %job_id, "Idle timeout expired, closing job");
	inner.close_with_retry(&job_id).await;
}

impl Inner {
	/// Remove the entry if it still belongs to `generation`, moving its task
	/// handle to the in-flight list.
	fn claim(&self, job_id: &str, generation: u64) -> bool {
		let mut registry = lock(&self.registry);
		match registry.entries.get(job_id) {
			Some(entry) if entry.generation == generation => {}
			_ => return false,
		}
		if let Some(entry) = registry.entries.remove(job_id) {
			registry.firing.retain(|h| !h.is_finished());
			registry.firing.push(entry.handle);
		}
		true
	}

	async fn close_with_retry(&self, job_id: &str) {
		match (self.close)(job_id.to_string()).await {
			Ok(()) => {}
			Err(e) if e.is_in_use() => {
				warn!(
					job_id,
					error = %e,
					retry_in_secs = self.retry_backoff.as_secs(),
					"Job busy on timeout, retrying close once"
				);
				tokio::time::sleep(self.retry_backoff).await;
				if let Err(e) = (self.close)(job_id.to_string()).await {
					warn!(job_id, error = %e, "Giving up closing job after timeout");
				}
			}
			Err(e) => {
				warn!(job_id, error = %e, "Failed to close job after timeout");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use autodetect_core::JobError;
	use futures::FutureExt;
	use std::sync::atomic::AtomicUsize;

	#[derive(Default)]
	struct Recorder {
		closed: Mutex<Vec<String>>,
		in_use_failures: AtomicUsize,
	}

	impl Recorder {
		fn closed(&self) -> Vec<String> {
			lock(&self.closed).clone()
		}
	}

	fn manager(recorder: &Arc<Recorder>, backoff: Duration) -> IdleTimeoutManager {
		let recorder = Arc::clone(recorder);
		let close: CloseFn = Arc::new(move |job_id: String| {
			let recorder = Arc::clone(&recorder);
			async move {
				if recorder
					.in_use_failures
					.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
					.is_ok()
				{
					return Err(JobError::JobInUse {
						job_id,
						message: "busy".to_string(),
					});
				}
				lock(&recorder.closed).push(job_id);
				Ok(())
			}
			.boxed()
		});
		IdleTimeoutManager::new(close, backoff)
	}

	fn secs(s: i64) -> chrono::Duration {
		chrono::Duration::seconds(s)
	}

	#[tokio::test(start_paused = true)]
	async fn test_timeout_fires_after_duration() {
		let recorder = Arc::new(Recorder::default());
		let timeouts = manager(&recorder, Duration::from_secs(30));

		timeouts.start_timeout("farequote", secs(10));
		tokio::time::sleep(Duration::from_secs(9)).await;
		assert!(recorder.closed().is_empty());

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(recorder.closed(), vec!["farequote"]);
		assert!(!timeouts.is_tracking("farequote"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_non_positive_durations_never_fire() {
		let recorder = Arc::new(Recorder::default());
		let timeouts = manager(&recorder, Duration::from_secs(30));

		timeouts.start_timeout("zero", secs(0));
		timeouts.start_timeout("negative", secs(-5));
		tokio::time::sleep(Duration::from_secs(24 * 3600)).await;

		assert!(recorder.closed().is_empty());
		assert!(timeouts.is_tracking("zero"));
		assert!(timeouts.is_tracking("negative"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_stop_before_expiry_prevents_close() {
		let recorder = Arc::new(Recorder::default());
		let timeouts = manager(&recorder, Duration::from_secs(30));

		timeouts.start_timeout("farequote", secs(10));
		tokio::time::sleep(Duration::from_secs(5)).await;
		timeouts.stop_timeout("farequote");
		tokio::time::sleep(Duration::from_secs(60)).await;

		assert!(recorder.closed().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_restart_replaces_previous_timeout() {
		let recorder = Arc::new(Recorder::default());
		let timeouts = manager(&recorder, Duration::from_secs(30));

		timeouts.start_timeout("farequote", secs(10));
		tokio::time::sleep(Duration::from_secs(5)).await;
		timeouts.start_timeout("farequote", secs(20));

		tokio::time::sleep(Duration::from_secs(10)).await;
		assert!(recorder.closed().is_empty());

		tokio::time::sleep(Duration::from_secs(11)).await;
		assert_eq!(recorder.closed(), vec!["farequote"]);

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(recorder.closed().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_in_use_is_retried_once_after_backoff() {
		let recorder = Arc::new(Recorder::default());
		recorder.in_use_failures.store(1, Ordering::SeqCst);
		let timeouts = manager(&recorder, Duration::from_secs(30));

		timeouts.start_timeout("farequote", secs(1));
		tokio::time::sleep(Duration::from_secs(2)).await;
		assert!(recorder.closed().is_empty());

		tokio::time::sleep(Duration::from_secs(30)).await;
		assert_eq!(recorder.closed(), vec!["farequote"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retry_gives_up_after_second_conflict() {
		let recorder = Arc::new(Recorder::default());
		recorder.in_use_failures.store(2, Ordering::SeqCst);
		let timeouts = manager(&recorder, Duration::from_secs(30));

		timeouts.start_timeout("farequote", secs(1));
		tokio::time::sleep(Duration::from_secs(120)).await;

		assert!(recorder.closed().is_empty());
		assert_eq!(recorder.in_use_failures.load(Ordering::SeqCst), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_closes_every_tracked_job() {
		let recorder = Arc::new(Recorder::default());
		let timeouts = manager(&recorder, Duration::from_secs(30));

		timeouts.start_timeout("long", secs(3600));
		timeouts.start_timeout("zero", secs(0));
		timeouts.start_timeout("negative", secs(-1));

		timeouts.shutdown().await;

		let mut closed = recorder.closed();
		closed.sort();
		assert_eq!(closed, vec!["long", "negative", "zero"]);

		timeouts.start_timeout("late", secs(1));
		assert!(!timeouts.is_tracking("late"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_waits_for_retrying_close() {
		let recorder = Arc::new(Recorder::default());
		recorder.in_use_failures.store(1, Ordering::SeqCst);
		let timeouts = manager(&recorder, Duration::from_secs(30));

		timeouts.start_timeout("farequote", secs(0));
		timeouts.shutdown().await;

		assert_eq!(recorder.closed(), vec!["farequote"]);
	}
}
