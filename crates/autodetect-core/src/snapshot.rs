// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Model snapshots and the rules for picking one to revert to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted, revertible capture of a job's model state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
	pub job_id: String,
	pub snapshot_id: String,
	pub timestamp: DateTime<Utc>,
	pub description: String,
	/// Higher values are restored first when the analysis process restarts.
	pub restore_priority: i64,
	pub snapshot_doc_count: u64,
	pub latest_record_time: Option<DateTime<Utc>>,
}

/// Selection criteria for `revert_to_snapshot`. Every criterion that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertRequest {
	/// Only snapshots taken at or before this instant qualify.
	pub time: Option<DateTime<Utc>>,
	pub snapshot_id: Option<String>,
	pub description: Option<String>,
}

impl RevertRequest {
	pub fn latest() -> Self {
		Self::default()
	}

	pub fn by_description(description: impl Into<String>) -> Self {
		Self {
			description: Some(description.into()),
			..Self::default()
		}
	}

	pub fn by_snapshot_id(snapshot_id: impl Into<String>) -> Self {
		Self {
			snapshot_id: Some(snapshot_id.into()),
			..Self::default()
		}
	}

	pub fn before(time: DateTime<Utc>) -> Self {
		Self {
			time: Some(time),
			..Self::default()
		}
	}

	pub fn matches(&self, snapshot: &ModelSnapshot) -> bool {
		if let Some(time) = self.time {
			if snapshot.timestamp > time {
				return false;
			}
		}
		if let Some(id) = self.snapshot_id.as_deref().filter(|s| !s.is_empty()) {
			if snapshot.snapshot_id != id {
				return false;
			}
		}
		if let Some(description) = self.description.as_deref().filter(|s| !s.is_empty()) {
			if snapshot.description != description {
				return false;
			}
		}
		true
	}

	/// Most recent snapshot satisfying the request.
	pub fn select<'a>(&self, snapshots: &'a [ModelSnapshot]) -> Option<&'a ModelSnapshot> {
		snapshots
			.iter()
			.filter(|s| self.matches(s))
			.max_by_key(|s| s.timestamp)
	}
}

/// Priority that places a snapshot ahead of every snapshot in `snapshots`.
pub fn next_restore_priority(snapshots: &[ModelSnapshot]) -> i64 {
	snapshots
		.iter()
		.map(|s| s.restore_priority)
		.max()
		.map_or(1, |max| max + 1)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn snapshot(id: &str, secs: i64, description: &str, priority: i64) -> ModelSnapshot {
		ModelSnapshot {
			job_id: "farequote".to_string(),
			snapshot_id: id.to_string(),
			timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
			description: description.to_string(),
			restore_priority: priority,
			snapshot_doc_count: 1,
			latest_record_time: None,
		}
	}

	fn snapshots() -> Vec<ModelSnapshot> {
		vec![
			snapshot("a", 100, "nightly", 1),
			snapshot("b", 200, "before upgrade", 2),
			snapshot("c", 300, "nightly", 3),
		]
	}

	#[test]
	fn test_latest_picks_most_recent() {
		let snapshots = snapshots();
		assert_eq!(RevertRequest::latest().select(&snapshots).unwrap().snapshot_id, "c");
	}

	#[test]
	fn test_time_bound_excludes_newer_snapshots() {
		let snapshots = snapshots();
		let request = RevertRequest::before(Utc.timestamp_opt(250, 0).unwrap());
		assert_eq!(request.select(&snapshots).unwrap().snapshot_id, "b");
	}

	#[test]
	fn test_description_picks_most_recent_match() {
		let snapshots = snapshots();
		let request = RevertRequest::by_description("nightly");
		assert_eq!(request.select(&snapshots).unwrap().snapshot_id, "c");
	}

	#[test]
	fn test_criteria_combine() {
		let snapshots = snapshots();
		let request = RevertRequest {
			time: Some(Utc.timestamp_opt(250, 0).unwrap()),
			snapshot_id: None,
			description: Some("nightly".to_string()),
		};
		assert_eq!(request.select(&snapshots).unwrap().snapshot_id, "a");
		assert!(RevertRequest::by_snapshot_id("zzz").select(&snapshots).is_none());
	}

	#[test]
	fn test_next_restore_priority() {
		assert_eq!(next_restore_priority(&snapshots()), 4);
		assert_eq!(next_restore_priority(&[]), 1);
	}
}
