// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parameters passed through to the analysis process.

use serde::{Deserialize, Serialize};

/// Epoch-millisecond window, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
	pub start_ms: i64,
	pub end_ms: i64,
}

impl TimeRange {
	pub fn new(start_ms: i64, end_ms: i64) -> Self {
		Self { start_ms, end_ms }
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLoadParams {
	/// Persist model state once the upload completes.
	pub persist: bool,
	pub ignore_downtime: bool,
	/// Results in this window are discarded before the upload is analysed.
	pub reset_range: Option<TimeRange>,
}

impl DataLoadParams {
	pub fn new(persist: bool) -> Self {
		Self {
			persist,
			..Self::default()
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterimResultsParams {
	pub calc_interim: bool,
	pub range: Option<TimeRange>,
	/// Move the analysis clock forward to this epoch second.
	pub advance_time_secs: Option<i64>,
}

impl InterimResultsParams {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn calc_interim(mut self, calc: bool) -> Self {
		self.calc_interim = calc;
		self
	}

	pub fn range(mut self, range: TimeRange) -> Self {
		self.range = Some(range);
		self
	}

	pub fn advance_time(mut self, epoch_secs: i64) -> Self {
		self.advance_time_secs = Some(epoch_secs);
		self
	}

	pub fn should_advance_time(&self) -> bool {
		self.advance_time_secs.is_some()
	}
}
