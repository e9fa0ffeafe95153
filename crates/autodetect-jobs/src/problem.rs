// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use autodetect_core::messages;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProblemKind {
	Extraction,
	Analysis,
}

/// Tracks scheduler cycle failures so that each distinct problem is audited once
/// and recovery is audited when a cycle succeeds again.
#[derive(Debug, Default)]
pub(crate) struct ProblemTracker {
	previous_problem: Option<String>,
	had_problems: bool,
	has_problems: bool,
}

impl ProblemTracker {
	/// Returns the audit text when this problem differs from the last one reported.
	pub(crate) fn report(&mut self, kind: ProblemKind, problem: &str) -> Option<String> {
		self.has_problems = true;
		if self.previous_problem.as_deref() == Some(problem) {
			return None;
		}
		self.previous_problem = Some(problem.to_string());
		Some(match kind {
			ProblemKind::Extraction => messages::scheduler_extraction_error(problem),
			ProblemKind::Analysis => messages::scheduler_analysis_error(problem),
		})
	}

	/// Close the current cycle. Returns the recovery audit text when the previous
	/// cycle failed and this one did not.
	pub(crate) fn finish_cycle(&mut self) -> Option<&'static str> {
		let recovered = self.had_problems && !self.has_problems;
		self.had_problems = self.has_problems;
		self.has_problems = false;
		if recovered {
			self.previous_problem = None;
			Some(messages::SCHEDULER_RECOVERED)
		} else {
			None
		}
	}
}
