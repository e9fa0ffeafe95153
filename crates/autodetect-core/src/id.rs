// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job identifier generation and validation.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{JobError, Result};

pub const MAX_JOB_ID_LENGTH: usize = 64;

/// Generates ids of the form `yyyyMMddHHmmss-NNNNN[-host]`.
///
/// The sequence is process wide, so two ids minted in the same second by the
/// same factory never collide. The optional host suffix separates ids minted by
/// different engines sharing one store.
#[derive(Debug, Default)]
pub struct JobIdFactory {
	sequence: AtomicU64,
	host_suffix: Option<String>,
}

impl JobIdFactory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_host(host: &str) -> Self {
		let suffix = sanitize(host);
		Self {
			sequence: AtomicU64::new(0),
			host_suffix: (!suffix.is_empty()).then_some(suffix),
		}
	}

	pub fn next_id(&self, now: DateTime<Utc>) -> String {
		let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
		let mut id = format!("{}-{:05}", now.format("%Y%m%d%H%M%S"), sequence);
		if let Some(suffix) = &self.host_suffix {
			id.push('-');
			id.push_str(suffix);
		}
		id.truncate(MAX_JOB_ID_LENGTH);
		while id.ends_with('-') {
			id.pop();
		}
		id
	}
}

fn sanitize(host: &str) -> String {
	host.chars()
		.map(|c| c.to_ascii_lowercase())
		.filter(|c| is_id_char(*c))
		.collect()
}

fn is_id_char(c: char) -> bool {
	c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}

/// Check a caller supplied id.
pub fn validate_job_id(id: &str) -> Result<()> {
	if id.is_empty() {
		return Err(JobError::JobConfiguration("job id must not be empty".to_string()));
	}
	if id.len() > MAX_JOB_ID_LENGTH {
		return Err(JobError::JobConfiguration(format!(
			"job id '{id}' exceeds the maximum length of {MAX_JOB_ID_LENGTH} characters"
		)));
	}
	if !id.chars().all(is_id_char) {
		return Err(JobError::JobConfiguration(format!(
			"job id '{id}' may only contain lowercase alphanumeric characters, '-' and '_'"
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use proptest::prelude::*;
	use std::collections::HashSet;

	fn at() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2016, 3, 14, 9, 26, 53).unwrap()
	}

	#[test]
	fn test_id_format() {
		let factory = JobIdFactory::new();
		assert_eq!(factory.next_id(at()), "20160314092653-00001");
		assert_eq!(factory.next_id(at()), "20160314092653-00002");
	}

	#[test]
	fn test_host_suffix_is_sanitized() {
		let factory = JobIdFactory::with_host("Prod.Engine-01");
		assert_eq!(factory.next_id(at()), "20160314092653-00001-prodengine-01");
	}

	#[test]
	fn test_long_host_is_truncated() {
		let factory = JobIdFactory::with_host(&"h".repeat(200));
		let id = factory.next_id(at());
		assert_eq!(id.len(), MAX_JOB_ID_LENGTH);
		assert!(validate_job_id(&id).is_ok());
	}

	#[test]
	fn test_ids_are_unique_within_a_second() {
		let factory = JobIdFactory::new();
		let ids: HashSet<_> = (0..1000).map(|_| factory.next_id(at())).collect();
		assert_eq!(ids.len(), 1000);
	}

	#[test]
	fn test_validate_rejects_bad_ids() {
		assert!(validate_job_id("").is_err());
		assert!(validate_job_id("Farequote").is_err());
		assert!(validate_job_id("fare quote").is_err());
		assert!(validate_job_id(&"a".repeat(65)).is_err());
		assert!(validate_job_id("fare_quote-2").is_ok());
	}

	proptest! {
		#[test]
		fn generated_ids_are_valid(host in "[A-Za-z0-9.-]{0,80}") {
			let factory = JobIdFactory::with_host(&host);
			let id = factory.next_id(at());
			prop_assert!(validate_job_id(&id).is_ok());
		}
	}
}
