// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Default real-time polling frequency derived from a job's bucket span.

use crate::error::{JobError, Result};

const SECONDS_IN_MINUTE: i64 = 60;
const TWO_MINUTES_SECS: i64 = 2 * SECONDS_IN_MINUTE;
const TWENTY_MINUTES_SECS: i64 = 20 * SECONDS_IN_MINUTE;
const HALF_DAY_SECS: i64 = 12 * 60 * SECONDS_IN_MINUTE;

const ONE_MINUTE_SECS: u64 = 60;
const TEN_MINUTES_SECS: u64 = 600;
const ONE_HOUR_SECS: u64 = 3600;

/// Polling frequency in seconds for a bucket span in seconds.
///
/// | bucket span      | frequency       |
/// |------------------|-----------------|
/// | `<= 2m`          | 1 minute        |
/// | `<= 20m`         | half the span   |
/// | `<= 12h`         | 10 minutes      |
/// | `> 12h`          | 1 hour          |
pub fn default_frequency_secs(bucket_span_secs: i64) -> Result<u64> {
	if bucket_span_secs < 0 {
		return Err(JobError::JobConfiguration(format!(
			"bucket span must not be negative, got {bucket_span_secs}"
		)));
	}

	let frequency = if bucket_span_secs <= TWO_MINUTES_SECS {
		ONE_MINUTE_SECS
	} else if bucket_span_secs <= TWENTY_MINUTES_SECS {
		(bucket_span_secs / 2) as u64
	} else if bucket_span_secs <= HALF_DAY_SECS {
		TEN_MINUTES_SECS
	} else {
		ONE_HOUR_SECS
	};
	Ok(frequency)
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_short_spans_clamp_to_one_minute() {
		assert_eq!(default_frequency_secs(0).unwrap(), 60);
		assert_eq!(default_frequency_secs(1).unwrap(), 60);
		assert_eq!(default_frequency_secs(60).unwrap(), 60);
		assert_eq!(default_frequency_secs(120).unwrap(), 60);
	}

	#[test]
	fn test_mid_spans_use_half_the_span() {
		assert_eq!(default_frequency_secs(121).unwrap(), 60);
		assert_eq!(default_frequency_secs(300).unwrap(), 150);
		assert_eq!(default_frequency_secs(1000).unwrap(), 500);
		assert_eq!(default_frequency_secs(1200).unwrap(), 600);
	}

	#[test]
	fn test_long_spans_clamp_to_coarse_values() {
		assert_eq!(default_frequency_secs(1201).unwrap(), 600);
		assert_eq!(default_frequency_secs(3600).unwrap(), 600);
		assert_eq!(default_frequency_secs(43_200).unwrap(), 600);
		assert_eq!(default_frequency_secs(43_201).unwrap(), 3600);
		assert_eq!(default_frequency_secs(86_400 * 7).unwrap(), 3600);
	}

	#[test]
	fn test_negative_span_is_rejected() {
		let err = default_frequency_secs(-1).unwrap_err();
		assert!(matches!(err, JobError::JobConfiguration(_)));
	}

	proptest! {
		#[test]
		fn frequency_is_monotonic(a in 0i64..200_000, b in 0i64..200_000) {
			let (low, high) = if a <= b { (a, b) } else { (b, a) };
			prop_assert!(default_frequency_secs(low).unwrap() <= default_frequency_secs(high).unwrap());
		}

		#[test]
		fn frequency_stays_within_bounds(span in 0i64..10_000_000) {
			let frequency = default_frequency_secs(span).unwrap();
			prop_assert!((60..=3600).contains(&frequency));
		}
	}
}
