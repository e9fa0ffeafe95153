// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod jobs;
mod logging;

pub use jobs::*;
pub use logging::*;
