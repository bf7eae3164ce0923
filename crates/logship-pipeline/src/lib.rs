// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline orchestration: wires the buffer, consumers, sink and alert
//! scheduler together behind one start/stop lifecycle.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineHandle, PipelineStatus, RuleFactory};
