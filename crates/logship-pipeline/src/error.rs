// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

use logship_buffer::BufferError;
use logship_consumer::ConsumerError;

/// Errors that can occur when assembling or running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("runtime error: {0}")]
    Runtime(String),
}
