// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

use logship_buffer::BufferError;

/// Errors surfaced by the consumer itself. Per-record problems (parse
/// failures, sink rejections) are dead-lettered instead and never show up
/// here.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("buffer request failed: {0}")]
    Buffer(#[from] BufferError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
