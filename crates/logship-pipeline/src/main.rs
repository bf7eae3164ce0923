// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::time::Duration;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logship_pipeline::{Pipeline, PipelineConfig, PipelineStatus};

#[tokio::main]
pub async fn main() {
    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return;
        }
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level)
                .expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("logging subsystem enabled");

    let handle = match Pipeline::new(config).start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start pipeline: {e}");
            return;
        }
    };
    info!("pipeline started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown signal received");

    let mut status_rx = handle.status_receiver();
    if let Err(e) = handle.stop().await {
        error!("failed to stop pipeline: {e}");
        return;
    }

    // Wait for the final flush and buffer stop, bounded.
    let stopped = tokio::time::timeout(Duration::from_secs(10), async {
        while let Ok(status) = status_rx.recv().await {
            if status == PipelineStatus::Stopped {
                return true;
            }
        }
        false
    })
    .await;
    match stopped {
        Ok(true) => info!("pipeline stopped"),
        _ => error!("pipeline did not stop cleanly within the timeout"),
    }
}
