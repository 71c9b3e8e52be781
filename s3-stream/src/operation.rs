/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use crate::backend::SharedBackend;
use crate::config::Config;
use crate::middleware::retry::RetryPolicy;
use crate::runtime::scheduler::Scheduler;

/// Types for streaming an object out of a bucket
pub mod download;

/// Types for streaming an object into a bucket
pub mod upload;

/// Container for maintaining context required to carry out a single operation/transfer.
///
/// `State` is whatever additional operation specific state is required for the operation.
#[derive(Debug)]
pub(crate) struct TransferContext<State> {
    backend: SharedBackend,
    config: Arc<Config>,
    scheduler: Scheduler,
    state: Arc<State>,
}

impl<State> TransferContext<State> {
    pub(crate) fn new(backend: SharedBackend, config: Config, state: State) -> Self {
        let scheduler = Scheduler::new(config.concurrency());
        Self {
            backend,
            config: Arc::new(config),
            scheduler,
            state: Arc::new(state),
        }
    }

    /// The backend to send requests with
    pub(crate) fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// The configuration snapshot this transfer was started with
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn state(&self) -> &State {
        &self.state
    }

    /// A fresh retry policy for a single request of this transfer
    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_retries(), self.config.retry_backoff())
            .with_cancellation(self.scheduler.cancellation_token().clone())
    }
}

impl<State> Clone for TransferContext<State> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
            state: self.state.clone(),
        }
    }
}
