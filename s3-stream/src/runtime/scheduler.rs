/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::{Arc, OnceLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{self, Error};

/// Manages scheduling the parts of a single transfer
///
/// Bounds the number of parts that hold a work permit at once, records the first fatal
/// error of the transfer, and cancels all outstanding work once that error is recorded or
/// the transfer is closed.
///
/// Scheduler is internally reference-counted and can be freely cloned.
#[derive(Debug, Clone)]
pub(crate) struct Scheduler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    error: OnceLock<Error>,
}

impl Scheduler {
    /// Create a new scheduler with the given number of work permits.
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(permits)),
                cancel: CancellationToken::new(),
                error: OnceLock::new(),
            }),
        }
    }

    /// Acquire a permit to perform some unit of work
    ///
    /// Fails once the transfer is cancelled, whether or not a permit was free.
    pub(crate) async fn acquire_permit(&self) -> Result<OwnedWorkPermit, Error> {
        let permits = self.inner.permits.clone();
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(error::operation_cancelled()),
            permit = permits.acquire_owned() => permit
                .map(OwnedWorkPermit::from)
                .map_err(|_| error::operation_cancelled()),
        }
    }

    /// Record a fatal error and cancel the transfer.
    ///
    /// Only the first error is kept. Returns `true` if `err` was the one recorded.
    pub(crate) fn fail(&self, err: Error) -> bool {
        let mut recorded = false;
        let first = self.inner.error.get_or_init(|| {
            recorded = true;
            err
        });
        if recorded {
            tracing::error!(error = %first, "transfer failed");
        }
        self.cancel();
        recorded
    }

    /// The first fatal error recorded for this transfer, if any
    pub(crate) fn error(&self) -> Option<Error> {
        self.inner.error.get().cloned()
    }

    /// Stop scheduling new work and signal in-flight work to stop
    pub(crate) fn cancel(&self) {
        self.inner.cancel.cancel();
        self.inner.permits.close();
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// The semaphore permits are drawn from, for callers that poll for permits
    pub(crate) fn semaphore(&self) -> Arc<Semaphore> {
        self.inner.permits.clone()
    }
}

/// An owned permit from the scheduler to perform some unit of work.
#[must_use]
#[clippy::has_significant_drop]
#[derive(Debug)]
pub(crate) struct OwnedWorkPermit {
    _inner: OwnedSemaphorePermit,
}

impl From<OwnedSemaphorePermit> for OwnedWorkPermit {
    fn from(value: OwnedSemaphorePermit) -> Self {
        Self { _inner: value }
    }
}

#[cfg(test)]
mod tests {
    use super::Scheduler;
    use crate::error::{self, ErrorKind};

    #[tokio::test]
    async fn test_acquire_bounded() {
        let scheduler = Scheduler::new(1);
        let p1 = scheduler.acquire_permit().await.unwrap();
        let scheduler2 = scheduler.clone();
        let jh = tokio::spawn(async move {
            let _p2 = scheduler2.acquire_permit().await.unwrap();
        });
        tokio::task::yield_now().await;
        assert!(!jh.is_finished());
        drop(p1);
        jh.await.unwrap();
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let scheduler = Scheduler::new(2);
        assert!(scheduler.fail(error::protocol("first")));
        assert!(!scheduler.fail(error::integrity("second")));

        let err = scheduler.error().unwrap();
        assert_eq!(&ErrorKind::Protocol, err.kind());
        assert!(scheduler.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let scheduler = Scheduler::new(1);
        let _p1 = scheduler.acquire_permit().await.unwrap();
        let scheduler2 = scheduler.clone();
        let jh = tokio::spawn(async move { scheduler2.acquire_permit().await });
        scheduler.cancel();
        let err = jh.await.unwrap().unwrap_err();
        assert_eq!(&ErrorKind::OperationCancelled, err.kind());
        assert!(scheduler.error().is_none());
    }
}
