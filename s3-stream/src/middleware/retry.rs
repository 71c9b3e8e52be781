/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower::{service_fn, ServiceBuilder, ServiceExt};

use crate::error::Error;

/// Upper bound on the delay between two attempts of the same request
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// A `tower::retry::Policy` implementation for retrying requests
///
/// Only [transient](crate::error::Error::is_retryable) failures are retried, at most
/// `max_retries` times, with an exponentially growing delay between attempts. Retrying stops
/// as soon as the owning transfer is cancelled.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    remaining_attempts: usize,
    max_retries: usize,
    base_backoff: Duration,
    cancel: Option<CancellationToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_RETRIES, crate::DEFAULT_RETRY_BACKOFF)
    }
}

impl RetryPolicy {
    pub(crate) fn new(max_retries: usize, base_backoff: Duration) -> Self {
        Self {
            remaining_attempts: max_retries,
            max_retries,
            base_backoff,
            cancel: None,
        }
    }

    /// Stop retrying once `token` is cancelled
    pub(crate) fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn backoff(&self) -> Duration {
        let attempt = (self.max_retries - self.remaining_attempts).min(16) as u32;
        self.base_backoff
            .saturating_mul(1 << attempt)
            .min(MAX_BACKOFF)
    }
}

impl<Req, Res> tower::retry::Policy<Req, Res, Error> for RetryPolicy
where
    Req: Clone,
{
    type Future = tokio::time::Sleep;

    fn retry(&mut self, _req: &mut Req, result: &mut Result<Res, Error>) -> Option<Self::Future> {
        let err = result.as_ref().err()?;
        if !err.is_retryable() || self.remaining_attempts == 0 {
            return None;
        }
        if self.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            return None;
        }

        let delay = self.backoff();
        self.remaining_attempts -= 1;
        tracing::debug!(
            error = %err,
            remaining_attempts = self.remaining_attempts,
            "retrying after {:?}",
            delay
        );
        Some(tokio::time::sleep(delay))
    }

    fn clone_request(&mut self, req: &Req) -> Option<Req> {
        Some(req.clone())
    }
}

/// Send `req` through `handler`, re-issuing it according to `policy`.
pub(crate) async fn send_with_retry<Req, Res, F, Fut>(
    policy: RetryPolicy,
    req: Req,
    handler: F,
) -> Result<Res, Error>
where
    Req: Clone,
    F: Fn(Req) -> Fut + Clone,
    Fut: Future<Output = Result<Res, Error>>,
{
    ServiceBuilder::new()
        .retry(policy)
        .service(service_fn(handler))
        .oneshot(req)
        .await
}
