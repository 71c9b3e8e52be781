/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod handle;
mod output;
mod service;

use std::fmt;
use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::AsyncWrite;
use tokio::task::JoinSet;
use tokio_util::sync::PollSemaphore;
use tracing::Instrument;

use self::handle::{abort_upload, complete_upload, Finisher};
use self::service::upload_part;
use crate::backend::SharedBackend;
use crate::config::Config;
use crate::error::{self, Error};
use crate::middleware::retry::{send_with_retry, RetryPolicy};
use crate::operation::TransferContext;
use crate::types::{CompletedPart, ObjectHeaders};

/// Result of a completed upload
pub use self::output::UploadOutput;

/// Maximum number of parts in a multipart upload
const MAX_PARTS: i32 = 10_000;

/// Object and multipart upload an upload operates on
#[derive(Debug)]
pub(crate) struct UploadState {
    pub(crate) bucket: String,
    pub(crate) key: String,
    pub(crate) upload_id: String,
}

/// Internal context used to drive a single upload
pub(crate) type UploadContext = TransferContext<UploadState>;

enum WriteState {
    /// Accepting writes
    Open,
    /// Waiting for the remaining parts and the completion request
    Closing(BoxFuture<'static, Result<UploadOutput, Error>>),
    /// Completed, failed to complete, or aborted
    Closed,
}

/// Streams an object into a bucket as a multipart upload.
///
/// Bytes written through [`AsyncWrite`] are collected into parts of `part_size` bytes; each
/// full part is uploaded in the background while writing continues. At most `concurrency`
/// parts are uploading at once, after which writes wait for a part to finish.
///
/// The object only becomes visible once [`close`](Putter::close) (or
/// [`shutdown`](tokio::io::AsyncWriteExt::shutdown)) has uploaded the last part and completed
/// the upload. If any part fails, the upload is aborted and the error is returned from the
/// next write and from `close`.
///
/// Dropping a `Putter` that was not closed cancels the upload and aborts it in the background.
pub struct Putter {
    ctx: UploadContext,
    part: BytesMut,
    part_size: usize,
    /// Part number of the part being filled
    part_number: i32,
    digest: md5::Context,
    bytes_written: u64,
    permits: PollSemaphore,
    tasks: JoinSet<Result<CompletedPart, Error>>,
    state: WriteState,
}

impl Putter {
    /// Start a multipart upload for `key`
    #[tracing::instrument(skip(backend, config, headers), level = "debug", name = "open-upload")]
    pub(crate) async fn open(
        backend: SharedBackend,
        config: Config,
        bucket: &str,
        key: &str,
        headers: ObjectHeaders,
    ) -> Result<Self, Error> {
        let part_size = usize::try_from(config.part_size()).map_err(error::invalid_input)?;

        let policy = RetryPolicy::new(config.max_retries(), config.retry_backoff());
        let (client, headers) = (&backend, &headers);
        let upload_id = send_with_retry(policy, (), |()| async move {
            client.create_multipart_upload(bucket, key, headers).await
        })
        .instrument(tracing::debug_span!("send-create-multipart-upload"))
        .await?;
        tracing::debug!(upload_id = %upload_id, "started multipart upload");

        let ctx = UploadContext::new(
            backend,
            config,
            UploadState {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                upload_id,
            },
        );
        let permits = PollSemaphore::new(ctx.scheduler().semaphore());

        Ok(Self {
            ctx,
            part: BytesMut::with_capacity(part_size),
            part_size,
            part_number: 1,
            digest: md5::Context::new(),
            bytes_written: 0,
            permits,
            tasks: JoinSet::new(),
            state: WriteState::Open,
        })
    }

    /// Id of the multipart upload
    pub fn upload_id(&self) -> &str {
        &self.ctx.state().upload_id
    }

    /// Number of bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Upload the remaining data and complete the upload.
    ///
    /// Waits for every part to be stored, then requests completion and, if checksum
    /// verification is enabled, stores the object's digest. If any part failed the upload is
    /// aborted and the first error of the transfer is returned. Closing twice fails with
    /// [`ErrorKind::InputInvalid`](crate::error::ErrorKind::InputInvalid).
    #[tracing::instrument(skip_all, level = "debug", name = "close-upload")]
    pub async fn close(&mut self) -> Result<UploadOutput, Error> {
        if matches!(self.state, WriteState::Closed) {
            return Err(error::invalid_input("upload is already closed"));
        }
        std::future::poll_fn(|cx| self.poll_close(cx)).await
    }

    /// Abort the upload, discarding any parts already stored.
    #[tracing::instrument(skip_all, level = "debug", name = "abort-upload")]
    pub async fn abort(&mut self) -> Result<(), Error> {
        if matches!(self.state, WriteState::Closed) {
            return Err(error::invalid_input("upload is already closed"));
        }
        self.state = WriteState::Closed;
        self.ctx.scheduler().cancel();
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        abort_upload(&self.ctx).await
    }

    fn poll_close(&mut self, cx: &mut Context<'_>) -> Poll<Result<UploadOutput, Error>> {
        if let WriteState::Open = self.state {
            let finisher = Finisher {
                ctx: self.ctx.clone(),
                tasks: mem::take(&mut self.tasks),
                trailing: self.part.split().freeze(),
                part_number: self.part_number,
                digest: self.digest.clone().compute(),
                content_length: self.bytes_written,
            };
            self.state = WriteState::Closing(complete_upload(finisher).boxed());
        }

        match &mut self.state {
            WriteState::Closing(fut) => {
                let result = ready!(fut.poll_unpin(cx));
                self.state = WriteState::Closed;
                Poll::Ready(result)
            }
            _ => Poll::Ready(Err(error::invalid_input("upload is already closed"))),
        }
    }

    /// Wait for a permit and start uploading the full part.
    fn poll_dispatch(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let permit = match ready!(self.permits.poll_acquire(cx)) {
            Some(permit) => permit,
            None => {
                let err = self
                    .ctx
                    .scheduler()
                    .error()
                    .unwrap_or_else(error::operation_cancelled);
                return Poll::Ready(Err(err));
            }
        };

        let part_number = self.part_number;
        let data = self.part.split().freeze();
        tracing::trace!("dispatching part {} (size={})", part_number, data.len());
        self.tasks.spawn(
            upload_part(self.ctx.clone(), part_number, data, permit.into())
                .instrument(tracing::debug_span!("upload-part", part_number)),
        );
        self.part_number += 1;
        self.part.reserve(self.part_size);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for Putter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !matches!(this.state, WriteState::Open) {
            return Poll::Ready(Err(error::invalid_input("write after close").into()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        loop {
            if let Some(err) = this.ctx.scheduler().error() {
                return Poll::Ready(Err(err.into()));
            }

            if this.part.len() == this.part_size {
                ready!(this.poll_dispatch(cx))?;
                continue;
            }

            if this.part_number > MAX_PARTS {
                let err = error::invalid_input(format!(
                    "object exceeds the maximum of {MAX_PARTS} parts of {} bytes",
                    this.part_size
                ));
                this.ctx.scheduler().fail(err.clone());
                return Poll::Ready(Err(err.into()));
            }

            let n = buf.len().min(this.part_size - this.part.len());
            this.part.extend_from_slice(&buf[..n]);
            this.digest.consume(&buf[..n]);
            this.bytes_written += n as u64;
            return Poll::Ready(Ok(n));
        }
    }

    /// Parts are only uploaded once full; flushing does not force a short part out.
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = ready!(self.get_mut().poll_close(cx));
        Poll::Ready(result.map(|_| ()).map_err(io::Error::from))
    }
}

impl Drop for Putter {
    fn drop(&mut self) {
        if matches!(self.state, WriteState::Closed) {
            return;
        }
        self.ctx.scheduler().cancel();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(
                    upload_id = self.upload_id(),
                    "upload dropped before close, aborting"
                );
                let ctx = self.ctx.clone();
                runtime.spawn(async move {
                    if let Err(err) = abort_upload(&ctx).await {
                        tracing::warn!(error = %err, "failed to abort dropped upload");
                    }
                });
            }
            Err(_) => tracing::warn!(
                upload_id = self.upload_id(),
                "upload dropped outside of a runtime, multipart upload left open"
            ),
        }
    }
}

impl fmt::Debug for Putter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            WriteState::Open => "open",
            WriteState::Closing(_) => "closing",
            WriteState::Closed => "closed",
        };
        f.debug_struct("Putter")
            .field("bucket", &self.ctx.state().bucket)
            .field("key", &self.ctx.state().key)
            .field("upload_id", &self.ctx.state().upload_id)
            .field("part_size", &self.part_size)
            .field("part_number", &self.part_number)
            .field("bytes_written", &self.bytes_written)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
