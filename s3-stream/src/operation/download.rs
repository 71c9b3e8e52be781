/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod body;
mod discovery;
mod object_meta;
mod service;

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Buf;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use self::body::{Body, ChunkOutput};
use crate::backend::SharedBackend;
use crate::checksum;
use crate::config::Config;
use crate::error::{self, Error, ErrorKind};
use crate::middleware::retry::RetryPolicy;
use crate::operation::TransferContext;

/// Metadata discovered about the object being downloaded
pub use self::object_meta::ObjectMetadata;

/// Object a download operates on
#[derive(Debug)]
pub(crate) struct DownloadState {
    pub(crate) bucket: String,
    pub(crate) key: String,
    pub(crate) object: ObjectMetadata,
}

/// Shared context used across a single download
pub(crate) type DownloadContext = TransferContext<DownloadState>;

type DigestTask = JoinHandle<Result<Option<String>, Error>>;

#[derive(Debug)]
enum ReadState {
    /// Handing out part data
    Reading,
    /// Every byte has been read; comparing against the stored digest
    Verifying,
    /// End of stream reached and verified (or unverifiable)
    Done,
    /// A fatal error was recorded
    Failed(Error),
    /// `close()` was called; holds its result
    Closed(Result<(), Error>),
}

/// Streams an object out of a bucket.
///
/// The object is fetched as concurrent ranged `GET`s of `part_size` bytes and exposed, in
/// order, through [`AsyncRead`]. At most `concurrency` parts are in flight or waiting to be
/// read at any time.
///
/// When checksum verification is enabled, the bytes read are hashed and compared against the
/// object's stored digest when the end of the stream is reached. A mismatch is returned as an
/// [`ErrorKind::Integrity`] error from that read and from [`close`](Getter::close). An object
/// without a stored digest is read unchecked.
///
/// Dropping a `Getter` cancels any outstanding work.
pub struct Getter {
    ctx: DownloadContext,
    body: Body,
    current: Option<ChunkOutput>,
    part_count: u64,
    bytes_read: u64,
    digest: md5::Context,
    digest_task: Option<DigestTask>,
    tasks: JoinSet<()>,
    state: ReadState,
}

impl Getter {
    /// Discover the object and start fetching its parts
    #[tracing::instrument(skip(backend, config), level = "debug", name = "open-download")]
    pub(crate) async fn open(
        backend: SharedBackend,
        config: Config,
        bucket: &str,
        key: &str,
    ) -> Result<Self, Error> {
        let policy = RetryPolicy::new(config.max_retries(), config.retry_backoff());
        let object = discovery::discover_obj(&backend, bucket, key, policy).await?;
        let part_count = object.part_count(config.part_size());

        let ctx = DownloadContext::new(
            backend,
            config,
            DownloadState {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                object,
            },
        );

        let digest_task = ctx.config().verify_checksum().then(|| {
            tokio::spawn(
                checksum::load_digest(
                    ctx.backend().clone(),
                    bucket.to_owned(),
                    key.to_owned(),
                    ctx.retry_policy(),
                )
                .instrument(tracing::debug_span!("load-digest")),
            )
        });

        let (comp_tx, comp_rx) = mpsc::channel(ctx.config().concurrency());
        let mut tasks = JoinSet::new();
        tasks.spawn(
            service::distribute_work(ctx.clone(), comp_tx)
                .instrument(tracing::debug_span!("distribute-work", part_count)),
        );

        Ok(Self {
            ctx,
            body: Body::new(comp_rx),
            current: None,
            part_count,
            bytes_read: 0,
            digest: md5::Context::new(),
            digest_task,
            tasks,
            state: ReadState::Reading,
        })
    }

    /// Metadata of the object being read
    pub fn object_meta(&self) -> &ObjectMetadata {
        &self.ctx.state().object
    }

    /// Number of bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Stop the download and release its resources.
    ///
    /// Waits for every outstanding part request to stop. Returns the first fatal error of the
    /// transfer, including a checksum mismatch, if there was one. Closing before the end of
    /// the stream is not an error. Calling `close` again returns the same result; reads after
    /// `close` fail with [`ErrorKind::OperationCancelled`].
    #[tracing::instrument(skip_all, level = "debug", name = "close-download")]
    pub async fn close(&mut self) -> Result<(), Error> {
        if let ReadState::Closed(result) = &self.state {
            return result.clone();
        }

        // all content consumed without reading EOF, still verify it
        if matches!(self.state, ReadState::Reading | ReadState::Verifying)
            && self.bytes_read == self.object_meta().content_length
        {
            self.state = ReadState::Verifying;
            std::future::poll_fn(|cx| self.poll_verify(cx)).await;
        }

        let result = match &self.state {
            ReadState::Failed(err) => Err(err.clone()),
            _ => self.ctx.scheduler().error().map_or(Ok(()), Err),
        };

        self.ctx.scheduler().cancel();
        self.body.close();
        self.current = None;
        if let Some(task) = self.digest_task.take() {
            task.abort();
        }
        while let Some(join_result) = self.tasks.join_next().await {
            if let Err(err) = join_result {
                tracing::debug!(error = %err, "download task failed");
            }
        }

        self.state = ReadState::Closed(result.clone());
        result
    }

    fn fail(&mut self, err: Error) {
        let err = self.ctx.scheduler().error().unwrap_or(err);
        self.ctx.scheduler().fail(err.clone());
        self.state = ReadState::Failed(err);
    }

    fn poll_verify(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let Some(task) = self.digest_task.as_mut() else {
            self.state = ReadState::Done;
            return Poll::Ready(());
        };
        let result = ready!(Pin::new(task).poll(cx));
        self.digest_task = None;

        let actual = checksum::to_hex(self.digest.clone().compute());
        match result.map_err(Error::from).and_then(|stored| stored) {
            Ok(Some(expected)) if expected == actual => {
                tracing::debug!(md5 = %actual, "object digest verified");
                self.state = ReadState::Done;
            }
            Ok(Some(expected)) => self.fail(error::integrity(format!(
                "MD5 of downloaded content {actual} does not match stored digest {expected}"
            ))),
            Ok(None) => {
                tracing::debug!("no stored digest, object left unverified");
                self.state = ReadState::Done;
            }
            Err(err) => self.fail(err),
        }
        Poll::Ready(())
    }
}

impl AsyncRead for Getter {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &this.state {
                ReadState::Reading => {}
                ReadState::Verifying => {
                    ready!(this.poll_verify(cx));
                    continue;
                }
                ReadState::Done => return Poll::Ready(Ok(())),
                ReadState::Failed(err) => return Poll::Ready(Err(err.clone().into())),
                ReadState::Closed(_) => {
                    return Poll::Ready(Err(error::operation_cancelled().into()))
                }
            }

            if buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            if let Some(chunk) = this.current.as_mut() {
                if chunk.data.has_remaining() {
                    let src = chunk.data.chunk();
                    let n = src.len().min(buf.remaining());
                    buf.put_slice(&src[..n]);
                    this.digest.consume(&src[..n]);
                    chunk.data.advance(n);
                    this.bytes_read += n as u64;
                    return Poll::Ready(Ok(()));
                }
                // releases the part's permit
                this.current = None;
            }

            if this.body.next_seq() == this.part_count {
                this.state = ReadState::Verifying;
                continue;
            }

            match ready!(this.body.poll_next(cx)) {
                Some(Ok(chunk)) => this.current = Some(chunk),
                Some(Err(err)) => this.fail(err),
                None => this.fail(Error::new(
                    ErrorKind::RuntimeError,
                    "part stream ended before every part was received",
                )),
            }
        }
    }
}

impl Drop for Getter {
    fn drop(&mut self) {
        self.ctx.scheduler().cancel();
        if let Some(task) = self.digest_task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getter")
            .field("bucket", &self.ctx.state().bucket)
            .field("key", &self.ctx.state().key)
            .field("object", self.object_meta())
            .field("part_count", &self.part_count)
            .field("bytes_read", &self.bytes_read)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
