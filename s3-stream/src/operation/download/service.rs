/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::ops::RangeInclusive;

use bytes::Buf;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::body::ChunkOutput;
use super::DownloadContext;
use crate::backend::GetObjectRequest;
use crate::error::{self, ChunkId};
use crate::http::header::ContentRange;
use crate::io::AggregatedBytes;
use crate::middleware::retry::send_with_retry;
use crate::runtime::scheduler::OwnedWorkPermit;

/// A single ranged GET of the object
#[derive(Debug, Clone)]
pub(super) struct ChunkRequest {
    // byte range to download
    pub(super) range: RangeInclusive<u64>,
    // sequence number
    pub(super) seq: u64,
}

impl ChunkRequest {
    /// Size of this chunk request in bytes
    pub(super) fn size(&self) -> u64 {
        self.range.end() - self.range.start() + 1
    }
}

/// Fetch the byte range of one part and check the response matches the request.
async fn download_chunk_handler(
    ctx: DownloadContext,
    request: ChunkRequest,
) -> Result<AggregatedBytes, error::Error> {
    let state = ctx.state();
    let resp = ctx
        .backend()
        .get_object(GetObjectRequest {
            bucket: state.bucket.clone(),
            key: state.key.clone(),
            range: Some(request.range.clone()),
            if_match: state.object.e_tag.clone(),
        })
        .await?;

    let header = resp.content_range.as_deref().ok_or_else(|| {
        error::protocol(format!(
            "response for part {} is missing Content-Range",
            request.seq
        ))
    })?;
    let content_range: ContentRange = header.parse()?;
    if content_range.start != *request.range.start()
        || content_range.end != *request.range.end()
        || content_range
            .total
            .is_some_and(|total| total != state.object.content_length)
    {
        return Err(error::protocol(format!(
            "requested bytes {}-{}/{} for part {} but received `{header}`",
            request.range.start(),
            request.range.end(),
            state.object.content_length,
            request.seq
        )));
    }

    let received = resp.data.remaining() as u64;
    if let Some(declared) = resp.content_length.filter(|len| *len != received) {
        return Err(error::integrity(format!(
            "part {} declared Content-Length {declared} but the body has {received} bytes",
            request.seq
        )));
    }
    if received != request.size() {
        return Err(error::integrity(format!(
            "part {} expected {} bytes but received {received}",
            request.seq,
            request.size()
        )));
    }

    Ok(resp.data)
}

/// Fetch one part and hand it to the reader.
///
/// A failure is recorded with the scheduler before it is sent so the reader always reports
/// the first fatal error of the transfer.
async fn download_chunk(
    ctx: DownloadContext,
    request: ChunkRequest,
    permit: OwnedWorkPermit,
    comp_tx: mpsc::Sender<Result<ChunkOutput, error::Error>>,
) {
    let seq = request.seq;
    let cancel = ctx.scheduler().cancellation_token().clone();
    let svc_ctx = ctx.clone();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::trace!("download cancelled");
            return;
        }
        result = send_with_retry(ctx.retry_policy(), request, move |req| {
            download_chunk_handler(svc_ctx.clone(), req)
        }) => result,
    };

    let output = match result {
        Ok(data) => Ok(ChunkOutput::new(seq, data, Some(permit))),
        Err(err) => {
            let err = match err.is_retryable() {
                true => error::chunk_failed(ChunkId::Download(seq), err),
                false => err,
            };
            ctx.scheduler().fail(err.clone());
            Err(err)
        }
    };

    if comp_tx.send(output).await.is_err() {
        tracing::debug!("chunk send failed, channel closed");
    }
}

/// Partition the object into parts and fetch them.
///
/// Permits are acquired in part order, so the next part the reader needs always holds
/// one. A permit stays with its part until the reader has consumed it, which bounds the parts
/// in flight plus the parts buffered to the transfer's concurrency.
pub(super) async fn distribute_work(
    ctx: DownloadContext,
    comp_tx: mpsc::Sender<Result<ChunkOutput, error::Error>>,
) {
    let object_len = ctx.state().object.content_length;
    let part_size = ctx.config().part_size();
    let mut workers = JoinSet::new();
    let mut pos = 0;
    let mut seq = 0;

    while pos < object_len {
        let permit = match ctx.scheduler().acquire_permit().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::trace!("transfer cancelled, no more parts will be scheduled");
                break;
            }
        };

        let end_inclusive = cmp::min(pos.saturating_add(part_size), object_len) - 1;
        let request = ChunkRequest {
            range: pos..=end_inclusive,
            seq,
        };
        tracing::trace!(
            "distributing chunk(size={}): {:?}",
            request.size(),
            request
        );

        let task = download_chunk(ctx.clone(), request, permit, comp_tx.clone())
            .instrument(tracing::debug_span!("download-chunk", seq = seq));
        workers.spawn(task);

        seq += 1;
        pos = end_inclusive + 1;
    }
    drop(comp_tx);
    tracing::trace!("work fully distributed");

    while let Some(join_result) = workers.join_next().await {
        if let Err(err) = join_result {
            if err.is_panic() {
                ctx.scheduler().fail(err.into());
            }
        }
    }
}
