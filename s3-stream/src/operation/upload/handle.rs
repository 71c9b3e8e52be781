/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use bytes::Bytes;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::service::upload_part;
use super::{UploadContext, UploadOutput};
use crate::backend::CompleteMultipartUploadRequest;
use crate::checksum;
use crate::error::Error;
use crate::middleware::retry::{send_with_retry, RetryPolicy};
use crate::types::CompletedPart;

/// Everything a writer hands over when it is closed
#[derive(Debug)]
pub(super) struct Finisher {
    pub(super) ctx: UploadContext,
    pub(super) tasks: JoinSet<Result<CompletedPart, Error>>,
    /// Content of the last, possibly short, part
    pub(super) trailing: Bytes,
    /// Part number the trailing part is uploaded as
    pub(super) part_number: i32,
    pub(super) digest: md5::Digest,
    pub(super) content_length: u64,
}

/// Upload the trailing part, wait for every part, then complete the multipart upload.
///
/// If any part failed the upload is aborted instead and the first error of the transfer is
/// returned; completion is never requested for a partial set of parts.
pub(super) async fn complete_upload(finisher: Finisher) -> Result<UploadOutput, Error> {
    let Finisher {
        ctx,
        mut tasks,
        trailing,
        part_number,
        digest,
        content_length,
    } = finisher;

    // An empty object is still uploaded as a single empty part.
    if ctx.scheduler().error().is_none() && (!trailing.is_empty() || part_number == 1) {
        match ctx.scheduler().acquire_permit().await {
            Ok(permit) => {
                tasks.spawn(
                    upload_part(ctx.clone(), part_number, trailing, permit)
                        .instrument(tracing::debug_span!("upload-part", part_number)),
                );
            }
            Err(err) => {
                ctx.scheduler().fail(err);
            }
        }
    }

    let mut parts = Vec::with_capacity(tasks.len());
    while let Some(join_result) = tasks.join_next().await {
        match join_result {
            Ok(Ok(part)) => parts.push(part),
            Ok(Err(err)) => {
                ctx.scheduler().fail(err);
            }
            Err(err) => {
                ctx.scheduler().fail(err.into());
            }
        }
    }

    if let Some(err) = ctx.scheduler().error() {
        tracing::error!("multipart upload failed, aborting");
        if let Err(abort_err) = abort_upload(&ctx).await {
            tracing::warn!(error = %abort_err, "failed to abort upload");
        }
        return Err(err);
    }

    tracing::trace!("completing multipart upload");

    // parts must be sorted
    parts.sort_by_key(|p| p.part_number);
    let part_count = parts.len();
    let state = ctx.state();
    let request = CompleteMultipartUploadRequest {
        bucket: state.bucket.clone(),
        key: state.key.clone(),
        upload_id: state.upload_id.clone(),
        parts,
    };
    let completed = send_with_retry(ctx.retry_policy(), request, |req| {
        let backend = ctx.backend().clone();
        async move { backend.complete_multipart_upload(req).await }
    })
    .await;

    let completed = match completed {
        Ok(completed) => completed,
        Err(err) => {
            ctx.scheduler().fail(err.clone());
            tracing::error!("failed to complete multipart upload, aborting");
            if let Err(abort_err) = abort_upload(&ctx).await {
                tracing::warn!(error = %abort_err, "failed to abort upload");
            }
            return Err(err);
        }
    };

    let md5 = checksum::to_hex(digest);
    if ctx.config().verify_checksum() {
        checksum::store_digest(
            ctx.backend(),
            &state.bucket,
            &state.key,
            &md5,
            ctx.retry_policy(),
        )
        .instrument(tracing::debug_span!("store-digest"))
        .await?;
    }

    tracing::trace!("upload completed successfully");
    Ok(UploadOutput {
        upload_id: state.upload_id.clone(),
        e_tag: completed.e_tag,
        version_id: completed.version_id,
        content_length,
        part_count,
        md5,
    })
}

/// Abort the multipart upload, discarding any parts already stored.
///
/// Runs even after the transfer has been cancelled.
pub(super) async fn abort_upload(ctx: &UploadContext) -> Result<(), Error> {
    let state = ctx.state();
    let policy = RetryPolicy::new(ctx.config().max_retries(), ctx.config().retry_backoff());
    send_with_retry(policy, (), |()| async move {
        ctx.backend()
            .abort_multipart_upload(&state.bucket, &state.key, &state.upload_id)
            .await
    })
    .instrument(tracing::debug_span!("send-abort-multipart-upload"))
    .await?;
    tracing::debug!(upload_id = %state.upload_id, "aborted multipart upload");
    Ok(())
}
