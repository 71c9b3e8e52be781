/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use bytes::Bytes;

use super::UploadContext;
use crate::backend::UploadPartRequest;
use crate::checksum;
use crate::error::{self, ChunkId};
use crate::middleware::retry::send_with_retry;
use crate::runtime::scheduler::OwnedWorkPermit;
use crate::types::CompletedPart;

/// Upload one part and pair its number with the returned entity tag.
async fn upload_part_handler(
    ctx: UploadContext,
    request: UploadPartRequest,
) -> Result<CompletedPart, error::Error> {
    let part_number = request.part_number;
    let e_tag = ctx.backend().upload_part(request).await?;
    tracing::trace!("completed upload of part number {}", part_number);
    Ok(CompletedPart { part_number, e_tag })
}

/// Upload a single part, retrying transient failures.
///
/// Holds `permit` until the part is stored or has failed. A failure is recorded with the
/// scheduler, which cancels the rest of the upload.
pub(super) async fn upload_part(
    ctx: UploadContext,
    part_number: i32,
    data: Bytes,
    permit: OwnedWorkPermit,
) -> Result<CompletedPart, error::Error> {
    let _permit = permit;
    let state = ctx.state();
    let request = UploadPartRequest {
        bucket: state.bucket.clone(),
        key: state.key.clone(),
        upload_id: state.upload_id.clone(),
        part_number,
        content_md5: Some(checksum::content_md5(&data)),
        data,
    };

    let cancel = ctx.scheduler().cancellation_token().clone();
    let svc_ctx = ctx.clone();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(error::operation_cancelled()),
        result = send_with_retry(ctx.retry_policy(), request, move |req| {
            upload_part_handler(svc_ctx.clone(), req)
        }) => result,
    };

    result.map_err(|err| {
        let err = match err.is_retryable() {
            true => error::chunk_failed(ChunkId::Upload(part_number as u64 - 1), err),
            false => err,
        };
        ctx.scheduler().fail(err.clone());
        err
    })
}
