/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use tracing::Instrument;

use super::object_meta::ObjectMetadata;
use crate::backend::SharedBackend;
use crate::error::{self, ErrorKind};
use crate::middleware::retry::{send_with_retry, RetryPolicy};

/// Discover the length and entity tag of an object with a `HeadObject` request.
///
/// A missing object is reported as [`ErrorKind::NotFound`]; any other failure as
/// [`ErrorKind::ObjectNotDiscoverable`].
pub(super) async fn discover_obj(
    backend: &SharedBackend,
    bucket: &str,
    key: &str,
    policy: RetryPolicy,
) -> Result<ObjectMetadata, error::Error> {
    let resp = send_with_retry(policy, (), |()| async move {
        backend.head_object(bucket, key).await
    })
    .instrument(tracing::debug_span!("discover-object"))
    .await;

    match resp {
        Ok(meta) => {
            tracing::trace!(
                content_length = meta.content_length,
                e_tag = ?meta.e_tag,
                "discovered object"
            );
            Ok(meta)
        }
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::InputInvalid) => Err(err),
        Err(err) => Err(error::discovery_failed(err)),
    }
}
