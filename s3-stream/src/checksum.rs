/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The whole-object digest is the lowercase hex MD5 of the object's content. It is stored as a
//! plain text side-object in the same bucket under [`DIGEST_PREFIX`], written when an upload
//! completes and read back to verify a download.

use bytes::Bytes;

use crate::backend::{GetObjectRequest, PutObjectRequest, SharedBackend};
use crate::error::{self, Error, ErrorKind};
use crate::middleware::retry::{send_with_retry, RetryPolicy};
use crate::types::ObjectHeaders;

/// Key prefix under which digest side-objects are stored
pub const DIGEST_PREFIX: &str = ".md5/";

/// The key of the digest side-object for `key`
pub fn digest_key(key: &str) -> String {
    format!("{DIGEST_PREFIX}{key}.md5")
}

/// Base64 encoded MD5 of `data`, as sent in a `Content-MD5` header
pub(crate) fn content_md5(data: &[u8]) -> String {
    aws_smithy_types::base64::encode(md5::compute(data).0)
}

/// Lowercase hex encoding of a digest
pub(crate) fn to_hex(digest: md5::Digest) -> String {
    format!("{digest:x}")
}

/// Fetch the stored digest for `key`.
///
/// Returns `None` when no digest side-object exists.
pub(crate) async fn load_digest(
    backend: SharedBackend,
    bucket: String,
    key: String,
    policy: RetryPolicy,
) -> Result<Option<String>, Error> {
    let req = GetObjectRequest {
        bucket,
        key: digest_key(&key),
        range: None,
        if_match: None,
    };
    let resp = send_with_retry(policy, req, move |req| {
        let backend = backend.clone();
        async move { backend.get_object(req).await }
    })
    .await;

    match resp {
        Ok(resp) => {
            let text = String::from_utf8(resp.data.to_vec())
                .map_err(|_| error::integrity("stored digest is not valid UTF-8"))?;
            Ok(Some(text.trim().to_ascii_lowercase()))
        }
        Err(err) if err.kind() == &ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Store `digest` as the digest side-object of `key`
pub(crate) async fn store_digest(
    backend: &SharedBackend,
    bucket: &str,
    key: &str,
    digest: &str,
    policy: RetryPolicy,
) -> Result<(), Error> {
    let data = Bytes::from(digest.to_owned());
    let req = PutObjectRequest {
        bucket: bucket.to_owned(),
        key: digest_key(key),
        content_md5: Some(content_md5(&data)),
        data,
        headers: ObjectHeaders::new().content_type("text/plain"),
    };
    let resp = send_with_retry(policy, req, |req| {
        let backend = backend.clone();
        async move { backend.put_object(req).await }
    })
    .await?;
    tracing::debug!(key = %digest_key(key), e_tag = ?resp.e_tag, "stored object digest");
    Ok(())
}
