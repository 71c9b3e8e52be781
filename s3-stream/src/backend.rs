/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::ops::{Deref, RangeInclusive};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;
use crate::io::AggregatedBytes;
use crate::operation::download::ObjectMetadata;
use crate::types::{CompletedPart, ObjectHeaders};

/// [`Backend`] implementation backed by the AWS SDK for Rust
pub mod sdk;

/// The S3 service protocol a transfer is built on.
///
/// An implementation is responsible for addressing, signing, and sending each request and
/// for classifying failures into [`ErrorKind`](crate::error::ErrorKind)s. Only errors of kind
/// [`Transport`](crate::error::ErrorKind::Transport) are retried by the transfer.
///
/// Every method must be idempotent with respect to the logical object: a request may be
/// re-issued with identical arguments after a transient failure.
#[async_trait]
pub trait Backend: fmt::Debug + Send + Sync {
    /// Retrieve object metadata without its content
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error>;

    /// Retrieve an object, or a byte range of it
    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectResponse, Error>;

    /// Store a small object with a single request
    async fn put_object(&self, request: PutObjectRequest) -> Result<PutObjectResponse, Error>;

    /// Delete an object
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error>;

    /// Start a multipart upload and return its upload id
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &ObjectHeaders,
    ) -> Result<String, Error>;

    /// Upload a single part and return its entity tag
    async fn upload_part(&self, request: UploadPartRequest) -> Result<String, Error>;

    /// Assemble the object from the given parts, listed in part number order
    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> Result<CompletedUpload, Error>;

    /// Discard a multipart upload and any parts stored for it
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), Error>;
}

/// A reference-counted [`Backend`] that can be shared across transfers and tasks.
#[derive(Clone)]
pub struct SharedBackend(Arc<dyn Backend>);

impl SharedBackend {
    /// Wrap a backend for sharing
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self(Arc::new(backend))
    }
}

impl fmt::Debug for SharedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedBackend").field(&self.0).finish()
    }
}

impl Deref for SharedBackend {
    type Target = dyn Backend;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Input for [`Backend::get_object`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetObjectRequest {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Inclusive byte range to fetch; `None` fetches the whole object
    pub range: Option<RangeInclusive<u64>>,
    /// Only succeed if the object still has this entity tag
    pub if_match: Option<String>,
}

/// Output of [`Backend::get_object`]
#[derive(Debug)]
pub struct GetObjectResponse {
    /// The `Content-Range` response header, present for ranged requests
    pub content_range: Option<String>,
    /// The `Content-Length` response header
    pub content_length: Option<u64>,
    /// The response body
    pub data: AggregatedBytes,
}

/// Input for [`Backend::put_object`]
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Object content
    pub data: Bytes,
    /// Base64 encoded MD5 of `data`, sent as `Content-MD5`
    pub content_md5: Option<String>,
    /// Headers to create the object with
    pub headers: ObjectHeaders,
}

/// Output of [`Backend::put_object`]
#[derive(Debug, Clone, Default)]
pub struct PutObjectResponse {
    /// Entity tag of the stored object
    pub e_tag: Option<String>,
}

/// Input for [`Backend::upload_part`]
#[derive(Debug, Clone)]
pub struct UploadPartRequest {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Upload id returned by [`Backend::create_multipart_upload`]
    pub upload_id: String,
    /// 1-based part number
    pub part_number: i32,
    /// Part content
    pub data: Bytes,
    /// Base64 encoded MD5 of `data`, sent as `Content-MD5`
    pub content_md5: Option<String>,
}

/// Input for [`Backend::complete_multipart_upload`]
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadRequest {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Upload id returned by [`Backend::create_multipart_upload`]
    pub upload_id: String,
    /// Every uploaded part, in ascending part number order
    pub parts: Vec<CompletedPart>,
}

/// Output of [`Backend::complete_multipart_upload`]
#[derive(Debug, Clone, Default)]
pub struct CompletedUpload {
    /// Entity tag of the assembled object
    pub e_tag: Option<String>,
    /// Version id of the assembled object, if the bucket is versioned
    pub version_id: Option<String>,
}
