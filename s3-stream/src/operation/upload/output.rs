/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct UploadOutput {
    /// Id of the multipart upload the object was assembled from
    pub upload_id: String,
    /// Entity tag of the assembled object
    pub e_tag: Option<String>,
    /// Version id of the assembled object, if the bucket is versioned
    pub version_id: Option<String>,
    /// Total number of bytes written
    pub content_length: u64,
    /// Number of parts the object was uploaded in
    pub part_count: usize,
    /// Lowercase hex MD5 of the object's content
    pub md5: String,
}
