/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;

/// Object metadata discovered when a download is opened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Size of the object in bytes
    pub content_length: u64,
    /// Entity tag of the object; ranged reads are pinned to it
    pub e_tag: Option<String>,
    /// `Content-Type` of the object
    pub content_type: Option<String>,
    /// Version id of the object, if the bucket is versioned
    pub version_id: Option<String>,
    /// Server-side encryption algorithm the object is stored with
    pub server_side_encryption: Option<String>,
    /// User metadata (`x-amz-meta-*`)
    pub metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// The total object size
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Number of parts the object is fetched in. The last part may be shorter.
    pub(crate) fn part_count(&self, part_size: u64) -> u64 {
        self.content_length.div_ceil(part_size)
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectMetadata;

    #[test]
    fn test_part_count() {
        let meta = |len| ObjectMetadata {
            content_length: len,
            ..Default::default()
        };
        assert_eq!(0, meta(0).part_count(5));
        assert_eq!(1, meta(1).part_count(5));
        assert_eq!(1, meta(5).part_count(5));
        assert_eq!(2, meta(6).part_count(5));
        assert_eq!(20, meta(100).part_count(5));
    }
}
