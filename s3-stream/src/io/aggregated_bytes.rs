/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io::IoSlice;

use aws_sdk_s3::primitives::ByteStream;
use bytes::{Buf, Bytes};
use bytes_utils::SegmentedBuf;

use crate::error;

/// The body of one part, kept as the segments it arrived in.
///
/// Reading through [`Buf`] walks the segments without copying them.
#[derive(Debug, Clone, Default)]
pub struct AggregatedBytes(pub(crate) SegmentedBuf<Bytes>);

impl AggregatedBytes {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment to the end of this buffer
    pub fn push(&mut self, segment: Bytes) {
        self.0.push(segment)
    }

    /// Copy the remaining content into a vector
    pub fn to_vec(self) -> Vec<u8> {
        self.0.into_inner().into_iter().flatten().collect()
    }

    /// Collect a response body
    ///
    /// A body that fails part way through is a transient failure.
    pub(crate) async fn from_byte_stream(value: ByteStream) -> Result<Self, error::Error> {
        let mut value = value;
        let mut output = SegmentedBuf::new();
        while let Some(buf) = value.next().await {
            match buf {
                Ok(buf) => output.push(buf),
                Err(err) => return Err(error::transport(err)),
            };
        }
        Ok(AggregatedBytes(output))
    }
}

impl From<Bytes> for AggregatedBytes {
    fn from(value: Bytes) -> Self {
        let mut output = SegmentedBuf::new();
        output.push(value);
        AggregatedBytes(output)
    }
}

impl Buf for AggregatedBytes {
    fn remaining(&self) -> usize {
        self.0.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.0.chunk()
    }

    fn chunks_vectored<'a>(&'a self, dst: &mut [IoSlice<'a>]) -> usize {
        self.0.chunks_vectored(dst)
    }

    fn advance(&mut self, cnt: usize) {
        self.0.advance(cnt)
    }

    fn copy_to_bytes(&mut self, len: usize) -> Bytes {
        self.0.copy_to_bytes(len)
    }
}
