/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::str::FromStr;

use crate::error::{self, Error};

/// The `Range` request header for a single byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Range(pub(crate) ByteRange);

/// A byte range as it appears in a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteRange {
    /// Inclusive start and end offsets (`bytes=start-end`)
    Inclusive(u64, u64),
}

impl Range {
    /// Range covering `start..=end`
    pub(crate) fn bytes_inclusive(start: u64, end: u64) -> Self {
        Range(ByteRange::Inclusive(start, end))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ByteRange::Inclusive(start, end) => write!(f, "bytes={start}-{end}"),
        }
    }
}

/// A parsed `Content-Range` response header (`bytes start-end/total`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub(crate) start: u64,
    pub(crate) end: u64,
    /// `None` when the service reports the total as unknown (`*`)
    pub(crate) total: Option<u64>,
}

impl FromStr for ContentRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || error::protocol(format!("malformed Content-Range `{s}`"));

        let range = s.trim().strip_prefix("bytes ").ok_or_else(malformed)?;
        let (range, total) = range.split_once('/').ok_or_else(malformed)?;
        let (start, end) = range.split_once('-').ok_or_else(malformed)?;

        let start: u64 = start.trim().parse().map_err(|_| malformed())?;
        let end: u64 = end.trim().parse().map_err(|_| malformed())?;
        let total = match total.trim() {
            "*" => None,
            total => Some(total.parse::<u64>().map_err(|_| malformed())?),
        };

        if start > end || total.is_some_and(|total| end >= total) {
            return Err(malformed());
        }

        Ok(ContentRange { start, end, total })
    }
}
