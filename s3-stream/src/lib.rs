/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/* Automatically managed default lints */
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
/* End of automatically managed default lints */
#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

//! Fast, parallelized, streaming access to S3-compatible object storage.
//!
//! Objects are read through a [`Getter`] that issues many concurrent ranged `GET` requests
//! and re-sequences the responses into a single ordered byte stream, and written through a
//! [`Putter`] that splits the incoming bytes into parts and uploads them concurrently as a
//! multipart upload. Both sides bound memory to roughly `concurrency * part_size`, retry
//! failed parts, and verify the whole object end to end with an MD5 digest stored beside it.
//!
//! # Examples
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use s3_stream::{Keys, S3};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! let s3 = S3::new("", Keys::from_env()?);
//! let bucket = s3.bucket("my-bucket");
//!
//! let mut writer = bucket.put_writer("logs/today.txt", None, None).await?;
//! writer.write_all(b"hello world").await?;
//! writer.close().await?;
//!
//! let mut reader = bucket.get_reader("logs/today.txt", None).await?;
//! let mut contents = Vec::new();
//! reader.read_to_end(&mut contents).await?;
//! reader.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Features
//!
//! - `test-util`: Enables an in-memory backend for tests. DO NOT ENABLE IN PRODUCTION.

use std::time::Duration;

pub(crate) const MEBIBYTE: u64 = 1024 * 1024;

/// Default number of parts transferred concurrently
pub(crate) const DEFAULT_CONCURRENCY: usize = 10;

/// Default part size in bytes
pub(crate) const DEFAULT_PART_SIZE: u64 = 20 * MEBIBYTE;

/// Default number of retries for a single part
pub(crate) const DEFAULT_MAX_RETRIES: usize = 10;

/// Default base delay between retries of a part
pub(crate) const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// The S3-compatible service domain used when none is given.
pub const DEFAULT_DOMAIN: &str = "s3.amazonaws.com";

/// Error types emitted by `s3-stream`
pub mod error;

/// Common types used by `s3-stream`
pub mod types;

/// Types and helpers for I/O
pub mod io;

/// Account and bucket handles
pub mod client;

/// Transfer configuration
pub mod config;

/// The service protocol consumed by transfers
pub mod backend;

/// Whole-object digest helpers
pub mod checksum;

/// Transfer operations
pub mod operation;

/// Tower related middleware and components
pub(crate) mod middleware;

/// HTTP related components and utils
pub(crate) mod http;

/// Internal runtime components
pub(crate) mod runtime;

/// In-memory backend for tests
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use self::client::{Bucket, S3};
pub use self::config::Config;
pub use self::operation::download::Getter;
pub use self::operation::upload::Putter;
pub use self::types::{Keys, ObjectHeaders, Scheme};
