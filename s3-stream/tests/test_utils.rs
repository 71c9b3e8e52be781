/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
#![allow(dead_code)]

use std::iter;

use bytes::Bytes;
use s3_stream::config::Builder;
use s3_stream::error::{Error, ErrorKind};
use s3_stream::test_util::InMemoryBackend;
use s3_stream::{Config, Keys, S3};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// Log to the test writer, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn rand_data(size: usize) -> Bytes {
    iter::repeat_with(fastrand::alphanumeric)
        .take(size)
        .map(|x| x as u8)
        .collect::<Vec<_>>()
        .into()
}

/// Small parts and fast retries on top of the in-memory backend
pub fn config(mem: &InMemoryBackend) -> Builder {
    Config::builder()
        .backend(mem.clone())
        .retry_backoff(std::time::Duration::from_millis(1))
}

pub fn account(config: Config) -> S3 {
    S3::new("", Keys::new("AKIDEXAMPLE", "secret")).with_config(config)
}

/// Lowercase hex MD5 of `data`
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Read everything, unwrapping a transfer error out of the I/O error
pub async fn read_all(reader: &mut s3_stream::Getter) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    match reader.read_to_end(&mut out).await {
        Ok(_) => Ok(out),
        Err(err) => Err(Error::from_io(&err)
            .cloned()
            .unwrap_or_else(|| Error::new(ErrorKind::IOError, err))),
    }
}
