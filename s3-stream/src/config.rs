/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::Duration;

use crate::backend::{Backend, SharedBackend};
use crate::error::{self, Error};
use crate::types::Scheme;
use crate::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_PART_SIZE, DEFAULT_RETRY_BACKOFF, MEBIBYTE,
};

/// Minimum part size S3 accepts for every part of a multipart upload except the last
const MIN_MULTIPART_PART_SIZE_BYTES: u64 = 5 * MEBIBYTE;

/// Configuration for a single transfer.
///
/// A `Config` is an immutable snapshot; a transfer clones it when it starts and never
/// observes later changes made by anyone else.
#[derive(Debug, Clone)]
pub struct Config {
    backend: Option<SharedBackend>,
    concurrency: usize,
    part_size: u64,
    max_retries: usize,
    verify_checksum: bool,
    scheme: Scheme,
    retry_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: None,
            concurrency: DEFAULT_CONCURRENCY,
            part_size: DEFAULT_PART_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            verify_checksum: true,
            scheme: Scheme::Https,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl Config {
    /// Create a new `Config` builder starting from the defaults
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Convert this config back into a builder to override some of its settings
    pub fn to_builder(&self) -> Builder {
        Builder {
            inner: self.clone(),
        }
    }

    /// The backend to send requests with, if one was set explicitly.
    ///
    /// When unset the account builds a default client for its domain and keys.
    pub fn backend(&self) -> Option<&SharedBackend> {
        self.backend.as_ref()
    }

    /// Number of parts transferred (or buffered unread) at once
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Size of each part in bytes. The last part of an object may be shorter.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Maximum number of times a part is retried after a transient failure
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Whether the whole-object MD5 digest is stored on upload and verified on download
    pub fn verify_checksum(&self) -> bool {
        self.verify_checksum
    }

    /// The URL scheme used to reach the service
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Base delay before the first retry of a part; doubled on each following retry
    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }
}

/// Fluent style builder for [Config]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    inner: Config,
}

impl Builder {
    /// Set an explicit S3 client to send requests with.
    ///
    /// The client is expected to carry its own credentials and endpoint. Its own retry
    /// configuration stacks with [`max_retries`](Self::max_retries).
    pub fn client(self, client: aws_sdk_s3::Client) -> Self {
        self.backend(crate::backend::sdk::SdkBackend::new(client))
    }

    /// Set an explicit [`Backend`] to send requests with.
    pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
        self.inner.backend = Some(SharedBackend::new(backend));
        self
    }

    /// Set the number of parts transferred concurrently.
    ///
    /// For downloads this also bounds the number of parts held in memory waiting to be read.
    /// Default is 10.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.inner.concurrency = concurrency;
        self
    }

    /// Set the size of each part in bytes.
    ///
    /// S3 rejects multipart uploads whose parts (other than the last) are smaller than
    /// 5 MiB; smaller sizes are accepted here for services that allow them.
    /// Default is 20 MiB.
    pub fn part_size(mut self, part_size: u64) -> Self {
        self.inner.part_size = part_size;
        self
    }

    /// Set the maximum number of retries for a part. `0` disables retries.
    /// Default is 10.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.inner.max_retries = max_retries;
        self
    }

    /// Enable or disable whole-object MD5 verification.
    /// Default is enabled.
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.inner.verify_checksum = verify;
        self
    }

    /// Set the URL scheme used to reach the service.
    /// Default is https.
    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.inner.scheme = scheme;
        self
    }

    /// Set the base delay between retries of a part.
    /// Default is 100ms.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.inner.retry_backoff = backoff;
        self
    }

    /// Consumes the builder and constructs a [`Config`](crate::config::Config)
    pub fn build(self) -> Result<Config, Error> {
        let config = self.inner;
        if config.concurrency == 0 {
            return Err(error::invalid_input("concurrency must be at least 1"));
        }
        if config.part_size == 0 {
            return Err(error::invalid_input("part size must be greater than 0"));
        }
        if usize::try_from(config.part_size).is_err() {
            return Err(error::invalid_input(format!(
                "part size {} does not fit in memory",
                config.part_size
            )));
        }
        if config.part_size < MIN_MULTIPART_PART_SIZE_BYTES {
            tracing::warn!(
                "part size {} is below the 5 MiB minimum S3 accepts for multipart uploads",
                config.part_size
            );
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::error::ErrorKind;
    use crate::types::Scheme;
    use crate::MEBIBYTE;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(10, config.concurrency());
        assert_eq!(20 * MEBIBYTE, config.part_size());
        assert_eq!(10, config.max_retries());
        assert!(config.verify_checksum());
        assert_eq!(Scheme::Https, config.scheme());
        assert!(config.backend().is_none());
    }

    #[test]
    fn test_builder_overrides_do_not_leak() {
        let base = Config::default();
        let tuned = base
            .to_builder()
            .concurrency(4)
            .part_size(8 * MEBIBYTE)
            .max_retries(0)
            .verify_checksum(false)
            .scheme(Scheme::Http)
            .build()
            .unwrap();

        assert_eq!(4, tuned.concurrency());
        assert_eq!(0, tuned.max_retries());
        assert!(!tuned.verify_checksum());
        assert_eq!(10, base.concurrency());
        assert!(base.verify_checksum());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let err = Config::builder().concurrency(0).build().unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());

        let err = Config::builder().part_size(0).build().unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
    }
}
