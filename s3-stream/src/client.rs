/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::SharedBackend;
use crate::backend::sdk::SdkBackend;
use crate::checksum;
use crate::config::Config;
use crate::error::{self, Error, ErrorKind};
use crate::middleware::retry::{send_with_retry, RetryPolicy};
use crate::operation::download::Getter;
use crate::operation::upload::Putter;
use crate::types::{Keys, ObjectHeaders, Scheme};
use crate::DEFAULT_DOMAIN;

/// An account on an S3-compatible service.
///
/// Holds the service domain and the keys requests are signed with. Default clients are built
/// lazily, one per URL scheme, and shared by every transfer that does not configure its own.
///
/// # Examples
///
/// ```no_run
/// use s3_stream::{Keys, S3};
///
/// let s3 = S3::new("", Keys::new("AKIDEXAMPLE", "secret"));
/// let bucket = s3.bucket("my-bucket");
/// assert_eq!("https://my-bucket.s3.amazonaws.com/a/b", bucket.url("a/b", None));
/// ```
#[derive(Debug)]
pub struct S3 {
    domain: String,
    keys: Keys,
    config: Config,
    default_clients: Mutex<HashMap<Scheme, SharedBackend>>,
}

impl S3 {
    /// Create an account handle. An empty `domain` selects [`DEFAULT_DOMAIN`].
    pub fn new(domain: impl Into<String>, keys: Keys) -> Self {
        let domain = domain.into();
        let domain = match domain.is_empty() {
            true => DEFAULT_DOMAIN.to_owned(),
            false => domain,
        };
        Self {
            domain,
            keys,
            config: Config::default(),
            default_clients: Mutex::new(HashMap::new()),
        }
    }

    /// Set the configuration used by transfers that are not given one explicitly
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The service domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The account keys
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// The configuration used by transfers that are not given one explicitly
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A handle to the named bucket of this account
    pub fn bucket(&self, name: impl Into<String>) -> Bucket<'_> {
        Bucket {
            s3: self,
            name: name.into(),
        }
    }

    /// The backend `config` sends requests with
    fn backend(&self, config: &Config) -> Result<SharedBackend, Error> {
        if let Some(backend) = config.backend() {
            return Ok(backend.clone());
        }

        let mut clients = self
            .default_clients
            .lock()
            .map_err(|_| Error::new(ErrorKind::RuntimeError, "default client cache poisoned"))?;
        let backend = clients.entry(config.scheme()).or_insert_with(|| {
            tracing::debug!(domain = %self.domain, scheme = %config.scheme(), "building default client");
            let client = crate::http::default_client(&self.domain, &self.keys, config.scheme());
            SharedBackend::new(SdkBackend::new(client))
        });
        Ok(backend.clone())
    }
}

/// A bucket of an [`S3`] account.
#[derive(Debug, Clone)]
pub struct Bucket<'a> {
    s3: &'a S3,
    name: String,
}

impl<'a> Bucket<'a> {
    /// The bucket name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The domain of the owning account
    pub fn domain(&self) -> &str {
        self.s3.domain()
    }

    /// The keys of the owning account
    pub fn keys(&self) -> &Keys {
        self.s3.keys()
    }

    /// The owning account
    pub fn s3(&self) -> &'a S3 {
        self.s3
    }

    /// Virtual-host style URL of `path` in this bucket
    pub fn url(&self, path: &str, config: Option<&Config>) -> String {
        let scheme = config.unwrap_or(self.s3.config()).scheme();
        format!(
            "{scheme}://{}.{}/{}",
            self.name,
            self.s3.domain(),
            path.trim_start_matches('/')
        )
    }

    /// Open a streaming reader for the object at `path`.
    ///
    /// The object's metadata is discovered before this returns; a missing object fails with
    /// [`ErrorKind::NotFound`]. `config` defaults to the account's configuration.
    pub async fn get_reader(&self, path: &str, config: Option<&Config>) -> Result<Getter, Error> {
        let config = config.unwrap_or(self.s3.config()).clone();
        let key = object_key(path)?;
        let backend = self.s3.backend(&config)?;
        Getter::open(backend, config, &self.name, key).await
    }

    /// Open a streaming writer that creates (or replaces) the object at `path`.
    ///
    /// The multipart upload is started before this returns. `headers` are applied to the new
    /// object. `config` defaults to the account's configuration.
    pub async fn put_writer(
        &self,
        path: &str,
        headers: Option<ObjectHeaders>,
        config: Option<&Config>,
    ) -> Result<Putter, Error> {
        let config = config.unwrap_or(self.s3.config()).clone();
        let key = object_key(path)?;
        let backend = self.s3.backend(&config)?;
        Putter::open(backend, config, &self.name, key, headers.unwrap_or_default()).await
    }

    /// Delete the object at `path` together with its stored digest.
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        let config = self.s3.config();
        let key = object_key(path)?;
        let backend = self.s3.backend(config)?;
        let policy = RetryPolicy::new(config.max_retries(), config.retry_backoff());

        let delete = |key: String| {
            let backend = backend.clone();
            let bucket = self.name.clone();
            async move { backend.delete_object(&bucket, &key).await }
        };
        send_with_retry(policy.clone(), key.to_owned(), delete).await?;

        match send_with_retry(policy, checksum::digest_key(key), delete).await {
            Err(err) if err.kind() != &ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

fn object_key(path: &str) -> Result<&str, Error> {
    let key = path.trim_start_matches('/');
    if key.is_empty() {
        return Err(error::invalid_input(format!("`{path}` is not an object path")));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::{object_key, S3};
    use crate::config::Config;
    use crate::types::{Keys, Scheme};
    use crate::DEFAULT_DOMAIN;

    fn keys() -> Keys {
        Keys::new("AKIDEXAMPLE", "secret")
    }

    #[test]
    fn test_default_domain() {
        let s3 = S3::new("", keys());
        assert_eq!(DEFAULT_DOMAIN, s3.domain());

        let s3 = S3::new("storage.example.com", keys());
        let bucket = s3.bucket("logs");
        assert_eq!("logs", bucket.name());
        assert_eq!("storage.example.com", bucket.domain());
        assert_eq!("AKIDEXAMPLE", bucket.keys().access_key());
    }

    #[test]
    fn test_url() {
        let s3 = S3::new("storage.example.com", keys());
        let bucket = s3.bucket("logs");
        assert_eq!(
            "https://logs.storage.example.com/2024/01/app.log",
            bucket.url("/2024/01/app.log", None)
        );

        let config = Config::builder().scheme(Scheme::Http).build().unwrap();
        assert_eq!(
            "http://logs.storage.example.com/app.log",
            bucket.url("app.log", Some(&config))
        );
    }

    #[test]
    fn test_object_key() {
        assert_eq!("a/b", object_key("/a/b").unwrap());
        assert!(object_key("/").is_err());
        assert!(object_key("").is_err());
    }

    #[tokio::test]
    async fn test_default_clients_cached_per_scheme() {
        let s3 = S3::new("", keys());
        let https = Config::default();
        let http = Config::builder().scheme(Scheme::Http).build().unwrap();

        s3.backend(&https).unwrap();
        s3.backend(&https).unwrap();
        s3.backend(&http).unwrap();
        assert_eq!(2, s3.default_clients.lock().unwrap().len());
    }
}
