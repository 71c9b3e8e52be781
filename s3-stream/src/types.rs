/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;
use std::fmt;

use crate::error::{self, Error};

const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

/// Keys for an S3-compatible account, used for signing requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Keys {
    access_key: String,
    secret_key: String,
}

impl Keys {
    /// Create a new key pair
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Read keys from the `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let read = |name: &str| {
            std::env::var(name)
                .map_err(|err| error::invalid_input(format!("{name} is not usable: {err}")))
        };
        Ok(Self::new(read(ACCESS_KEY_ENV)?, read(SECRET_KEY_ENV)?))
    }

    /// The access key id
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// The secret access key
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .finish()
    }
}

/// URL scheme used to reach the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    #[default]
    Https,
}

impl Scheme {
    /// The scheme as it appears in a URL
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(error::invalid_input(format!(
                "unsupported url scheme `{other}`"
            ))),
        }
    }
}

/// Headers attached to an object when it is created by a [`Putter`](crate::Putter).
///
/// Covers the standard content headers, server-side encryption flags, and user metadata
/// (sent as `x-amz-meta-*`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHeaders {
    content_type: Option<String>,
    cache_control: Option<String>,
    content_disposition: Option<String>,
    content_encoding: Option<String>,
    content_language: Option<String>,
    acl: Option<String>,
    server_side_encryption: Option<String>,
    ssekms_key_id: Option<String>,
    storage_class: Option<String>,
    metadata: HashMap<String, String>,
}

impl ObjectHeaders {
    /// Empty set of headers
    pub fn new() -> Self {
        Self::default()
    }

    /// `Content-Type` of the object
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    /// `Cache-Control` of the object
    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    /// `Content-Disposition` of the object
    pub fn content_disposition(mut self, value: impl Into<String>) -> Self {
        self.content_disposition = Some(value.into());
        self
    }

    /// `Content-Encoding` of the object
    pub fn content_encoding(mut self, value: impl Into<String>) -> Self {
        self.content_encoding = Some(value.into());
        self
    }

    /// `Content-Language` of the object
    pub fn content_language(mut self, value: impl Into<String>) -> Self {
        self.content_language = Some(value.into());
        self
    }

    /// Canned ACL (e.g. `private`, `public-read`)
    pub fn acl(mut self, value: impl Into<String>) -> Self {
        self.acl = Some(value.into());
        self
    }

    /// Server-side encryption algorithm (e.g. `AES256`, `aws:kms`)
    pub fn server_side_encryption(mut self, value: impl Into<String>) -> Self {
        self.server_side_encryption = Some(value.into());
        self
    }

    /// KMS key id used with `aws:kms` server-side encryption
    pub fn ssekms_key_id(mut self, value: impl Into<String>) -> Self {
        self.ssekms_key_id = Some(value.into());
        self
    }

    /// Storage class (e.g. `STANDARD_IA`)
    pub fn storage_class(mut self, value: impl Into<String>) -> Self {
        self.storage_class = Some(value.into());
        self
    }

    /// Add a user metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the `Content-Type`, if set
    pub fn get_content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Returns the `Cache-Control`, if set
    pub fn get_cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    /// Returns the `Content-Disposition`, if set
    pub fn get_content_disposition(&self) -> Option<&str> {
        self.content_disposition.as_deref()
    }

    /// Returns the `Content-Encoding`, if set
    pub fn get_content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    /// Returns the `Content-Language`, if set
    pub fn get_content_language(&self) -> Option<&str> {
        self.content_language.as_deref()
    }

    /// Returns the canned ACL, if set
    pub fn get_acl(&self) -> Option<&str> {
        self.acl.as_deref()
    }

    /// Returns the server-side encryption algorithm, if set
    pub fn get_server_side_encryption(&self) -> Option<&str> {
        self.server_side_encryption.as_deref()
    }

    /// Returns the KMS key id, if set
    pub fn get_ssekms_key_id(&self) -> Option<&str> {
        self.ssekms_key_id.as_deref()
    }

    /// Returns the storage class, if set
    pub fn get_storage_class(&self) -> Option<&str> {
        self.storage_class.as_deref()
    }

    /// Returns the user metadata
    pub fn get_metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

/// A part of a multipart upload that the service has stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: i32,
    /// Entity tag returned by the service for this part
    pub e_tag: String,
}
