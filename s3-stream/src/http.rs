/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::Duration;

use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};

use crate::types::{Keys, Scheme};

pub(crate) mod header;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REGION: &str = "us-east-1";
const CREDENTIALS_PROVIDER_NAME: &str = "s3-stream";

/// The default S3 client used by an account when a transfer is not explicitly configured with one.
///
/// Requests are addressed virtual-host style (`scheme://bucket.domain/key`). Retries are
/// disabled at this layer since every transfer retries its own parts.
pub(crate) fn default_client(domain: &str, keys: &Keys, scheme: Scheme) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        keys.access_key(),
        keys.secret_key(),
        None,
        None,
        CREDENTIALS_PROVIDER_NAME,
    );

    let timeouts = TimeoutConfig::builder()
        .connect_timeout(DEFAULT_TIMEOUT)
        .read_timeout(DEFAULT_TIMEOUT)
        .build();

    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .credentials_provider(credentials)
        .region(Region::new(DEFAULT_REGION))
        .endpoint_url(format!("{scheme}://{domain}"))
        .force_path_style(false)
        .timeout_config(timeouts)
        .retry_config(RetryConfig::disabled())
        .build();

    aws_sdk_s3::Client::from_conf(config)
}
