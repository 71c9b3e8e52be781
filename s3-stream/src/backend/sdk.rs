/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as SdkCompletedPart, ObjectCannedAcl,
    ServerSideEncryption, StorageClass,
};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use tracing::Instrument;

use super::{
    Backend, CompleteMultipartUploadRequest, CompletedUpload, GetObjectRequest, GetObjectResponse,
    PutObjectRequest, PutObjectResponse, UploadPartRequest,
};
use crate::error::{self, Error, ErrorKind};
use crate::io::AggregatedBytes;
use crate::operation::download::ObjectMetadata;
use crate::types::ObjectHeaders;

/// [`Backend`] that sends every request through an [`aws_sdk_s3::Client`].
///
/// The client signs requests (SigV4) and owns the HTTP transport. Failures are classified by
/// S3 error code first and HTTP status second.
#[derive(Debug, Clone)]
pub struct SdkBackend {
    client: aws_sdk_s3::Client,
}

impl SdkBackend {
    /// Create a backend around the given client
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// The underlying S3 client
    pub fn client(&self) -> &aws_sdk_s3::Client {
        &self.client
    }
}

// The object headers apply to both PutObject and CreateMultipartUpload whose fluent builders
// are distinct types with identical setters.
macro_rules! with_object_headers {
    ($builder:expr, $headers:expr) => {{
        let headers: &ObjectHeaders = $headers;
        let metadata = match headers.get_metadata().is_empty() {
            true => None,
            false => Some(headers.get_metadata().clone()),
        };
        $builder
            .set_content_type(headers.get_content_type().map(str::to_owned))
            .set_cache_control(headers.get_cache_control().map(str::to_owned))
            .set_content_disposition(headers.get_content_disposition().map(str::to_owned))
            .set_content_encoding(headers.get_content_encoding().map(str::to_owned))
            .set_content_language(headers.get_content_language().map(str::to_owned))
            .set_acl(headers.get_acl().map(ObjectCannedAcl::from))
            .set_server_side_encryption(
                headers
                    .get_server_side_encryption()
                    .map(ServerSideEncryption::from),
            )
            .set_ssekms_key_id(headers.get_ssekms_key_id().map(str::to_owned))
            .set_storage_class(headers.get_storage_class().map(StorageClass::from))
            .set_metadata(metadata)
    }};
}

#[async_trait]
impl Backend for SdkBackend {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .instrument(tracing::debug_span!("send-head-object"))
            .await
            .map_err(classify)?;

        let content_length = resp
            .content_length()
            .ok_or_else(|| error::protocol("HeadObject response is missing Content-Length"))?;
        let content_length = u64::try_from(content_length).map_err(|_| {
            error::protocol(format!("invalid Content-Length {content_length}"))
        })?;

        Ok(ObjectMetadata {
            content_length,
            e_tag: resp.e_tag().map(str::to_owned),
            content_type: resp.content_type().map(str::to_owned),
            version_id: resp.version_id().map(str::to_owned),
            server_side_encryption: resp
                .server_side_encryption()
                .map(|sse| sse.as_str().to_owned()),
            metadata: resp.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectResponse, Error> {
        let range = request
            .range
            .as_ref()
            .map(|r| crate::http::header::Range::bytes_inclusive(*r.start(), *r.end()).to_string());
        let resp = self
            .client
            .get_object()
            .bucket(request.bucket)
            .key(request.key)
            .set_range(range)
            .set_if_match(request.if_match)
            .send()
            .await
            .map_err(classify)?;

        let content_range = resp.content_range().map(str::to_owned);
        let content_length = resp.content_length().and_then(|len| u64::try_from(len).ok());
        let data = AggregatedBytes::from_byte_stream(resp.body)
            .instrument(tracing::debug_span!("collect-body"))
            .await?;

        Ok(GetObjectResponse {
            content_range,
            content_length,
            data,
        })
    }

    async fn put_object(&self, request: PutObjectRequest) -> Result<PutObjectResponse, Error> {
        let builder = self
            .client
            .put_object()
            .bucket(request.bucket)
            .key(request.key)
            .content_length(request.data.len() as i64)
            .set_content_md5(request.content_md5)
            .body(ByteStream::from(request.data));
        let resp = with_object_headers!(builder, &request.headers)
            .send()
            .instrument(tracing::debug_span!("send-put-object"))
            .await
            .map_err(classify)?;

        Ok(PutObjectResponse {
            e_tag: resp.e_tag().map(str::to_owned),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .instrument(tracing::debug_span!("send-delete-object"))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &ObjectHeaders,
    ) -> Result<String, Error> {
        let builder = self.client.create_multipart_upload().bucket(bucket).key(key);
        let resp = with_object_headers!(builder, headers)
            .send()
            .instrument(tracing::debug_span!("send-create-multipart-upload"))
            .await
            .map_err(classify)?;

        resp.upload_id()
            .map(str::to_owned)
            .ok_or_else(|| error::protocol("CreateMultipartUpload response is missing UploadId"))
    }

    async fn upload_part(&self, request: UploadPartRequest) -> Result<String, Error> {
        let resp = self
            .client
            .upload_part()
            .bucket(request.bucket)
            .key(request.key)
            .upload_id(request.upload_id)
            .part_number(request.part_number)
            .content_length(request.data.len() as i64)
            .set_content_md5(request.content_md5)
            .body(ByteStream::from(request.data))
            .send()
            .await
            .map_err(classify)?;

        resp.e_tag().map(str::to_owned).ok_or_else(|| {
            error::protocol(format!(
                "UploadPart response for part {} is missing ETag",
                request.part_number
            ))
        })
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> Result<CompletedUpload, Error> {
        let parts = request
            .parts
            .into_iter()
            .map(|part| {
                SdkCompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.e_tag)
                    .build()
            })
            .collect::<Vec<_>>();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(request.bucket)
            .key(request.key)
            .upload_id(request.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .instrument(tracing::debug_span!("send-complete-multipart-upload"))
            .await
            .map_err(classify)?;

        Ok(CompletedUpload {
            e_tag: resp.e_tag().map(str::to_owned),
            version_id: resp.version_id().map(str::to_owned),
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), Error> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .instrument(tracing::debug_span!("send-abort-multipart-upload"))
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Map an SDK failure onto the error kinds a transfer acts on.
pub(crate) fn classify<E>(err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|resp| resp.status().as_u16());
    let kind = match err.code() {
        Some("NoSuchKey" | "NotFound" | "NoSuchUpload" | "NoSuchBucket") => ErrorKind::NotFound,
        Some("BadDigest" | "InvalidDigest") => ErrorKind::Integrity,
        Some("SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable") => {
            ErrorKind::Transport
        }
        _ => match &err {
            SdkError::ConstructionFailure(_) => ErrorKind::InputInvalid,
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                ErrorKind::Transport
            }
            _ => match status {
                Some(code) if code >= 500 || code == 429 || code == 408 => ErrorKind::Transport,
                Some(404) => ErrorKind::NotFound,
                _ => ErrorKind::Protocol,
            },
        },
    };
    Error::new(kind, err)
}

#[cfg(test)]
mod tests {
    use super::{classify, SdkBackend};
    use crate::backend::{Backend, GetObjectRequest};
    use crate::error::ErrorKind;
    use crate::types::ObjectHeaders;
    use aws_sdk_s3::error::{ErrorMetadata, SdkError};
    use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadOutput;
    use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
    use aws_sdk_s3::operation::upload_part::UploadPartOutput;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_smithy_mocks_experimental::{mock, mock_client, RuleMode};
    use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
    use aws_smithy_runtime_api::http::StatusCode;
    use aws_smithy_types::body::SdkBody;
    use bytes::{Buf, Bytes};

    fn service_error(code: Option<&str>, status: u16) -> SdkError<GetObjectError, HttpResponse> {
        let mut meta = ErrorMetadata::builder();
        if let Some(code) = code {
            meta = meta.code(code);
        }
        SdkError::service_error(
            GetObjectError::generic(meta.build()),
            HttpResponse::new(StatusCode::try_from(status).unwrap(), SdkBody::empty()),
        )
    }

    #[test]
    fn test_classify_by_code() {
        let err = classify(service_error(Some("NoSuchKey"), 404));
        assert_eq!(&ErrorKind::NotFound, err.kind());

        let err = classify(service_error(Some("BadDigest"), 400));
        assert_eq!(&ErrorKind::Integrity, err.kind());

        let err = classify(service_error(Some("SlowDown"), 503));
        assert_eq!(&ErrorKind::Transport, err.kind());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_by_status() {
        assert_eq!(
            &ErrorKind::Transport,
            classify(service_error(None, 500)).kind()
        );
        assert_eq!(
            &ErrorKind::Transport,
            classify(service_error(None, 429)).kind()
        );
        assert_eq!(
            &ErrorKind::NotFound,
            classify(service_error(None, 404)).kind()
        );
        assert_eq!(
            &ErrorKind::Protocol,
            classify(service_error(Some("PreconditionFailed"), 412)).kind()
        );
        assert_eq!(
            &ErrorKind::Protocol,
            classify(service_error(Some("AccessDenied"), 403)).kind()
        );
    }

    #[test]
    fn test_classify_transport_failures() {
        let err: SdkError<GetObjectError, HttpResponse> = SdkError::timeout_error("timed out");
        assert_eq!(&ErrorKind::Transport, classify(err).kind());

        let err: SdkError<GetObjectError, HttpResponse> =
            SdkError::construction_failure("missing bucket");
        assert_eq!(&ErrorKind::InputInvalid, classify(err).kind());
    }

    #[tokio::test]
    async fn test_ranged_get_sends_range_and_if_match() {
        let get_object = mock!(aws_sdk_s3::Client::get_object)
            .match_requests(|r| {
                r.range() == Some("bytes=5-9") && r.if_match() == Some("\"etag-1\"")
            })
            .then_output(|| {
                GetObjectOutput::builder()
                    .content_range("bytes 5-9/10")
                    .content_length(5)
                    .body(ByteStream::from_static(b"world"))
                    .build()
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&get_object]);
        let backend = SdkBackend::new(client);

        let resp = backend
            .get_object(GetObjectRequest {
                bucket: "test-bucket".to_owned(),
                key: "test-key".to_owned(),
                range: Some(5..=9),
                if_match: Some("\"etag-1\"".to_owned()),
            })
            .await
            .unwrap();

        assert_eq!(Some("bytes 5-9/10"), resp.content_range.as_deref());
        assert_eq!(Some(5), resp.content_length);
        assert_eq!(5, resp.data.remaining());
        assert_eq!(b"world".to_vec(), resp.data.to_vec());
    }

    #[tokio::test]
    async fn test_missing_upload_id_is_protocol_error() {
        let create_mpu = mock!(aws_sdk_s3::Client::create_multipart_upload)
            .then_output(|| CreateMultipartUploadOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&create_mpu]);
        let backend = SdkBackend::new(client);

        let err = backend
            .create_multipart_upload("test-bucket", "test-key", &ObjectHeaders::new())
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::Protocol, err.kind());
    }

    #[tokio::test]
    async fn test_upload_part_sends_content_md5() {
        let upload_part = mock!(aws_sdk_s3::Client::upload_part)
            .match_requests(|r| {
                r.part_number() == Some(3)
                    && r.content_md5() == Some("XUFAKrxLKna5cZ2REBfFkg==")
                    && r.content_length() == Some(5)
            })
            .then_output(|| UploadPartOutput::builder().e_tag("\"part-3\"").build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&upload_part]);
        let backend = SdkBackend::new(client);

        let e_tag = backend
            .upload_part(crate::backend::UploadPartRequest {
                bucket: "test-bucket".to_owned(),
                key: "test-key".to_owned(),
                upload_id: "upload-1".to_owned(),
                part_number: 3,
                data: Bytes::from_static(b"hello"),
                content_md5: Some("XUFAKrxLKna5cZ2REBfFkg==".to_owned()),
            })
            .await
            .unwrap();
        assert_eq!("\"part-3\"", e_tag);
    }
}
