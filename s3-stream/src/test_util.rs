/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! An in-memory [`Backend`] for tests.
//!
//! Stores objects and multipart uploads in memory, following S3 semantics closely enough to
//! exercise transfers end to end: ranged reads return `Content-Range`, uploads validate
//! `Content-MD5`, and completion checks the listed parts against the stored ones. Faults can be
//! injected per part and every request is recorded.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::backend::{
    Backend, CompleteMultipartUploadRequest, CompletedUpload, GetObjectRequest, GetObjectResponse,
    PutObjectRequest, PutObjectResponse, UploadPartRequest,
};
use crate::checksum;
use crate::error::{Error, ErrorKind};
use crate::io::AggregatedBytes;
use crate::operation::download::ObjectMetadata;
use crate::types::ObjectHeaders;

/// A request received by an [`InMemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Call {
    /// `HeadObject`
    HeadObject {
        /// object key
        key: String,
    },
    /// `GetObject`
    GetObject {
        /// object key
        key: String,
        /// requested range, if any
        range: Option<RangeInclusive<u64>>,
    },
    /// `PutObject`
    PutObject {
        /// object key
        key: String,
    },
    /// `DeleteObject`
    DeleteObject {
        /// object key
        key: String,
    },
    /// `CreateMultipartUpload`
    CreateMultipartUpload {
        /// object key
        key: String,
    },
    /// `UploadPart`
    UploadPart {
        /// part number
        part_number: i32,
        /// part size in bytes
        size: usize,
    },
    /// `CompleteMultipartUpload`
    CompleteMultipartUpload {
        /// listed part numbers, in request order
        part_numbers: Vec<i32>,
    },
    /// `AbortMultipartUpload`
    AbortMultipartUpload {
        /// upload id
        upload_id: String,
    },
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    e_tag: String,
    headers: ObjectHeaders,
}

#[derive(Debug)]
struct Upload {
    bucket: String,
    key: String,
    headers: ObjectHeaders,
    parts: HashMap<i32, (Bytes, String)>,
}

#[derive(Debug, Default)]
struct Faults {
    /// part number -> (remaining failures, kind)
    upload_part: HashMap<i32, (usize, ErrorKind)>,
    /// range start -> (remaining failures, kind)
    get_range: HashMap<u64, (usize, ErrorKind)>,
    complete: Option<(usize, ErrorKind)>,
    bad_content_range: HashSet<u64>,
    short_body: HashSet<u64>,
    wrong_content_length: HashSet<u64>,
    corrupt_offsets: HashSet<u64>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, Upload>,
    next_upload_id: usize,
    calls: Vec<Call>,
    faults: Faults,
    completed_uploads: usize,
    aborted_uploads: usize,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    max_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-memory S3 with fault injection.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

/// Tracks a part request in flight for the high water mark
struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn e_tag_of(data: &[u8]) -> String {
    format!("\"{}\"", checksum::to_hex(md5::compute(data)))
}

fn injected(kind: ErrorKind) -> Error {
    Error::new(kind, "injected fault")
}

/// Take one failure off a fault counter
fn take_fault<K: std::hash::Hash + Eq>(
    faults: &mut HashMap<K, (usize, ErrorKind)>,
    key: &K,
) -> Option<ErrorKind> {
    let (remaining, kind) = faults.get_mut(key)?;
    if *remaining == 0 {
        return None;
    }
    *remaining -= 1;
    Some(kind.clone())
}

impl InMemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every part request by a random duration of up to `max`, so parts complete out of
    /// order.
    pub fn with_random_delay(self, max: Duration) -> Self {
        *self.inner.max_delay.lock().unwrap() = Some(max);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    async fn delay(&self) {
        let max = *self.inner.max_delay.lock().unwrap();
        if let Some(max) = max {
            let max_micros = max.as_micros() as u64;
            tokio::time::sleep(Duration::from_micros(fastrand::u64(0..=max_micros))).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    /// Store an object directly
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let object = StoredObject {
            e_tag: e_tag_of(&data),
            data,
            headers: ObjectHeaders::new(),
        };
        self.state()
            .objects
            .insert((bucket.to_owned(), key.to_owned()), object);
    }

    /// Content of a stored object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state()
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|o| o.data.clone())
    }

    /// Headers a stored object was created with
    pub fn object_headers(&self, bucket: &str, key: &str) -> Option<ObjectHeaders> {
        self.state()
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|o| o.headers.clone())
    }

    /// Fail the next `times` uploads of `part_number` with an error of `kind`
    pub fn fail_upload_part(&self, part_number: i32, times: usize, kind: ErrorKind) {
        self.state()
            .faults
            .upload_part
            .insert(part_number, (times, kind));
    }

    /// Fail the next `times` ranged reads starting at byte `start` with an error of `kind`
    pub fn fail_get_range(&self, start: u64, times: usize, kind: ErrorKind) {
        self.state().faults.get_range.insert(start, (times, kind));
    }

    /// Fail the next `times` completion requests with an error of `kind`
    pub fn fail_complete(&self, times: usize, kind: ErrorKind) {
        self.state().faults.complete = Some((times, kind));
    }

    /// Answer ranged reads starting at byte `start` with a shifted `Content-Range`
    pub fn bad_content_range(&self, start: u64) {
        self.state().faults.bad_content_range.insert(start);
    }

    /// Drop the last byte of ranged reads starting at byte `start`
    pub fn short_body(&self, start: u64) {
        self.state().faults.short_body.insert(start);
    }

    /// Declare one byte more in `Content-Length` than ranged reads starting at byte `start`
    /// actually return
    pub fn wrong_content_length(&self, start: u64) {
        self.state().faults.wrong_content_length.insert(start);
    }

    /// Flip the byte at object offset `offset` in every ranged read that covers it
    pub fn corrupt_byte(&self, offset: u64) {
        self.state().faults.corrupt_offsets.insert(offset);
    }

    /// Every request received so far
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Highest number of part requests that were in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of part requests in flight right now
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Number of multipart uploads completed
    pub fn completed_uploads(&self) -> usize {
        self.state().completed_uploads
    }

    /// Number of multipart uploads aborted
    pub fn aborted_uploads(&self) -> usize {
        self.state().aborted_uploads
    }

    /// Number of multipart uploads neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error> {
        let mut state = self.state();
        state.calls.push(Call::HeadObject {
            key: key.to_owned(),
        });
        let object = state
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no such key `{key}`")))?;
        Ok(ObjectMetadata {
            content_length: object.data.len() as u64,
            e_tag: Some(object.e_tag.clone()),
            content_type: object.headers.get_content_type().map(str::to_owned),
            version_id: None,
            server_side_encryption: object
                .headers
                .get_server_side_encryption()
                .map(str::to_owned),
            metadata: object.headers.get_metadata().clone(),
        })
    }

    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectResponse, Error> {
        let _in_flight = request.range.is_some().then(|| InFlight::enter(&self.inner));
        self.delay().await;

        let mut state = self.state();
        state.calls.push(Call::GetObject {
            key: request.key.clone(),
            range: request.range.clone(),
        });
        let object = state
            .objects
            .get(&(request.bucket.clone(), request.key.clone()))
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound, format!("no such key `{}`", request.key))
            })?;

        if let Some(if_match) = &request.if_match {
            if if_match != &object.e_tag {
                return Err(Error::new(
                    ErrorKind::Protocol,
                    "precondition failed: entity tag changed",
                ));
            }
        }

        let Some(range) = request.range else {
            return Ok(GetObjectResponse {
                content_range: None,
                content_length: Some(object.data.len() as u64),
                data: AggregatedBytes::from(object.data),
            });
        };

        let (start, len) = (*range.start(), object.data.len() as u64);
        if let Some(kind) = take_fault(&mut state.faults.get_range, &start) {
            return Err(injected(kind));
        }
        if start >= len {
            return Err(Error::new(ErrorKind::Protocol, "invalid range"));
        }
        let end = (*range.end()).min(len - 1);

        let mut data = BytesMut::from(&object.data[start as usize..=end as usize]);
        for offset in &state.faults.corrupt_offsets {
            if (start..=end).contains(offset) {
                data[(offset - start) as usize] ^= 0xff;
            }
        }
        if state.faults.short_body.contains(&start) {
            data.truncate(data.len() - 1);
        }
        let declared_len = match state.faults.wrong_content_length.contains(&start) {
            true => data.len() as u64 + 1,
            false => data.len() as u64,
        };
        let reported_start = match state.faults.bad_content_range.contains(&start) {
            true => start + 1,
            false => start,
        };

        // two segments exercise non-contiguous reads
        let data = data.freeze();
        let mut body = AggregatedBytes::new();
        let mid = data.len() / 2;
        body.push(data.slice(..mid));
        body.push(data.slice(mid..));

        Ok(GetObjectResponse {
            content_range: Some(format!("bytes {reported_start}-{end}/{len}")),
            content_length: Some(declared_len),
            data: body,
        })
    }

    async fn put_object(&self, request: PutObjectRequest) -> Result<PutObjectResponse, Error> {
        let mut state = self.state();
        state.calls.push(Call::PutObject {
            key: request.key.clone(),
        });
        if let Some(content_md5) = &request.content_md5 {
            if content_md5 != &checksum::content_md5(&request.data) {
                return Err(Error::new(ErrorKind::Integrity, "BadDigest"));
            }
        }
        let e_tag = e_tag_of(&request.data);
        state.objects.insert(
            (request.bucket, request.key),
            StoredObject {
                data: request.data,
                e_tag: e_tag.clone(),
                headers: request.headers,
            },
        );
        Ok(PutObjectResponse { e_tag: Some(e_tag) })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        let mut state = self.state();
        state.calls.push(Call::DeleteObject {
            key: key.to_owned(),
        });
        state.objects.remove(&(bucket.to_owned(), key.to_owned()));
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &ObjectHeaders,
    ) -> Result<String, Error> {
        let mut state = self.state();
        state.calls.push(Call::CreateMultipartUpload {
            key: key.to_owned(),
        });
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                headers: headers.clone(),
                parts: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(&self, request: UploadPartRequest) -> Result<String, Error> {
        let _in_flight = InFlight::enter(&self.inner);
        self.delay().await;

        let mut state = self.state();
        state.calls.push(Call::UploadPart {
            part_number: request.part_number,
            size: request.data.len(),
        });
        if let Some(kind) = take_fault(&mut state.faults.upload_part, &request.part_number) {
            return Err(injected(kind));
        }
        if let Some(content_md5) = &request.content_md5 {
            if content_md5 != &checksum::content_md5(&request.data) {
                return Err(Error::new(ErrorKind::Integrity, "BadDigest"));
            }
        }

        let e_tag = e_tag_of(&request.data);
        let upload = state.uploads.get_mut(&request.upload_id).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("no such upload `{}`", request.upload_id),
            )
        })?;
        upload
            .parts
            .insert(request.part_number, (request.data, e_tag.clone()));
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> Result<CompletedUpload, Error> {
        let mut state = self.state();
        state.calls.push(Call::CompleteMultipartUpload {
            part_numbers: request.parts.iter().map(|p| p.part_number).collect(),
        });
        if let Some((remaining, kind)) = state.faults.complete.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(injected(kind.clone()));
            }
        }

        let upload = state.uploads.get(&request.upload_id).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("no such upload `{}`", request.upload_id),
            )
        })?;
        if upload.bucket != request.bucket || upload.key != request.key {
            return Err(Error::new(ErrorKind::Protocol, "upload belongs to another key"));
        }
        if request.parts.is_empty() {
            return Err(Error::new(ErrorKind::Protocol, "MalformedXML: no parts"));
        }
        if request
            .parts
            .windows(2)
            .any(|w| w[0].part_number >= w[1].part_number)
        {
            return Err(Error::new(ErrorKind::Protocol, "InvalidPartOrder"));
        }

        let mut data = BytesMut::new();
        let mut e_tags = BytesMut::new();
        for part in &request.parts {
            let (part_data, e_tag) = upload
                .parts
                .get(&part.part_number)
                .filter(|(_, e_tag)| e_tag == &part.e_tag)
                .ok_or_else(|| Error::new(ErrorKind::Protocol, "InvalidPart"))?;
            data.extend_from_slice(part_data);
            e_tags.extend_from_slice(e_tag.as_bytes());
        }
        let e_tag = format!(
            "\"{}-{}\"",
            checksum::to_hex(md5::compute(&e_tags)),
            request.parts.len()
        );

        let Some(upload) = state.uploads.remove(&request.upload_id) else {
            return Err(Error::new(ErrorKind::NotFound, "NoSuchUpload"));
        };
        state.objects.insert(
            (upload.bucket, upload.key),
            StoredObject {
                data: data.freeze(),
                e_tag: e_tag.clone(),
                headers: upload.headers,
            },
        );
        state.completed_uploads += 1;

        Ok(CompletedUpload {
            e_tag: Some(e_tag),
            version_id: None,
        })
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), Error> {
        let mut state = self.state();
        state.calls.push(Call::AbortMultipartUpload {
            upload_id: upload_id.to_owned(),
        });
        state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "NoSuchUpload"))?;
        state.aborted_uploads += 1;
        Ok(())
    }
}
