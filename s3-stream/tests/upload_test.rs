/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::Duration;

use bytes::Bytes;
use s3_stream::checksum::digest_key;
use s3_stream::error::{Error, ErrorKind};
use s3_stream::test_util::{Call, InMemoryBackend};
use s3_stream::ObjectHeaders;
use tokio::io::AsyncWriteExt;

mod test_utils;
use test_utils::{account, config, init_tracing, md5_hex, rand_data};

fn uploaded_parts(mem: &InMemoryBackend) -> Vec<(i32, usize)> {
    mem.calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::UploadPart { part_number, size } => Some((part_number, size)),
            _ => None,
        })
        .collect()
}

fn completions(mem: &InMemoryBackend) -> Vec<Vec<i32>> {
    mem.calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::CompleteMultipartUpload { part_numbers } => Some(part_numbers),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_upload_parts_and_digest() {
    init_tracing();
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).part_size(5).build().unwrap());

    let mut writer = s3
        .bucket("bucket")
        .put_writer("/dir/key", None, None)
        .await
        .unwrap();
    writer.write_all(b"hello ").await.unwrap();
    writer.write_all(b"world!").await.unwrap();
    assert_eq!(12, writer.bytes_written());
    let output = writer.close().await.unwrap();

    assert_eq!(3, output.part_count);
    assert_eq!(12, output.content_length);
    assert_eq!(md5_hex(b"hello world!"), output.md5);
    assert!(output.e_tag.as_deref().unwrap().ends_with("-3\""));

    assert_eq!(
        Some(Bytes::from_static(b"hello world!")),
        mem.object("bucket", "dir/key")
    );
    assert_eq!(
        Some(Bytes::from(md5_hex(b"hello world!"))),
        mem.object("bucket", &digest_key("dir/key"))
    );

    let mut parts = uploaded_parts(&mem);
    parts.sort();
    assert_eq!(vec![(1, 5), (2, 5), (3, 2)], parts);
    assert_eq!(vec![vec![1, 2, 3]], completions(&mem));
    assert_eq!(1, mem.completed_uploads());
    assert_eq!(0, mem.open_uploads());
}

#[tokio::test]
async fn test_less_than_one_part() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).part_size(10).build().unwrap());
    let data = rand_data(9);

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(&data).await.unwrap();
    let output = writer.close().await.unwrap();

    assert_eq!(1, output.part_count);
    assert_eq!(vec![(1, 9)], uploaded_parts(&mem));
    assert_eq!(vec![vec![1]], completions(&mem));
    assert_eq!(Some(data), mem.object("bucket", "key"));
}

#[tokio::test]
async fn test_exact_multiple_of_part_size() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).part_size(4).build().unwrap());
    let data = rand_data(16);

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(&data).await.unwrap();
    let output = writer.close().await.unwrap();

    assert_eq!(4, output.part_count);
    assert_eq!(Some(data), mem.object("bucket", "key"));
}

#[tokio::test]
async fn test_failed_part_aborts_upload() {
    init_tracing();
    let mem = InMemoryBackend::new();
    let s3 = account(
        config(&mem)
            .part_size(10)
            .concurrency(2)
            .max_retries(2)
            .build()
            .unwrap(),
    );
    // third of five parts fails on every attempt
    mem.fail_upload_part(3, 3, ErrorKind::Transport);

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    let _ = writer.write_all(&rand_data(50)).await;
    let err = writer.close().await.unwrap_err();
    match err.kind() {
        ErrorKind::ChunkFailed(chunk) => {
            assert_eq!(2, chunk.part_index());
            assert!(chunk.is_upload());
        }
        kind => panic!("unexpected error kind {kind:?}"),
    }

    assert_eq!(
        3,
        uploaded_parts(&mem).iter().filter(|(n, _)| *n == 3).count()
    );
    assert!(completions(&mem).is_empty());
    assert_eq!(1, mem.aborted_uploads());
    assert_eq!(0, mem.open_uploads());
    assert_eq!(None, mem.object("bucket", "key"));
    assert_eq!(None, mem.object("bucket", &digest_key("key")));
}

#[tokio::test]
async fn test_transient_part_failure_retried() {
    let mem = InMemoryBackend::new();
    let s3 = account(
        config(&mem)
            .part_size(10)
            .concurrency(2)
            .max_retries(3)
            .build()
            .unwrap(),
    );
    mem.fail_upload_part(3, 3, ErrorKind::Transport);
    let data = rand_data(50);

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(&data).await.unwrap();
    let output = writer.close().await.unwrap();

    assert_eq!(5, output.part_count);
    assert_eq!(Some(data.clone()), mem.object("bucket", "key"));
    assert_eq!(vec![(1..=5).collect::<Vec<_>>()], completions(&mem));
    // the retried part is sent with the same payload every time
    let attempts: Vec<_> = uploaded_parts(&mem)
        .into_iter()
        .filter(|(n, _)| *n == 3)
        .collect();
    assert_eq!(vec![(3, 10); 4], attempts);
    assert_eq!(0, mem.aborted_uploads());
    assert_eq!(
        Some(Bytes::from(md5_hex(&data))),
        mem.object("bucket", &digest_key("key"))
    );
}

#[tokio::test]
async fn test_failure_surfaces_on_write() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).part_size(10).max_retries(0).build().unwrap());
    mem.fail_upload_part(1, 1, ErrorKind::Transport);

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(&rand_data(10)).await.unwrap();
    // part 1 is dispatched by the next write and fails in the background
    writer.write_all(&rand_data(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = writer.write_all(&rand_data(1)).await.unwrap_err();
    let err = Error::from_io(&err).unwrap();
    assert!(matches!(err.kind(), ErrorKind::ChunkFailed(_)));

    let err = writer.close().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ChunkFailed(_)));
    assert_eq!(1, mem.aborted_uploads());
}

#[tokio::test]
async fn test_non_transient_failure_not_retried() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).part_size(4).build().unwrap());
    mem.fail_upload_part(1, 1, ErrorKind::Integrity);

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    let _ = writer.write_all(b"abcdefgh").await;
    let err = writer.close().await.unwrap_err();
    assert_eq!(&ErrorKind::Integrity, err.kind());
    assert_eq!(
        1,
        uploaded_parts(&mem).iter().filter(|(n, _)| *n == 1).count()
    );
    assert_eq!(1, mem.aborted_uploads());
}

#[tokio::test]
async fn test_completion_failure_aborts() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).part_size(4).build().unwrap());
    mem.fail_complete(1, ErrorKind::Protocol);

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(b"abcdefgh").await.unwrap();
    let err = writer.close().await.unwrap_err();
    assert_eq!(&ErrorKind::Protocol, err.kind());
    assert_eq!(1, mem.aborted_uploads());
    assert_eq!(None, mem.object("bucket", "key"));
}

#[tokio::test]
async fn test_in_flight_parts_bounded() {
    let mem = InMemoryBackend::new().with_random_delay(Duration::from_millis(3));
    let s3 = account(config(&mem).part_size(8).concurrency(2).build().unwrap());
    let data = rand_data(8 * 20 + 3);

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    for chunk in data.chunks(7) {
        writer.write_all(chunk).await.unwrap();
    }
    let output = writer.close().await.unwrap();

    assert_eq!(21, output.part_count);
    assert!(mem.max_in_flight() <= 2);
    assert_eq!(Some(data), mem.object("bucket", "key"));
    assert_eq!(vec![(1..=21).collect::<Vec<_>>()], completions(&mem));
}

#[tokio::test]
async fn test_object_headers() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).build().unwrap());
    let headers = ObjectHeaders::new()
        .content_type("application/json")
        .cache_control("no-cache")
        .metadata("owner", "ops");

    let mut writer = s3
        .bucket("bucket")
        .put_writer("key.json", Some(headers.clone()), None)
        .await
        .unwrap();
    writer.write_all(b"{}").await.unwrap();
    writer.close().await.unwrap();

    assert_eq!(Some(headers), mem.object_headers("bucket", "key.json"));
    let digest_headers = mem.object_headers("bucket", &digest_key("key.json")).unwrap();
    assert_eq!(Some("text/plain"), digest_headers.get_content_type());
}

#[tokio::test]
async fn test_empty_object() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).build().unwrap());

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    let output = writer.close().await.unwrap();
    assert_eq!(1, output.part_count);
    assert_eq!(0, output.content_length);
    assert_eq!(vec![(1, 0)], uploaded_parts(&mem));
    assert_eq!(Some(Bytes::new()), mem.object("bucket", "key"));
}

#[tokio::test]
async fn test_shutdown_completes_upload() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).verify_checksum(false).build().unwrap());

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(b"shutdown").await.unwrap();
    writer.shutdown().await.unwrap();

    assert_eq!(Some(Bytes::from_static(b"shutdown")), mem.object("bucket", "key"));
    // no digest without verification
    assert_eq!(None, mem.object("bucket", &digest_key("key")));
}

#[tokio::test]
async fn test_use_after_close() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).build().unwrap());

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(b"data").await.unwrap();
    writer.close().await.unwrap();

    let err = writer.close().await.unwrap_err();
    assert_eq!(&ErrorKind::InputInvalid, err.kind());

    let err = writer.write_all(b"more").await.unwrap_err();
    let err = Error::from_io(&err).unwrap();
    assert_eq!(&ErrorKind::InputInvalid, err.kind());
    assert_eq!(1, completions(&mem).len());
}

#[tokio::test]
async fn test_abort() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).part_size(4).build().unwrap());

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(b"abcdefghij").await.unwrap();
    writer.abort().await.unwrap();

    assert_eq!(1, mem.aborted_uploads());
    assert_eq!(None, mem.object("bucket", "key"));
    assert!(completions(&mem).is_empty());

    let err = writer.close().await.unwrap_err();
    assert_eq!(&ErrorKind::InputInvalid, err.kind());
}

#[tokio::test]
async fn test_drop_aborts_in_background() {
    let mem = InMemoryBackend::new();
    let s3 = account(config(&mem).part_size(4).build().unwrap());

    let mut writer = s3.bucket("bucket").put_writer("key", None, None).await.unwrap();
    writer.write_all(b"abcdefghij").await.unwrap();
    drop(writer);

    for _ in 0..100 {
        if mem.aborted_uploads() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(1, mem.aborted_uploads());
    assert_eq!(0, mem.open_uploads());
}
