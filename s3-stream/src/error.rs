/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// Errors are cheap to clone. A transfer records the first fatal error it encounters and
/// returns a clone of it from every later read, write, or close call.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    source: Arc<dyn std::error::Error + Send + Sync>,
}

/// General categories of transfer errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid input or API misuse (e.g. writing after close)
    InputInvalid,

    /// I/O errors
    IOError,

    /// Some kind of internal runtime issue (e.g. task failure, poisoned mutex, etc)
    RuntimeError,

    /// Object discovery failed
    ObjectNotDiscoverable,

    /// A transient failure talking to the service (network error, timeout, 5xx).
    ///
    /// This is the only kind of error that is retried.
    Transport,

    /// The service responded with something that retrying cannot fix
    /// (unexpected status, malformed or mismatched `Content-Range`, missing headers).
    Protocol,

    /// Resource not found (e.g. bucket, key, multipart upload ID not found)
    NotFound,

    /// Data failed an integrity check (digest mismatch, wrong part length, bad `Content-MD5`)
    Integrity,

    /// A part failed with a transient error and exhausted its retries
    ChunkFailed(ChunkFailed),

    /// The transfer was closed or aborted before it finished
    OperationCancelled,
}

/// Stores information about a failed part
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChunkFailed {
    id: ChunkId,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ChunkId {
    /// zero based sequence number of a download part
    Download(u64),
    /// zero based index of an upload part (part number - 1)
    Upload(u64),
}

impl ChunkFailed {
    /// The zero based index of the part that failed
    pub fn part_index(&self) -> u64 {
        match self.id {
            ChunkId::Download(seq) | ChunkId::Upload(seq) => seq,
        }
    }

    /// Whether the failed part belonged to an upload
    pub fn is_upload(&self) -> bool {
        matches!(self.id, ChunkId::Upload(_))
    }
}

impl Error {
    /// Creates a new transfer [`Error`] from a known kind of error as well as an arbitrary error
    /// source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: Arc::from(err.into()),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Whether this error is transient and the request that produced it may be retried
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transport
    }

    /// Recover the transfer error carried by an [`std::io::Error`] returned from
    /// `AsyncRead`/`AsyncWrite` on a [`Getter`](crate::Getter) or [`Putter`](crate::Putter).
    pub fn from_io(err: &std::io::Error) -> Option<&Error> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<Error>())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InputInvalid => write!(f, "invalid input"),
            ErrorKind::IOError => write!(f, "I/O error"),
            ErrorKind::RuntimeError => write!(f, "runtime error"),
            ErrorKind::ObjectNotDiscoverable => write!(f, "object discovery failed"),
            ErrorKind::Transport => write!(f, "transport error"),
            ErrorKind::Protocol => write!(f, "unexpected service response"),
            ErrorKind::NotFound => write!(f, "resource not found"),
            ErrorKind::Integrity => write!(f, "integrity check failed"),
            ErrorKind::ChunkFailed(chunk_failed) => {
                write!(f, "failed to process chunk {:?}", chunk_failed.id)
            }
            ErrorKind::OperationCancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::IOError, value)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        std::io::Error::other(value)
    }
}

pub(crate) fn invalid_input<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InputInvalid, err)
}

pub(crate) fn discovery_failed<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::ObjectNotDiscoverable, err)
}

pub(crate) fn protocol<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::Protocol, err)
}

pub(crate) fn integrity<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::Integrity, err)
}

pub(crate) fn transport<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::Transport, err)
}

pub(crate) fn chunk_failed(id: ChunkId, err: Error) -> Error {
    Error::new(ErrorKind::ChunkFailed(ChunkFailed { id }), err)
}

static CANCELLATION_ERROR: &str = "the transfer was closed before it finished";

pub(crate) fn operation_cancelled() -> Error {
    Error::new(ErrorKind::OperationCancelled, CANCELLATION_ERROR)
}
