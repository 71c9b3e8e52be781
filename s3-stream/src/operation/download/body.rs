/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

use crate::error::Error;
use crate::io::AggregatedBytes;
use crate::runtime::scheduler::OwnedWorkPermit;

/// Stream of object parts, re-sequenced into the correct order.
///
/// Parts arrive from the workers in completion order; each one is held until every part
/// before it has been handed out.
#[derive(Debug)]
pub(crate) struct Body {
    chunks: BodyChannel,
    sequencer: Sequencer,
}

pub(crate) type BodyChannel = mpsc::Receiver<Result<ChunkOutput, Error>>;

/// The content of a single ranged GET.
///
/// Carries the work permit the part was fetched under; the permit is released once the part
/// has been fully read or discarded.
#[derive(Debug)]
pub(crate) struct ChunkOutput {
    pub(crate) seq: u64,
    pub(crate) data: AggregatedBytes,
    _permit: Option<OwnedWorkPermit>,
}

impl ChunkOutput {
    pub(crate) fn new(seq: u64, data: AggregatedBytes, permit: Option<OwnedWorkPermit>) -> Self {
        Self {
            seq,
            data,
            _permit: permit,
        }
    }
}

impl Body {
    pub(crate) fn new(chunks: BodyChannel) -> Self {
        Self {
            chunks,
            sequencer: Sequencer::new(),
        }
    }

    /// Sequence number of the next part to be handed out
    pub(crate) fn next_seq(&self) -> u64 {
        self.sequencer.next_seq
    }

    /// Poll for the next part in sequence.
    ///
    /// Returns `None` once every sender is gone. A worker error is returned as soon as it is
    /// received, ahead of any parts still buffered.
    pub(crate) fn poll_next(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<ChunkOutput, Error>>> {
        loop {
            if self.sequencer.is_ordered() {
                let chunk = self.sequencer.pop();
                self.sequencer.advance();
                return Poll::Ready(chunk.map(Ok));
            }

            match self.chunks.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.sequencer.push(chunk),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    /// Pull the next part in sequence
    #[cfg(test)]
    pub(crate) async fn next(&mut self) -> Option<Result<ChunkOutput, Error>> {
        std::future::poll_fn(|cx| self.poll_next(cx)).await
    }

    /// Close the body; no more data will flow from it and all publishers will be notified.
    ///
    /// Buffered parts are dropped, releasing their permits.
    pub(crate) fn close(&mut self) {
        self.chunks.close();
        self.sequencer.chunks.clear();
    }
}

#[derive(Debug)]
struct Sequencer {
    /// next expected sequence
    next_seq: u64,
    chunks: BinaryHeap<cmp::Reverse<SequencedChunk>>,
}

impl Sequencer {
    fn new() -> Self {
        Self {
            chunks: BinaryHeap::with_capacity(8),
            next_seq: 0,
        }
    }

    fn push(&mut self, chunk: ChunkOutput) {
        self.chunks.push(cmp::Reverse(SequencedChunk(chunk)))
    }

    fn pop(&mut self) -> Option<ChunkOutput> {
        self.chunks.pop().map(|c| c.0 .0)
    }

    fn is_ordered(&self) -> bool {
        self.peek().is_some_and(|next| next.seq == self.next_seq)
    }

    fn peek(&self) -> Option<&ChunkOutput> {
        self.chunks.peek().map(|c| &c.0 .0)
    }

    fn advance(&mut self) {
        self.next_seq += 1
    }
}

#[derive(Debug)]
struct SequencedChunk(ChunkOutput);

impl Ord for SequencedChunk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.seq.cmp(&other.0.seq)
    }
}

impl PartialOrd for SequencedChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for SequencedChunk {}
impl PartialEq for SequencedChunk {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::{mpsc, Semaphore};

    use super::{AggregatedBytes, Body, ChunkOutput, Sequencer};
    use crate::error::{self, ErrorKind};

    fn part(seq: u64) -> ChunkOutput {
        let data = Bytes::from(format!("part-{seq}"));
        ChunkOutput::new(seq, AggregatedBytes::from(data), None)
    }

    fn text(chunk: ChunkOutput) -> String {
        String::from_utf8(chunk.data.to_vec()).unwrap()
    }

    #[test]
    fn test_sequencer_holds_gaps() {
        let mut sequencer = Sequencer::new();
        sequencer.push(part(2));
        sequencer.push(part(1));
        assert!(!sequencer.is_ordered());
        assert_eq!(1, sequencer.peek().unwrap().seq);

        sequencer.push(part(0));
        assert!(sequencer.is_ordered());
        assert_eq!(0, sequencer.pop().unwrap().seq);
        sequencer.advance();
        assert!(sequencer.is_ordered());
    }

    #[tokio::test]
    async fn test_parts_released_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let mut body = Body::new(rx);
        for seq in [3, 1, 0, 2] {
            tx.send(Ok(part(seq))).await.unwrap();
        }
        drop(tx);

        let mut received = Vec::new();
        while let Some(chunk) = body.next().await {
            received.push(text(chunk.unwrap()));
        }
        assert_eq!(vec!["part-0", "part-1", "part-2", "part-3"], received);
        assert_eq!(4, body.next_seq());
    }

    #[tokio::test]
    async fn test_error_skips_buffered_parts() {
        let (tx, rx) = mpsc::channel(4);
        let mut body = Body::new(rx);
        tx.send(Ok(part(1))).await.unwrap();
        tx.send(Err(error::integrity("short body"))).await.unwrap();

        let err = body.next().await.unwrap().unwrap_err();
        assert_eq!(&ErrorKind::Integrity, err.kind());
        assert_eq!(0, body.next_seq());
    }

    #[tokio::test]
    async fn test_close_releases_permits() {
        let permits = Arc::new(Semaphore::new(2));
        let (tx, rx) = mpsc::channel(4);
        let mut body = Body::new(rx);
        for seq in [1, 2] {
            let permit = permits.clone().acquire_owned().await.unwrap();
            let data = AggregatedBytes::from(Bytes::from_static(b"x"));
            tx.send(Ok(ChunkOutput::new(seq, data, Some(permit.into()))))
                .await
                .unwrap();
        }

        // neither part is next in sequence, so both stay buffered
        drop(tx);
        assert!(body.next().await.is_none());
        assert_eq!(0, permits.available_permits());

        body.close();
        assert_eq!(2, permits.available_permits());
    }
}
