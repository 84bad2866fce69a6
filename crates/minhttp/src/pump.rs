// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Moving bytes from a lazy source into a sink, one chunk at a time

use std::pin::{pin, Pin};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, TryStream, TryStreamExt};

/// Errors that can stop a [`pump`].
#[derive(thiserror::Error, Debug)]
pub enum PumpError<R, W> {
    /// The source failed to produce its next chunk.
    #[error("error reading source: {0}")]
    Read(R),
    /// The sink refused or failed to accept a chunk.
    #[error("error writing sink: {0}")]
    Write(W),
}

/// Drives every chunk of `source` into `sink`, returning the number of bytes moved.
///
/// Each chunk is sent *and flushed* before the next one is requested from `source`, so a slow
/// sink holds back the source instead of letting chunks pile up in memory. Once `source` is
/// exhausted, `sink` is closed.
///
/// If reading or writing fails, the pump stops immediately and `sink` is dropped *without*
/// being closed. Sinks that front a connection (such as
/// [`BodySender`](crate::writer::BodySender)) treat that as an abort and tear the connection
/// down instead of pretending the transfer finished. Failures are never retried.
///
/// Pass `&mut sink` to keep ownership of a sink whose contents are needed afterwards, as with
/// [`BufferSink`].
pub async fn pump<S, Si>(source: S, mut sink: Si) -> Result<u64, PumpError<S::Error, Si::Error>>
where
    S: TryStream<Ok = Bytes>,
    Si: Sink<Bytes> + Unpin,
{
    let mut source = pin!(source.into_stream());
    let mut pumped = 0;
    while let Some(chunk) = source.try_next().await.map_err(PumpError::Read)? {
        if chunk.is_empty() {
            continue;
        }
        let len = chunk.len() as u64;
        sink.send(chunk).await.map_err(PumpError::Write)?;
        pumped += len;
    }
    sink.close().await.map_err(PumpError::Write)?;
    Ok(pumped)
}

/// Indicates a [`BufferSink`] was offered more bytes than it's allowed to hold.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("more than {limit} bytes were supplied")]
pub struct BufferFull {
    /// Maximum number of bytes the sink accepts
    pub limit: usize,
}

/// In-memory [`Sink`] that concatenates everything it's sent, up to a limit.
#[derive(Debug)]
pub struct BufferSink {
    buffer: BytesMut,
    limit: usize,
}

impl BufferSink {
    /// Create a sink that fails with [`BufferFull`] once more than `limit` bytes are sent.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            limit,
        }
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Everything written so far.
    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

impl Sink<Bytes> for BufferSink {
    type Error = BufferFull;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, chunk: Bytes) -> Result<(), Self::Error> {
        let this = self.get_mut();
        if this.buffer.len() + chunk.len() > this.limit {
            return Err(BufferFull { limit: this.limit });
        }
        this.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::channel::mpsc;
    use futures::executor::block_on;
    use futures::StreamExt;

    fn chunks(parts: &[&'static str]) -> impl TryStream<Ok = Bytes, Error = std::io::Error> {
        let parts: Vec<_> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        futures::stream::iter(parts)
    }

    #[test]
    fn chunks_are_concatenated_in_order() {
        let mut sink = BufferSink::new(1024);
        let pumped = block_on(pump(chunks(&["Hello", ", ", "", "world", "!"]), &mut sink)).unwrap();
        assert_eq!(pumped, 13);
        assert_eq!(sink.into_bytes(), "Hello, world!");
    }

    #[test]
    fn empty_source_pumps_nothing() {
        let mut sink = BufferSink::new(0);
        let pumped = block_on(pump(chunks(&[]), &mut sink)).unwrap();
        assert_eq!(pumped, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn read_failures_stop_the_pump() {
        let source = futures::stream::iter([
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset)),
            Ok(Bytes::from_static(b"never read")),
        ]);
        let mut sink = BufferSink::new(1024);
        let err = block_on(pump(source, &mut sink)).unwrap_err();
        match err {
            PumpError::Read(err) => assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset),
            PumpError::Write(_) => panic!("expected a read error"),
        }
        assert_eq!(sink.into_bytes(), "partial");
    }

    #[test]
    fn oversized_sources_overflow_the_buffer() {
        let mut sink = BufferSink::new(8);
        let err = block_on(pump(chunks(&["12345", "67890"]), &mut sink)).unwrap_err();
        assert!(matches!(err, PumpError::Write(BufferFull { limit: 8 })));
        assert_eq!(sink.len(), 5);
    }

    #[test]
    fn dropped_receivers_fail_the_pump() {
        let (tx, rx) = mpsc::channel::<Bytes>(0);
        drop(rx);
        let err = block_on(pump(chunks(&["nobody is listening"]), tx)).unwrap_err();
        assert!(matches!(err, PumpError::Write(_)));
    }

    #[tokio::test]
    async fn next_chunk_waits_for_the_previous_write() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let pulled2 = pulled.clone();
        let source = chunks(&["a", "b", "c"]).inspect_ok(move |_| {
            pulled2.fetch_add(1, Ordering::SeqCst);
        });
        let (tx, mut rx) = mpsc::channel::<Bytes>(0);
        let pumping = tokio::spawn(pump(source, tx));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // First chunk is sitting in the channel; the pump must not have asked for the second.
        assert_eq!(pulled.load(Ordering::SeqCst), 1);

        assert_eq!(rx.next().await.unwrap(), "a");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pulled.load(Ordering::SeqCst), 2);

        assert_eq!(rx.next().await.unwrap(), "b");
        assert_eq!(rx.next().await.unwrap(), "c");
        assert_eq!(rx.next().await, None);
        assert_eq!(pumping.await.unwrap().unwrap(), 3);
    }
}
