//! Chunk sinks for chunked HTTP bodies
//!
//! The stream loop and the chunked JPEG encoder both hand their output to a
//! [`ChunkSink`] one slice at a time. Any error from the sink means the
//! consumer is gone and the producer must stop writing.

use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("chunk sink closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Accepts successive body chunks
pub trait ChunkSink {
    /// Delivers one chunk. An error means no further chunk will be accepted.
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError>;
}

impl<S: ChunkSink + ?Sized> ChunkSink for &mut S {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        (**self).send_chunk(chunk)
    }
}

impl ChunkSink for Vec<u8> {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// Item type carried to the HTTP body
pub type BodyChunk = Result<Bytes, io::Error>;

/// Sink that forwards chunks into a bounded channel drained by an HTTP body
///
/// Meant for blocking threads: a full channel blocks the caller, and a
/// dropped receiver turns the next send into [`SinkError::Closed`].
pub struct ChannelSink {
    tx: mpsc::Sender<BodyChunk>,
    bytes_sent: u64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<BodyChunk>) -> Self {
        Self { tx, bytes_sent: 0 }
    }

    /// Creates a sink and the receiving half for the body
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self::new(tx), rx)
    }

    /// Terminates the body with an error so the connection is aborted
    /// rather than completed
    pub fn abort(self, reason: impl ToString) {
        let err = io::Error::new(io::ErrorKind::Other, reason.to_string());
        let _ = self.tx.blocking_send(Err(err));
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl ChunkSink for ChannelSink {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(chunk)))
            .map_err(|_| SinkError::Closed)?;
        self.bytes_sent += chunk.len() as u64;
        Ok(())
    }
}
