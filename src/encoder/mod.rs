//! Frame to JPEG adapter
//!
//! JPEG frames pass through untouched. Raw frames are compressed either into
//! one owned buffer ([`encode_frame`], [`into_jpeg`]) or straight into a
//! [`ChunkSink`] as the encoder produces output ([`encode_chunked`]).

mod convert;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageEncoder, ImageError};
use std::io::{self, BufWriter, Write};
use thiserror::Error;
use tracing::debug;

use crate::camera::{FrameBuffer, FrameLease};
use crate::sink::{ChunkSink, SinkError};

/// Quality used when compressing raw frames
pub const DEFAULT_QUALITY: u8 = 80;

/// Size of the chunks handed to a sink in chunked mode
pub const CHUNK_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("JPEG compression failed: {0}")]
    Jpeg(#[from] ImageError),

    #[error("frame payload is {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("chunk sink rejected output: {0}")]
    Sink(#[source] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// JPEG bytes for one frame
pub enum JpegData<'a> {
    /// The camera produced JPEG; the frame stays leased until this is dropped
    Native(FrameLease<'a>),
    /// Compressed copy of a raw frame; the camera buffer is already back
    Encoded(Vec<u8>),
}

impl JpegData<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            JpegData::Native(lease) => lease.data(),
            JpegData::Encoded(buf) => buf,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_native(&self) -> bool {
        matches!(self, JpegData::Native(_))
    }
}

/// Turns a leased frame into JPEG bytes
///
/// Raw frames are compressed and their lease ends right after compression,
/// whether or not it succeeded.
pub fn into_jpeg(lease: FrameLease<'_>, quality: u8) -> Result<JpegData<'_>, EncodeError> {
    if lease.format().is_jpeg() {
        return Ok(JpegData::Native(lease));
    }

    let encoded = encode_frame(lease.frame(), quality);
    drop(lease);
    Ok(JpegData::Encoded(encoded?))
}

/// Compresses a raw frame into one contiguous buffer
///
/// A JPEG frame is copied as-is.
pub fn encode_frame(frame: &FrameBuffer, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(frame.len() / 8);
    encode_into(frame, quality, &mut out)?;
    Ok(out)
}

/// Compresses a frame into `sink`, chunk by chunk
///
/// The first sink failure stops the encoder; nothing more is offered to the
/// sink afterwards. Returns the number of bytes delivered.
pub fn encode_chunked<S>(frame: &FrameBuffer, quality: u8, sink: &mut S) -> Result<usize, EncodeError>
where
    S: ChunkSink + ?Sized,
{
    let mut writer = SinkWriter::new(sink);

    let result = {
        let mut buffered = BufWriter::with_capacity(CHUNK_SIZE, &mut writer);
        encode_into(frame, quality, &mut buffered).and_then(|()| {
            buffered.flush()?;
            Ok(())
        })
    };

    if let Some(err) = writer.failure.take() {
        return Err(EncodeError::Sink(err));
    }
    result?;

    debug!(bytes = %writer.written, chunks = %writer.chunks, "Chunked JPEG complete");
    Ok(writer.written)
}

fn encode_into<W: Write>(frame: &FrameBuffer, quality: u8, out: &mut W) -> Result<(), EncodeError> {
    let Some(bpp) = frame.format.bytes_per_pixel() else {
        out.write_all(&frame.data)?;
        return Ok(());
    };

    let expected = frame.width as usize * frame.height as usize * bpp;
    if frame.len() != expected {
        return Err(EncodeError::BufferSize {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.len(),
        });
    }

    let Some((pixels, color)) = convert::encoder_input(frame) else {
        out.write_all(&frame.data)?;
        return Ok(());
    };

    // YUYV packs pixel pairs, so an odd pixel count cannot be expanded
    let channels = usize::from(color.channel_count());
    if pixels.len() != frame.width as usize * frame.height as usize * channels {
        return Err(EncodeError::BufferSize {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.len(),
        });
    }

    JpegEncoder::new_with_quality(out, quality.clamp(1, 100)).write_image(
        &pixels,
        frame.width,
        frame.height,
        color,
    )?;
    Ok(())
}

/// `io::Write` front for a chunk sink that latches the first failure
struct SinkWriter<'s, S: ChunkSink + ?Sized> {
    sink: &'s mut S,
    failure: Option<SinkError>,
    failed: bool,
    written: usize,
    chunks: usize,
}

impl<'s, S: ChunkSink + ?Sized> SinkWriter<'s, S> {
    fn new(sink: &'s mut S) -> Self {
        Self {
            sink,
            failure: None,
            failed: false,
            written: 0,
            chunks: 0,
        }
    }
}

impl<S: ChunkSink + ?Sized> Write for SinkWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "chunk sink closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        match self.sink.send_chunk(buf) {
            Ok(()) => {
                self.written += buf.len();
                self.chunks += 1;
                Ok(buf.len())
            }
            Err(e) => {
                self.failed = true;
                self.failure = Some(e);
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "chunk sink closed"))
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
