//! Raw pixel layouts to JPEG encoder input

use image::ExtendedColorType;
use std::borrow::Cow;

use crate::camera::{FrameBuffer, PixelFormat};

/// Encoder-ready pixels for a raw frame, borrowed when no conversion is needed
pub(crate) fn encoder_input(frame: &FrameBuffer) -> Option<(Cow<'_, [u8]>, ExtendedColorType)> {
    let data = frame.data.as_slice();
    match frame.format {
        PixelFormat::Jpeg => None,
        PixelFormat::Grayscale => Some((Cow::Borrowed(data), ExtendedColorType::L8)),
        PixelFormat::Rgb888 => Some((Cow::Borrowed(data), ExtendedColorType::Rgb8)),
        PixelFormat::Rgb565 => Some((Cow::Owned(rgb565_to_rgb(data)), ExtendedColorType::Rgb8)),
        PixelFormat::Yuv422 => Some((Cow::Owned(yuyv_to_rgb(data)), ExtendedColorType::Rgb8)),
    }
}

/// Big-endian RGB565 to RGB8, replicating high bits into the low bits
pub(crate) fn rgb565_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for px in data.chunks_exact(2) {
        let v = u16::from_be_bytes([px[0], px[1]]);
        let r = ((v >> 11) & 0x1F) as u8;
        let g = ((v >> 5) & 0x3F) as u8;
        let b = (v & 0x1F) as u8;
        rgb.extend_from_slice(&[r << 3 | r >> 2, g << 2 | g >> 4, b << 3 | b >> 2]);
    }
    rgb
}

/// YUYV 4:2:2 to RGB8
pub(crate) fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 4 * 6);
    for chunk in data.chunks_exact(4) {
        let (r0, g0, b0) = yuv_to_rgb(chunk[0], chunk[1], chunk[3]);
        let (r1, g1, b1) = yuv_to_rgb(chunk[2], chunk[1], chunk[3]);
        rgb.extend_from_slice(&[r0, g0, b0, r1, g1, b1]);
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = i32::from(y);
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;
    let r = (y + ((359 * v) >> 8)).clamp(0, 255) as u8;
    let g = (y - ((88 * u + 183 * v) >> 8)).clamp(0, 255) as u8;
    let b = (y + ((454 * u) >> 8)).clamp(0, 255) as u8;
    (r, g, b)
}
