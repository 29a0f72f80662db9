//! Grayscale frames and pixel format conversion.
//!
//! Detection always runs on 8-bit grayscale, so every negotiated camera
//! format converges here before leaving the crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{format} buffer too short: expected {expected} bytes, got {actual}")]
    BufferTooShort {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// One captured frame, already converted to grayscale.
#[derive(Clone)]
pub struct Frame {
    /// Row-major luminance, `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    /// Driver sequence number, for spotting drops in logs.
    pub sequence: u32,
}

/// Extract the Y channel from packed YUYV 4:2:2.
///
/// Two pixels per 4 bytes, laid out [Y0, U, Y1, V]: luminance is every
/// even byte.
pub fn yuyv_to_gray(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::BufferTooShort {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits by dropping the
/// low byte.
pub fn y16_to_gray(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if y16.len() < expected {
        return Err(FrameError::BufferTooShort {
            format: "Y16",
            expected,
            actual: y16.len(),
        });
    }

    let mut gray = Vec::with_capacity(pixels);
    for pixel in 0..pixels {
        let value = u16::from_le_bytes([y16[pixel * 2], y16[pixel * 2 + 1]]);
        gray.push((value >> 8) as u8);
    }
    Ok(gray)
}

/// Pass through native 8-bit grayscale, trimming any driver slack.
pub fn grey_to_gray(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::BufferTooShort {
            format: "GREY",
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].to_vec())
}
