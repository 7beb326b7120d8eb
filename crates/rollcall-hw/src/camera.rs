//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel, native IR camera output).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Request YUYV at 640x360; accept GREY or Y16 when the driver
        // negotiates those instead (IR cameras commonly do).
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 640;
        fmt.height = 360;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start a capture stream for continuous per-frame polling.
    ///
    /// The returned stream borrows the camera; the attendance loop holds
    /// one for its whole lifetime rather than re-mapping buffers per frame.
    pub fn stream(&self) -> Result<CameraStream<'_>, CameraError> {
        let stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        Ok(CameraStream { camera: self, stream })
    }

    /// Convert a raw buffer to grayscale based on the negotiated format.
    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;

        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Y16 => {
                let expected = pixels * 2;
                if buf.len() < expected {
                    return Err(CameraError::CaptureFailed(format!(
                        "Y16 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                // 16-bit little-endian per pixel, keep the high byte.
                let mut gray = Vec::with_capacity(pixels);
                for idx in 0..pixels {
                    let value = u16::from_le_bytes([buf[idx * 2], buf[idx * 2 + 1]]);
                    gray.push((value >> 8) as u8);
                }
                Ok(gray)
            }
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }
}

/// Live capture stream over an open camera.
pub struct CameraStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl CameraStream<'_> {
    /// Dequeue the next frame, converted to grayscale and flagged for
    /// darkness.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = self.camera.buf_to_grayscale(buf)?;
        let is_dark = frame::is_dark_frame(&gray, 0.95);

        Ok(Frame {
            data: gray,
            width: self.camera.width,
            height: self.camera.height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
            is_dark,
        })
    }
}
