//! rollcall-hw — Hardware abstraction for camera capture.
//!
//! V4L2-based camera access plus the grayscale frame processing the
//! attendance loop needs (YUYV conversion, dark-frame rejection, CLAHE,
//! mirroring).

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, PixelFormat};
pub use frame::Frame;
