//! rollcall-hw: V4L2 camera capture for attendance sessions.
//!
//! Opens a capture device, negotiates a grayscale-convertible pixel
//! format, and streams frames already converted to 8-bit luminance.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
