//! Camera capture for the hand streaming service.
//!
//! Wraps OpenCV `VideoCapture` behind a channel-based API: the device is
//! opened up front, frames arrive on a bounded channel from a background
//! reader thread, and dropping the receiver releases the device.

pub use camera::{start_capture, FrameReceiver};
pub use types::{CaptureError, Frame, FrameFormat};

mod camera;
mod types;
