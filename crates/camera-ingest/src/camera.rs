//! OpenCV-backed camera capture.
//!
//! The device is opened synchronously so that an unavailable camera surfaces
//! to the caller before any frame is produced. A background thread then reads
//! frames and forwards them over a small bounded channel, which backpressures
//! the reader when the consumer falls behind. Dropping the receiver closes the
//! channel; the reader thread notices on its next send and releases the
//! device.

use std::thread;

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::types::{CaptureError, Frame, FrameFormat};

/// Frames delivered by the capture thread. The channel closing means
/// end-of-stream: either the device stopped producing frames or the consumer
/// went away.
pub type FrameReceiver = Receiver<Result<Frame, CaptureError>>;

const CHANNEL_CAPACITY: usize = 2;

/// Open the camera at `uri` and start delivering BGR8 frames at `target_size`.
///
/// Returns an error if the device cannot be opened. A mid-stream read failure
/// is treated as end-of-stream: the channel closes without an error value and
/// the device is released.
pub fn start_capture(uri: &str, target_size: (i32, i32)) -> Result<FrameReceiver, CaptureError> {
    let mut cap = open_video_capture(uri)?;
    configure_camera(&mut cap, target_size, 30.0);

    let (tx, rx) = bounded(CHANNEL_CAPACITY);
    let _reader = thread::Builder::new()
        .name("camera-ingest".into())
        .spawn(move || {
            capture_loop(cap, target_size, tx);
            debug!("camera released");
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(rx)
}

/// Read frames until the device stops producing them or the receiver is gone.
fn capture_loop(mut cap: VideoCapture, target_size: (i32, i32), tx: Sender<Result<Frame, CaptureError>>) {
    let mut frame = Mat::default();
    let mut scratch = Mat::default();
    let (target_w, target_h) = target_size;

    loop {
        let grabbed = match cap.read(&mut frame) {
            Ok(grabbed) => grabbed,
            Err(err) => {
                warn!("camera read failed: {err}");
                break;
            }
        };
        let size = match frame.size() {
            Ok(size) => size,
            Err(err) => {
                warn!("camera frame size query failed: {err}");
                break;
            }
        };
        if !grabbed || size.width <= 0 {
            debug!("camera returned no frame, ending capture");
            break;
        }

        // Some devices ignore the resolution request; normalise here.
        let working = if size.width != target_w || size.height != target_h {
            let resized = opencv::imgproc::resize(
                &frame,
                &mut scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            );
            if let Err(err) = resized {
                warn!("frame resize failed: {err}");
                break;
            }
            &scratch
        } else {
            &frame
        };

        let data = match working.data_bytes() {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                warn!("frame buffer access failed: {err}");
                break;
            }
        };

        let packet = Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        };
        if tx.send(Ok(packet)).is_err() {
            break;
        }
    }
}

/// Parse a device index out of a bare number or `/dev/videoX` path.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

/// Attempt to open the camera either by index or URI, preferring V4L.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply resolution, fps, and preferred pixel format to the opened device.
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    let mut fourcc_set = false;
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
            fourcc_set = true;
        }
    }
    if !fourcc_set {
        if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
            let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
        }
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}

#[cfg(test)]
mod tests {
    use super::parse_device_index;

    #[test]
    fn parses_bare_index() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("3"), Some(3));
    }

    #[test]
    fn parses_dev_video_path() {
        assert_eq!(parse_device_index("/dev/video0"), Some(0));
        assert_eq!(parse_device_index("/dev/video12"), Some(12));
    }

    #[test]
    fn rejects_non_device_uris() {
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("rtsp://camera/stream"), None);
    }
}
