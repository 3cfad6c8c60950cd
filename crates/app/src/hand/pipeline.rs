//! Capture-and-annotate loop.
//!
//! One iteration: read a frame, run the detector, publish the pose summary,
//! draw the overlay, mirror, JPEG-encode, publish the frame, pace. The loop
//! stops on an external stop request (checked at loop top), on end-of-stream
//! from the source, or on any processing error. Failures never propagate to
//! the HTTP layer; the stream simply stops producing frames.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use camera_ingest::{Frame, FrameReceiver};

use crate::hand::{
    annotation::annotate_frame,
    config::{
        HandConfig, FRAME_HEIGHT, FRAME_WIDTH, MAX_HANDS, MIN_DETECTION_CONFIDENCE,
        MIN_TRACKING_CONFIDENCE, PACING_MS,
    },
    data::{FramePacket, LoopControl, SharedFrame, SharedPose},
    detector::{HandDetector, MediaPipeDetector},
    pose, telemetry,
};

/// State shared between the capture loop and the HTTP handlers.
#[derive(Clone, Default)]
pub(crate) struct PipelineShared {
    pub(crate) pose: SharedPose,
    pub(crate) frame: SharedFrame,
    pub(crate) control: Arc<LoopControl>,
}

/// Frame supply consumed by the loop. The camera implementation ends the
/// sequence on device failure; tests substitute synthetic sources.
pub(crate) trait FrameSource {
    /// Next frame, or `None` for end-of-stream.
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Adapts the capture channel: a capture error or a closed channel both mean
/// end-of-stream.
pub(crate) struct CameraSource {
    receiver: FrameReceiver,
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Option<Frame> {
        match self.receiver.recv() {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(err)) => {
                error!("capture error: {err}");
                None
            }
            Err(_) => None,
        }
    }
}

/// Start the detector and camera, then run the capture loop on its own
/// thread. An open failure returns an error and leaves the loop inactive; the
/// stream route surfaces that as an immediately ended body, not an HTTP
/// error.
pub(crate) fn spawn_pipeline(
    config: &HandConfig,
    shared: &PipelineShared,
) -> Result<thread::JoinHandle<()>> {
    let detector = MediaPipeDetector::spawn(
        &config.script_path,
        config.python.as_ref(),
        MAX_HANDS,
        MIN_DETECTION_CONFIDENCE,
        MIN_TRACKING_CONFIDENCE,
    )
    .context("failed to start hand landmark detector")?;

    let receiver = camera_ingest::start_capture(&config.camera_uri, (FRAME_WIDTH, FRAME_HEIGHT))
        .with_context(|| format!("could not open camera {}", config.camera_uri))?;

    shared.control.activate();
    info!("camera started ({}x{})", FRAME_WIDTH, FRAME_HEIGHT);

    let loop_shared = shared.clone();
    let jpeg_quality = config.jpeg_quality;
    let handle = telemetry::spawn_thread("hand-pipeline", move || {
        run_capture_loop(
            CameraSource { receiver },
            detector,
            loop_shared,
            jpeg_quality,
            Duration::from_millis(PACING_MS),
        );
    })
    .context("failed to spawn pipeline thread")?;
    Ok(handle)
}

/// Run the loop until stop is requested or the source ends. The camera is
/// released when the source is dropped on exit, on every path.
pub(crate) fn run_capture_loop(
    mut source: impl FrameSource,
    mut detector: impl HandDetector,
    shared: PipelineShared,
    jpeg_quality: i32,
    pacing: Duration,
) {
    let mut frame_number: u64 = 0;
    let mut smoothed_fps: f32 = 0.0;
    let mut last_instant = Instant::now();

    while shared.control.is_active() {
        let Some(frame) = source.next_frame() else {
            debug!("frame source ended");
            break;
        };
        frame_number = frame_number.wrapping_add(1);
        metrics::counter!("handcam_frames_total").increment(1);

        let now = Instant::now();
        let elapsed = now.duration_since(last_instant).as_secs_f32();
        last_instant = now;
        if elapsed > 0.0 {
            let instant = 1.0 / elapsed;
            smoothed_fps = if smoothed_fps == 0.0 {
                instant
            } else {
                0.9 * smoothed_fps + 0.1 * instant
            };
            metrics::gauge!("handcam_pipeline_fps").set(smoothed_fps as f64);
        }

        let detect_start = Instant::now();
        let hand = match detector.detect(&frame) {
            Ok(hand) => hand,
            Err(err) => {
                error!("detector failure: {err:?}");
                break;
            }
        };
        metrics::histogram!("handcam_stage_latency_seconds", "stage" => "detect")
            .record(detect_start.elapsed().as_secs_f64());

        publish_pose(&shared.pose, hand.as_ref());
        if hand.is_some() {
            metrics::counter!("handcam_detections_total").increment(1);
        }

        let encode_start = Instant::now();
        let jpeg = match annotate_frame(&frame, hand.as_ref(), jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                error!("frame annotation failed: {err:?}");
                break;
            }
        };
        metrics::histogram!("handcam_stage_latency_seconds", "stage" => "encode")
            .record(encode_start.elapsed().as_secs_f64());

        if let Ok(mut guard) = shared.frame.lock() {
            *guard = Some(FramePacket {
                jpeg,
                frame_number,
                timestamp_ms: frame.timestamp_ms,
            });
        }

        if frame_number % 100 == 0 {
            debug!(
                "capture heartbeat: frame #{frame_number}, {:.1} fps",
                smoothed_fps
            );
        }

        thread::sleep(pacing);
    }

    shared.control.request_stop();
    info!("capture loop stopped after {frame_number} frame(s)");
}

/// Overwrite the shared summary as one atomic snapshot.
fn publish_pose(pose: &SharedPose, hand: Option<&crate::hand::detector::HandLandmarks>) {
    let Ok(mut guard) = pose.lock() else {
        return;
    };
    match hand {
        Some(hand) => pose::apply_detection(&mut guard, hand),
        None => pose::apply_absent(&mut guard),
    }
}
