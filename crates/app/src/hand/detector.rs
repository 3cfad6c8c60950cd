//! Seam to the external hand-landmark detector.
//!
//! The detector is an opaque capability: given an RGB image it returns zero or
//! one hand as a fixed-size ordered list of 21 normalized 3D landmarks. The
//! production implementation drives a MediaPipe Hands subprocess over a simple
//! stdin/stdout protocol; tests substitute the [`HandDetector`] trait.

use std::{
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use camera_ingest::{Frame, FrameFormat};

/// Canonical MediaPipe hand landmark ordering.
pub(crate) mod landmarks {
    pub(crate) const WRIST: usize = 0;
    pub(crate) const THUMB_TIP: usize = 4;
    pub(crate) const INDEX_FINGER_TIP: usize = 8;
    pub(crate) const MIDDLE_FINGER_TIP: usize = 12;
    pub(crate) const RING_FINGER_TIP: usize = 16;
    pub(crate) const PINKY_TIP: usize = 20;
    pub(crate) const COUNT: usize = 21;
}

/// A single landmark in detector-normalized coordinates: x and y roughly in
/// 0..1 with y increasing downward, z a relative depth.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Landmark {
    pub(crate) x: f32,
    pub(crate) y: f32,
    pub(crate) z: f32,
}

/// One detected hand with all 21 landmarks.
#[derive(Clone, Debug)]
pub(crate) struct HandLandmarks {
    pub(crate) landmarks: [Landmark; landmarks::COUNT],
    pub(crate) confidence: f32,
    pub(crate) handedness: String,
}

/// Detector abstraction consumed by the capture loop.
pub(crate) trait HandDetector: Send {
    /// Run detection on one frame. `None` means no hand was found; `Err` is an
    /// unexpected detector failure and terminates the loop.
    fn detect(&mut self, frame: &Frame) -> Result<Option<HandLandmarks>>;
}

#[derive(Deserialize)]
struct LandmarkJson {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Deserialize)]
struct HandJson {
    handedness: String,
    score: f32,
    landmarks: Vec<LandmarkJson>,
}

#[derive(Deserialize)]
struct DetectionJson {
    hands: Vec<HandJson>,
    #[serde(default)]
    error: Option<String>,
}

/// MediaPipe Hands driven through a Python subprocess.
///
/// Protocol: the child prints `READY` once initialised; per frame we write a
/// 12-byte little-endian header (width, height, channels) followed by raw RGB
/// bytes, and read back one JSON line describing the detected hands.
pub(crate) struct MediaPipeDetector {
    process: Child,
    stdout: BufReader<ChildStdout>,
    min_confidence: f32,
}

impl MediaPipeDetector {
    pub(crate) fn spawn(
        script_path: &Path,
        python: Option<&PathBuf>,
        max_hands: usize,
        min_detection_confidence: f32,
        min_tracking_confidence: f32,
    ) -> Result<Self> {
        if !script_path.exists() {
            bail!("detector script not found at {}", script_path.display());
        }
        let interpreter = python
            .cloned()
            .unwrap_or_else(|| PathBuf::from("python3"));

        let mut process = Command::new(&interpreter)
            .arg(script_path)
            .arg(max_hands.to_string())
            .arg(min_detection_confidence.to_string())
            .arg(min_tracking_confidence.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start detector via {}", interpreter.display()))?;

        let stdout = process
            .stdout
            .take()
            .context("detector subprocess has no stdout")?;
        let mut stdout = BufReader::new(stdout);

        let mut ready = String::new();
        stdout
            .read_line(&mut ready)
            .context("failed to read detector handshake")?;
        if ready.trim() != "READY" {
            let _ = process.kill();
            bail!("detector did not signal READY, got {ready:?}");
        }
        info!("hand landmark detector ready");

        Ok(Self {
            process,
            stdout,
            min_confidence: min_detection_confidence,
        })
    }
}

impl HandDetector for MediaPipeDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<HandLandmarks>> {
        // The detector expects RGB; captured frames arrive as BGR. The swap
        // must happen before detection, not after.
        let rgb = match frame.format {
            FrameFormat::Bgr8 => bgr_to_rgb(&frame.data),
        };

        let stdin = self
            .process
            .stdin
            .as_mut()
            .context("detector subprocess has no stdin")?;
        stdin.write_all(&(frame.width as u32).to_le_bytes())?;
        stdin.write_all(&(frame.height as u32).to_le_bytes())?;
        stdin.write_all(&3u32.to_le_bytes())?;
        stdin.write_all(&rgb)?;
        stdin.flush()?;

        let mut response = String::new();
        self.stdout
            .read_line(&mut response)
            .context("failed to read detector response")?;
        if response.is_empty() {
            bail!("detector subprocess closed its output");
        }

        let result: DetectionJson = serde_json::from_str(&response)
            .with_context(|| format!("malformed detector response: {response}"))?;
        if let Some(error) = result.error {
            warn!("detector reported error: {error}");
            return Ok(None);
        }

        for hand in result.hands {
            if hand.score < self.min_confidence {
                continue;
            }
            if hand.landmarks.len() != landmarks::COUNT {
                warn!(
                    "expected {} landmarks, got {}",
                    landmarks::COUNT,
                    hand.landmarks.len()
                );
                continue;
            }
            let mut points = [Landmark::default(); landmarks::COUNT];
            for (point, lm) in points.iter_mut().zip(hand.landmarks.iter()) {
                *point = Landmark {
                    x: lm.x,
                    y: lm.y,
                    z: lm.z,
                };
            }
            debug!(
                "hand detected: {} (confidence {:.2})",
                hand.handedness, hand.score
            );
            return Ok(Some(HandLandmarks {
                landmarks: points,
                confidence: hand.score,
                handedness: hand.handedness,
            }));
        }

        Ok(None)
    }
}

impl Drop for MediaPipeDetector {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}
