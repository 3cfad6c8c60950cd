use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use serde::Serialize;

/// Latest hand pose derived from detector output. Exactly one instance exists
/// process-wide; the capture loop overwrites it in place every frame.
///
/// When `present` is false the remaining fields keep their last-written
/// values. Consumers polling between frames must tolerate stale coordinates.
#[derive(Clone, Serialize)]
pub(crate) struct PoseSummary {
    pub(crate) present: bool,
    pub(crate) x: f32,
    pub(crate) y: f32,
    pub(crate) z: f32,
    pub(crate) fingers: [u8; 5],
}

impl Default for PoseSummary {
    fn default() -> Self {
        Self {
            present: false,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            fingers: [0; 5],
        }
    }
}

/// Annotated, encoded frame ready to serve.
#[derive(Clone)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Vec<u8>,
    pub(crate) frame_number: u64,
    pub(crate) timestamp_ms: i64,
}

/// Pose snapshots are published whole under the mutex, so a reader never sees
/// coordinates from one frame mixed with finger flags from another.
pub(crate) type SharedPose = Arc<Mutex<PoseSummary>>;
pub(crate) type SharedFrame = Arc<Mutex<Option<FramePacket>>>;

/// Cooperative stop flag for the capture loop. False until the device opens,
/// cleared again by a stop request or any loop exit.
#[derive(Default)]
pub(crate) struct LoopControl {
    active: AtomicBool,
}

impl LoopControl {
    pub(crate) fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub(crate) fn request_stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_summary_serializes_to_contract_shape() {
        let pose = PoseSummary {
            present: true,
            x: 0.5,
            y: 0.5,
            z: 0.0,
            fingers: [1, 1, 1, 1, 1],
        };
        let json = serde_json::to_string(&pose).unwrap();
        assert_eq!(
            json,
            r#"{"present":true,"x":0.5,"y":0.5,"z":0.0,"fingers":[1,1,1,1,1]}"#
        );
    }

    #[test]
    fn loop_control_toggles() {
        let control = LoopControl::default();
        assert!(!control.is_active());
        control.activate();
        assert!(control.is_active());
        control.request_stop();
        assert!(!control.is_active());
    }

    #[test]
    fn stop_request_is_idempotent() {
        let control = LoopControl::default();
        control.request_stop();
        control.request_stop();
        assert!(!control.is_active());
    }
}
