//! Pose summary derivation from raw landmarks.

use crate::hand::{
    data::PoseSummary,
    detector::{landmarks, HandLandmarks, Landmark},
};

/// Fingertip landmark indices in fixed thumb→pinky order. The comparison
/// joint for each finger sits two places earlier in the landmark ordering.
const FINGERTIPS: [usize; 5] = [
    landmarks::THUMB_TIP,
    landmarks::INDEX_FINGER_TIP,
    landmarks::MIDDLE_FINGER_TIP,
    landmarks::RING_FINGER_TIP,
    landmarks::PINKY_TIP,
];

/// A finger counts as extended when its tip sits above its lower joint in
/// image coordinates (y grows downward).
pub(crate) fn finger_states(points: &[Landmark; landmarks::COUNT]) -> [u8; 5] {
    let mut flags = [0u8; 5];
    for (flag, &tip_idx) in flags.iter_mut().zip(FINGERTIPS.iter()) {
        let tip = points[tip_idx];
        let joint = points[tip_idx - 2];
        *flag = u8::from(tip.y < joint.y);
    }
    flags
}

/// Overwrite the summary with a fresh detection: wrist position, finger
/// flags, and presence.
pub(crate) fn apply_detection(summary: &mut PoseSummary, hand: &HandLandmarks) {
    let wrist = hand.landmarks[landmarks::WRIST];
    summary.present = true;
    summary.x = wrist.x;
    summary.y = wrist.y;
    summary.z = wrist.z;
    summary.fingers = finger_states(&hand.landmarks);
}

/// Mark the hand absent. Coordinates and finger flags deliberately keep their
/// last-written values.
pub(crate) fn apply_absent(summary: &mut PoseSummary) {
    summary.present = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand_with(points: [Landmark; landmarks::COUNT]) -> HandLandmarks {
        HandLandmarks {
            landmarks: points,
            confidence: 0.9,
            handedness: "Right".into(),
        }
    }

    fn flat_hand() -> [Landmark; landmarks::COUNT] {
        [Landmark::default(); landmarks::COUNT]
    }

    #[test]
    fn fingertip_above_joint_is_up() {
        let mut points = flat_hand();
        points[landmarks::INDEX_FINGER_TIP].y = 0.2;
        points[landmarks::INDEX_FINGER_TIP - 2].y = 0.5;
        let flags = finger_states(&points);
        assert_eq!(flags[1], 1);
    }

    #[test]
    fn fingertip_below_joint_is_down() {
        let mut points = flat_hand();
        points[landmarks::INDEX_FINGER_TIP].y = 0.6;
        points[landmarks::INDEX_FINGER_TIP - 2].y = 0.5;
        let flags = finger_states(&points);
        assert_eq!(flags[1], 0);
    }

    #[test]
    fn finger_flags_are_always_binary_and_five() {
        let mut points = flat_hand();
        for (i, point) in points.iter_mut().enumerate() {
            point.y = (i as f32 * 0.37).sin().abs();
        }
        let flags = finger_states(&points);
        assert_eq!(flags.len(), 5);
        assert!(flags.iter().all(|&f| f == 0 || f == 1));
    }

    #[test]
    fn detection_writes_wrist_and_presence() {
        let mut points = flat_hand();
        points[landmarks::WRIST] = Landmark {
            x: 0.5,
            y: 0.5,
            z: 0.0,
        };
        for &tip in &super::FINGERTIPS {
            points[tip].y = 0.1;
            points[tip - 2].y = 0.4;
        }
        let mut summary = PoseSummary::default();
        apply_detection(&mut summary, &hand_with(points));
        assert!(summary.present);
        assert_eq!(summary.x, 0.5);
        assert_eq!(summary.y, 0.5);
        assert_eq!(summary.z, 0.0);
        assert_eq!(summary.fingers, [1, 1, 1, 1, 1]);
    }

    #[test]
    fn absence_keeps_stale_fields() {
        let mut points = flat_hand();
        points[landmarks::WRIST] = Landmark {
            x: 0.3,
            y: 0.7,
            z: -0.1,
        };
        points[landmarks::THUMB_TIP].y = 0.1;
        points[landmarks::THUMB_TIP - 2].y = 0.4;
        let mut summary = PoseSummary::default();
        apply_detection(&mut summary, &hand_with(points));
        let before = summary.clone();

        apply_absent(&mut summary);
        assert!(!summary.present);
        assert_eq!(summary.x, before.x);
        assert_eq!(summary.y, before.y);
        assert_eq!(summary.z, before.z);
        assert_eq!(summary.fingers, before.fingers);
    }
}
