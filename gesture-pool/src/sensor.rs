//! Contracts with the motion sensor driver.
//!
//! The driver itself is external.  The pool asks it for one gesture source
//! per body slot, tells each source which body to follow and whether to
//! deliver, and receives frames through the slot's [`SlotFeed`].

use std::collections::HashMap;

use crate::error::SensorError;
use crate::slot::SlotFeed;

/// Sensor-assigned body identity.  Zero means "no body"; ids are recycled.
pub type TrackingId = u64;

/// The identity of an empty slot.
pub const UNTRACKED: TrackingId = 0;

/// Discrete detection result for one gesture in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetectionResult {
    pub detected: bool,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

impl DetectionResult {
    pub fn new(detected: bool, confidence: f32) -> Self {
        Self {
            detected,
            confidence,
        }
    }
}

/// One gesture frame: the sensor's own name → result mapping, stamped with
/// the body the source was following when it produced the frame.  Gestures
/// the sensor did not report this frame are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureFrame {
    tracking_id: TrackingId,
    results: HashMap<String, DetectionResult>,
}

impl GestureFrame {
    /// An empty frame produced for body `tracking_id`.
    pub fn new(tracking_id: TrackingId) -> Self {
        Self {
            tracking_id,
            results: HashMap::new(),
        }
    }

    pub fn tracking_id(&self) -> TrackingId {
        self.tracking_id
    }

    pub fn insert(&mut self, gesture: impl Into<String>, result: DetectionResult) {
        self.results.insert(gesture.into(), result);
    }

    /// Builder-style insert.
    pub fn with(mut self, gesture: impl Into<String>, detected: bool, confidence: f32) -> Self {
        self.insert(gesture, DetectionResult::new(detected, confidence));
        self
    }

    pub fn get(&self, gesture: &str) -> Option<&DetectionResult> {
        self.results.get(gesture)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// A per-slot gesture result stream owned by the sensor driver.
pub trait GestureSource: Send {
    /// Register detectors for these gesture names.
    fn add_gestures(&mut self, names: &[String]);

    /// Follow the body with this identity (`UNTRACKED` follows nobody).
    fn set_tracking_id(&mut self, id: TrackingId);

    /// Suspend or resume frame delivery.
    fn set_paused(&mut self, paused: bool);

    /// Stop delivering for good.  Must tolerate repeated calls.
    fn release(&mut self);
}

/// The sensor driver as seen by the pool.
pub trait Sensor {
    fn is_available(&self) -> bool;

    /// Maximum number of simultaneously tracked bodies.
    fn body_count(&self) -> usize;

    /// Open the gesture source for body slot `slot`; frames and tracking-loss
    /// notices for that slot go to `feed`, each stamped with the tracking id
    /// the source held when it produced them.
    fn open_gesture_source(
        &mut self,
        slot: usize,
        feed: SlotFeed,
    ) -> Result<Box<dyn GestureSource>, SensorError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lookup() {
        let frame = GestureFrame::new(9).with("Wave", true, 0.7).with("Clap", false, 0.1);
        assert_eq!(frame.tracking_id(), 9);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.get("Wave"), Some(&DetectionResult::new(true, 0.7)));
        assert!(frame.get("Kick").is_none());
    }

    #[test]
    fn test_frame_insert() {
        let mut frame = GestureFrame::new(3);
        assert!(frame.is_empty());
        frame.insert("A", DetectionResult::new(true, 0.5));
        assert!(frame.get("A").unwrap().detected);
    }
}
