//! Gesture recognizer: one per body slot.
//!
//! Owns the slot's gesture source, follows one tracking id at a time and
//! folds incoming gesture frames into the slot's [`ResultState`].  A frame
//! update costs one map lookup per catalog entry.

use tracing::{debug, trace};

use crate::catalog::GestureCatalog;
use crate::error::{FrameError, InvalidArgument};
use crate::result_state::{GestureResult, ResultSnapshot, ResultState};
use crate::sensor::{GestureFrame, GestureSource, TrackingId, UNTRACKED};
use crate::sexp::bool_sexp;

/// Lifecycle phase, derived from the bound identity and pause flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerPhase {
    /// No body bound.
    Unbound,
    /// A body is bound but frames are not consumed.
    BoundPaused,
    /// A body is bound and frames are consumed.
    BoundActive,
}

impl RecognizerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::BoundPaused => "bound-paused",
            Self::BoundActive => "bound-active",
        }
    }
}

/// Counters kept per recognizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognizerStats {
    /// Frames folded into the result state.
    pub frames_applied: u64,
    /// Events that arrived while paused, unbound or released, or that were
    /// produced under an earlier binding.
    pub frames_ignored: u64,
    /// Frames the sensor could not deliver intact.
    pub frames_unreadable: u64,
    /// Binds to a non-zero identity.
    pub binds: u64,
    /// Tracking-loss resets.
    pub tracking_resets: u64,
}

pub struct GestureRecognizer {
    slot_index: usize,
    source: Box<dyn GestureSource>,
    catalog: GestureCatalog,
    tracking_id: TrackingId,
    paused: bool,
    released: bool,
    state: ResultState,
    /// Bumped on every change to `state` or `tracking_id`.
    version: u64,
    /// Bumped whenever the binding changes: identity, pause or release.
    /// Queued events carry the epoch they were sent under.
    epoch: u64,
    stats: RecognizerStats,
}

impl GestureRecognizer {
    /// Create a paused, unbound recognizer and register the catalog's
    /// gestures with `source`.
    pub fn new(
        slot_index: usize,
        mut source: Box<dyn GestureSource>,
        catalog: GestureCatalog,
    ) -> Result<Self, InvalidArgument> {
        if catalog.is_empty() {
            return Err(InvalidArgument::new("catalog", "catalog has no entries"));
        }

        let detectors = catalog.detector_names();
        source.add_gestures(&detectors);
        source.set_tracking_id(UNTRACKED);
        source.set_paused(true);

        debug!(
            slot = slot_index,
            entries = catalog.len(),
            detectors = detectors.len(),
            "recognizer created"
        );

        Ok(Self {
            slot_index,
            source,
            state: ResultState::new(catalog.len()),
            catalog,
            tracking_id: UNTRACKED,
            paused: true,
            released: false,
            version: 0,
            epoch: 0,
            stats: RecognizerStats::default(),
        })
    }

    /// Follow `id`.  Returns whether the identity changed.
    ///
    /// Pause state is left alone.  Moving away from a non-zero identity
    /// means the source lost that body, so the tracking-loss reset is
    /// applied.
    pub fn bind(&mut self, id: TrackingId) -> bool {
        if self.released || id == self.tracking_id {
            return false;
        }

        let previous = self.tracking_id;
        self.source.set_tracking_id(id);
        self.tracking_id = id;
        self.version += 1;
        self.epoch += 1;
        if id != UNTRACKED {
            self.stats.binds += 1;
        }

        debug!(slot = self.slot_index, previous, tracking_id = id, "tracking id changed");

        if previous != UNTRACKED {
            self.on_tracking_lost();
        }
        true
    }

    /// Suspend or resume frame consumption.  Returns whether anything
    /// changed.  The result state is kept as is.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        if self.released || paused == self.paused {
            return false;
        }
        self.source.set_paused(paused);
        self.paused = paused;
        self.epoch += 1;
        debug!(slot = self.slot_index, paused, "pause state changed");
        true
    }

    /// Whether an event sent under `epoch` still belongs to the current
    /// binding.  Stale events are counted as ignored.
    pub fn admits(&mut self, epoch: u64) -> bool {
        if epoch == self.epoch {
            return true;
        }
        self.stats.frames_ignored += 1;
        trace!(slot = self.slot_index, epoch, current = self.epoch, "stale slot event dropped");
        false
    }

    /// Fold one gesture frame into the result state.  Returns whether the
    /// state changed.  Frames produced for another body are ignored.
    ///
    /// Every real catalog entry is looked up by name in the frame.  Reported
    /// entries take the frame's detection flag, with confidence kept only
    /// when detected.  Entries the frame does not mention keep their
    /// detection flag but drop their confidence to zero.  Placeholders stay
    /// cleared.
    pub fn on_frame(&mut self, frame: Result<GestureFrame, FrameError>) -> bool {
        if !self.is_active() {
            self.stats.frames_ignored += 1;
            trace!(slot = self.slot_index, "gesture frame ignored while inactive");
            return false;
        }

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.frames_unreadable += 1;
                debug!(slot = self.slot_index, error = %e, "skipping unreadable gesture frame");
                return false;
            }
        };
        if frame.tracking_id() != self.tracking_id {
            self.stats.frames_ignored += 1;
            debug!(
                slot = self.slot_index,
                frame_tracking_id = frame.tracking_id(),
                tracking_id = self.tracking_id,
                "gesture frame for another body dropped"
            );
            return false;
        }

        let entries: Vec<GestureResult> = self
            .catalog
            .entries()
            .iter()
            .zip(self.state.results())
            .map(|(def, prior)| {
                if def.is_placeholder() {
                    return GestureResult::default();
                }
                match frame.get(&def.id) {
                    Some(r) if r.detected => GestureResult::new(true, r.confidence),
                    Some(_) => GestureResult::new(false, 0.0),
                    None => GestureResult::new(prior.detected, 0.0),
                }
            })
            .collect();

        self.state.apply_frame_results(true, &entries);
        self.version += 1;
        self.stats.frames_applied += 1;
        trace!(
            slot = self.slot_index,
            version = self.version,
            emphasized = ?self.state.emphasized(),
            "gesture frame applied"
        );
        true
    }

    /// The followed body is gone: clear every result.  The identity is left
    /// for the pool to change.
    pub fn on_tracking_lost(&mut self) {
        self.state.reset();
        self.version += 1;
        self.stats.tracking_resets += 1;
        debug!(slot = self.slot_index, tracking_id = self.tracking_id, "tracking lost");
    }

    /// The sensor reports that body `id` is gone.  Applied only while `id`
    /// is the bound body.  Returns whether the state was reset.
    pub fn on_body_lost(&mut self, id: TrackingId) -> bool {
        if self.released || id == UNTRACKED || id != self.tracking_id {
            self.stats.frames_ignored += 1;
            trace!(slot = self.slot_index, lost = id, tracking_id = self.tracking_id, "tracking-loss notice ignored");
            return false;
        }
        self.on_tracking_lost();
        true
    }

    /// Release the gesture source.  Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.source.release();
        self.released = true;
        self.paused = true;
        self.epoch += 1;
        debug!(slot = self.slot_index, "recognizer released");
    }

    /// Whether frames are currently consumed.
    pub fn is_active(&self) -> bool {
        !self.released && !self.paused && self.tracking_id != UNTRACKED
    }

    pub fn phase(&self) -> RecognizerPhase {
        if self.tracking_id == UNTRACKED {
            RecognizerPhase::Unbound
        } else if self.paused || self.released {
            RecognizerPhase::BoundPaused
        } else {
            RecognizerPhase::BoundActive
        }
    }

    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    pub fn tracking_id(&self) -> TrackingId {
        self.tracking_id
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn state(&self) -> &ResultState {
        &self.state
    }

    pub fn catalog(&self) -> &GestureCatalog {
        &self.catalog
    }

    pub fn stats(&self) -> &RecognizerStats {
        &self.stats
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Copy the current state for readers.
    pub fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            slot_index: self.slot_index,
            version: self.version,
            tracking_id: self.tracking_id,
            state: self.state.clone(),
        }
    }

    /// Generate s-expression for status output.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:slot {} :phase :{} :tracking-id {} :paused {} :released {} :version {} :applied {} :ignored {} :unreadable {} :binds {} :resets {})",
            self.slot_index,
            self.phase().as_str(),
            self.tracking_id,
            bool_sexp(self.paused),
            bool_sexp(self.released),
            self.version,
            self.stats.frames_applied,
            self.stats.frames_ignored,
            self.stats.frames_unreadable,
            self.stats.binds,
            self.stats.tracking_resets,
        )
    }
}

// ── Test helpers ───────────────────────────────────────────

#[cfg(test)]
fn make_recognizer(
    names: &[&'static str],
) -> (
    GestureRecognizer,
    std::sync::Arc<parking_lot::Mutex<crate::sensor::mock::MockSourceState>>,
) {
    use crate::sensor::mock::MockSource;

    let (source, state) = MockSource::detached();
    let recognizer =
        GestureRecognizer::new(0, Box::new(source), crate::catalog::test_catalog(names)).unwrap();
    (recognizer, state)
}

#[cfg(test)]
fn activate(recognizer: &mut GestureRecognizer, id: TrackingId) {
    recognizer.bind(id);
    recognizer.set_paused(id == UNTRACKED);
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GestureCatalog, StaticSource};
    use crate::sensor::mock::MockSource;

    const EIGHT: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];

    #[test]
    fn test_new_recognizer_is_unbound_and_paused() {
        let (recognizer, source) = make_recognizer(&["Wave", "Clap"]);
        assert_eq!(recognizer.phase(), RecognizerPhase::Unbound);
        assert!(recognizer.is_paused());
        assert_eq!(recognizer.tracking_id(), UNTRACKED);

        let source = source.lock();
        assert_eq!(source.gestures, vec!["Wave", "Clap"]);
        assert!(source.paused);
    }

    #[test]
    fn test_placeholders_not_registered() {
        let a = StaticSource::new("a", &["Wave", "Wave"]);
        let catalog = GestureCatalog::load(&[&a], 8, "temp").unwrap();
        let (source, state) = MockSource::detached();
        let recognizer = GestureRecognizer::new(0, Box::new(source), catalog).unwrap();
        assert_eq!(recognizer.state().width(), 8);
        assert_eq!(state.lock().gestures, vec!["Wave"]);
    }

    #[test]
    fn test_empty_catalog_is_invalid() {
        let a = StaticSource::new("a", &[]);
        let catalog = GestureCatalog::load(&[&a], 0, "temp").unwrap();
        let (source, _) = MockSource::detached();
        let result = GestureRecognizer::new(0, Box::new(source), catalog);
        assert!(matches!(result, Err(InvalidArgument { name: "catalog", .. })));
    }

    #[test]
    fn test_bind_is_idempotent() {
        let (mut recognizer, source) = make_recognizer(&["A"]);
        assert!(recognizer.bind(5));
        let version = recognizer.snapshot().version;
        let epoch = recognizer.epoch();
        assert!(!recognizer.bind(5));
        assert_eq!(recognizer.snapshot().version, version);
        assert_eq!(recognizer.epoch(), epoch);
        assert_eq!(recognizer.stats().binds, 1);
        assert_eq!(source.lock().tracking_id, 5);
    }

    #[test]
    fn test_bind_leaves_pause_alone() {
        let (mut recognizer, _) = make_recognizer(&["A"]);
        recognizer.bind(5);
        assert!(recognizer.is_paused());
        assert_eq!(recognizer.phase(), RecognizerPhase::BoundPaused);
    }

    #[test]
    fn test_scenario_eight_gestures() {
        let (mut recognizer, _) = make_recognizer(&EIGHT);
        activate(&mut recognizer, 5);

        let frame = GestureFrame::new(5).with("A", true, 0.3).with("C", true, 0.9);
        assert!(recognizer.on_frame(Ok(frame)));

        let state = recognizer.state();
        assert!(state.tracked());
        assert_eq!(
            state.detections(),
            vec![true, false, true, false, false, false, false, false]
        );
        assert_eq!(
            state.confidences(),
            vec![0.3, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(state.emphasized(), Some(2));
    }

    #[test]
    fn test_absent_gesture_keeps_flag_drops_confidence() {
        let (mut recognizer, _) = make_recognizer(&["A", "B"]);
        activate(&mut recognizer, 5);

        recognizer.on_frame(Ok(GestureFrame::new(5).with("A", true, 0.8).with("B", true, 0.4)));
        recognizer.on_frame(Ok(GestureFrame::new(5).with("B", true, 0.5)));

        let state = recognizer.state();
        assert_eq!(state.detections(), vec![true, true]);
        assert_eq!(state.confidences(), vec![0.0, 0.5]);
        assert_eq!(state.emphasized(), Some(1));
    }

    #[test]
    fn test_undetected_result_zeroes_confidence() {
        let (mut recognizer, _) = make_recognizer(&["A"]);
        activate(&mut recognizer, 5);
        recognizer.on_frame(Ok(GestureFrame::new(5).with("A", false, 0.6)));
        assert_eq!(recognizer.state().confidences(), vec![0.0]);
        assert!(recognizer.state().emphasized().is_none());
    }

    #[test]
    fn test_duplicate_entries_share_result() {
        let a = StaticSource::new("a", &["Wave"]);
        let b = StaticSource::new("b", &["Wave"]);
        let catalog = GestureCatalog::load(&[&a, &b], 0, "temp").unwrap();
        let (source, _) = MockSource::detached();
        let mut recognizer = GestureRecognizer::new(0, Box::new(source), catalog).unwrap();
        activate(&mut recognizer, 3);

        recognizer.on_frame(Ok(GestureFrame::new(3).with("Wave", true, 0.6)));
        assert_eq!(recognizer.state().confidences(), vec![0.6, 0.6]);
        assert_eq!(recognizer.state().emphasized(), Some(0));
    }

    #[test]
    fn test_placeholders_never_detect() {
        let a = StaticSource::new("a", &["A"]);
        let catalog = GestureCatalog::load(&[&a], 8, "temp").unwrap();
        let (source, _) = MockSource::detached();
        let mut recognizer = GestureRecognizer::new(0, Box::new(source), catalog).unwrap();
        activate(&mut recognizer, 1);

        let frame = GestureFrame::new(1).with("A", true, 0.2).with("temp", true, 1.0);
        recognizer.on_frame(Ok(frame));
        let state = recognizer.state();
        assert!(state.results()[1..].iter().all(|r| !r.detected && r.confidence == 0.0));
        assert_eq!(state.emphasized(), Some(0));
    }

    #[test]
    fn test_pause_suppresses_updates() {
        let (mut recognizer, _) = make_recognizer(&EIGHT);
        activate(&mut recognizer, 5);
        recognizer.on_frame(Ok(GestureFrame::new(5).with("B", true, 0.4)));

        recognizer.set_paused(true);
        let before = recognizer.state().clone();
        for _ in 0..3 {
            assert!(!recognizer.on_frame(Ok(GestureFrame::new(5).with("H", true, 1.0))));
        }
        assert_eq!(recognizer.state(), &before);
        assert_eq!(recognizer.stats().frames_ignored, 3);

        // resuming keeps the accumulated state
        recognizer.set_paused(false);
        assert_eq!(recognizer.state(), &before);
    }

    #[test]
    fn test_unbound_ignores_frames() {
        let (mut recognizer, _) = make_recognizer(&["A"]);
        recognizer.set_paused(false);
        assert!(!recognizer.is_active());
        assert!(!recognizer.on_frame(Ok(GestureFrame::new(5).with("A", true, 1.0))));
        assert!(!recognizer.state().tracked());
    }

    #[test]
    fn test_unreadable_frame_keeps_state() {
        let (mut recognizer, _) = make_recognizer(&["A", "B"]);
        activate(&mut recognizer, 5);
        recognizer.on_frame(Ok(GestureFrame::new(5).with("A", true, 0.7)));
        let before = recognizer.state().clone();

        assert!(!recognizer.on_frame(Err(FrameError::Unavailable)));
        assert_eq!(recognizer.state(), &before);
        assert_eq!(recognizer.stats().frames_unreadable, 1);
    }

    #[test]
    fn test_tracking_lost_resets() {
        let (mut recognizer, _) = make_recognizer(&EIGHT);
        activate(&mut recognizer, 5);
        recognizer.on_frame(Ok(GestureFrame::new(5).with("A", true, 0.3).with("D", true, 0.6)));

        recognizer.on_tracking_lost();
        let state = recognizer.state();
        assert!(!state.tracked());
        assert!(state.detections().iter().all(|d| !d));
        assert!(state.confidences().iter().all(|&c| c == 0.0));
        assert!(state.emphasized().is_none());
        // identity is the pool's business
        assert_eq!(recognizer.tracking_id(), 5);
    }

    #[test]
    fn test_identity_rebinding_sequence() {
        let (mut recognizer, _) = make_recognizer(&EIGHT);
        assert_eq!(recognizer.phase(), RecognizerPhase::Unbound);

        let mut phases = Vec::new();
        for id in [5, 5, 0, 7] {
            if id != recognizer.tracking_id() {
                activate(&mut recognizer, id);
            }
            if recognizer.is_active() {
                recognizer.on_frame(Ok(GestureFrame::new(id).with("A", true, 0.5)));
            }
            phases.push(recognizer.phase());
        }

        assert_eq!(
            phases,
            vec![
                RecognizerPhase::BoundActive,
                RecognizerPhase::BoundActive,
                RecognizerPhase::Unbound,
                RecognizerPhase::BoundActive,
            ]
        );
        assert_eq!(recognizer.stats().tracking_resets, 1);
        assert_eq!(recognizer.stats().binds, 2);
        assert!(recognizer.is_paused() == (recognizer.tracking_id() == UNTRACKED));
    }

    #[test]
    fn test_frame_for_other_body_dropped() {
        let (mut recognizer, _) = make_recognizer(&["A", "B"]);
        activate(&mut recognizer, 5);
        recognizer.on_frame(Ok(GestureFrame::new(5).with("B", true, 0.4)));
        activate(&mut recognizer, 7);

        assert!(!recognizer.on_frame(Ok(GestureFrame::new(5).with("A", true, 0.9))));
        assert!(!recognizer.state().tracked());
        assert_eq!(recognizer.state().confidences(), vec![0.0, 0.0]);
        assert_eq!(recognizer.stats().frames_ignored, 1);

        assert!(recognizer.on_frame(Ok(GestureFrame::new(7).with("A", true, 0.9))));
        assert_eq!(recognizer.state().emphasized(), Some(0));
    }

    #[test]
    fn test_body_lost_only_for_bound_body() {
        let (mut recognizer, _) = make_recognizer(&["A"]);
        activate(&mut recognizer, 7);
        recognizer.on_frame(Ok(GestureFrame::new(7).with("A", true, 0.6)));

        assert!(!recognizer.on_body_lost(5));
        assert!(!recognizer.on_body_lost(UNTRACKED));
        assert_eq!(recognizer.state().emphasized(), Some(0));
        assert_eq!(recognizer.stats().frames_ignored, 2);

        assert!(recognizer.on_body_lost(7));
        assert!(!recognizer.state().tracked());
        assert_eq!(recognizer.stats().tracking_resets, 1);
    }

    #[test]
    fn test_epoch_follows_binding() {
        let (mut recognizer, _) = make_recognizer(&["A"]);
        let start = recognizer.epoch();
        assert!(recognizer.admits(start));

        recognizer.bind(5);
        recognizer.set_paused(false);
        assert_eq!(recognizer.epoch(), start + 2);
        assert!(!recognizer.admits(start));

        // a frame does not move the epoch
        let epoch = recognizer.epoch();
        recognizer.on_frame(Ok(GestureFrame::new(5).with("A", true, 0.3)));
        assert!(recognizer.admits(epoch));

        recognizer.set_paused(true);
        recognizer.set_paused(false);
        assert!(!recognizer.admits(epoch));
        assert_eq!(recognizer.stats().frames_ignored, 2);
        assert_eq!(recognizer.state().emphasized(), Some(0));
    }

    #[test]
    fn test_direct_rebind_resets() {
        let (mut recognizer, _) = make_recognizer(&["A"]);
        activate(&mut recognizer, 5);
        recognizer.on_frame(Ok(GestureFrame::new(5).with("A", true, 0.9)));

        activate(&mut recognizer, 9);
        assert!(!recognizer.state().tracked());
        assert_eq!(recognizer.state().emphasized(), None);
        assert_eq!(recognizer.stats().tracking_resets, 1);
        assert_eq!(recognizer.phase(), RecognizerPhase::BoundActive);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut recognizer, source) = make_recognizer(&["A"]);
        activate(&mut recognizer, 5);
        recognizer.release();
        recognizer.release();
        assert_eq!(source.lock().released, 1);
        assert!(!recognizer.is_active());
        assert!(!recognizer.bind(8));
        assert!(!recognizer.set_paused(false));
    }

    #[test]
    fn test_status_sexp() {
        let (mut recognizer, _) = make_recognizer(&["A"]);
        activate(&mut recognizer, 12);
        let sexp = recognizer.status_sexp();
        assert!(sexp.contains(":phase :bound-active"));
        assert!(sexp.contains(":tracking-id 12"));
        assert!(sexp.contains(":paused nil"));
        assert!(sexp.contains(":binds 1"));
    }

    #[test]
    fn test_phase_as_str() {
        assert_eq!(RecognizerPhase::Unbound.as_str(), "unbound");
        assert_eq!(RecognizerPhase::BoundPaused.as_str(), "bound-paused");
        assert_eq!(RecognizerPhase::BoundActive.as_str(), "bound-active");
    }
}
