//! Per-slot aggregated gesture results and the display projection built
//! from them.
//!
//! A `ResultState` holds one entry per catalog position plus the emphasized
//! gesture: the lowest-index entry with the highest confidence strictly
//! above zero.  Readers never see a `ResultState` directly while it is being
//! written; they get immutable [`ResultSnapshot`]s.

use crate::catalog::GestureCatalog;
use crate::sensor::TrackingId;
use crate::sexp::{bool_sexp, escape_string};

// ── Entries ────────────────────────────────────────────────

/// Detection state of one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GestureResult {
    pub detected: bool,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

impl GestureResult {
    pub fn new(detected: bool, confidence: f32) -> Self {
        Self {
            detected,
            confidence,
        }
    }
}

/// Clamp into [0, 1]; NaN reads as zero.
fn sanitize_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// Index of the highest confidence strictly above zero, earliest on ties.
pub fn select_emphasis(results: &[GestureResult]) -> Option<usize> {
    let mut max_confidence = 0.0f32;
    let mut max_idx = None;
    for (i, r) in results.iter().enumerate() {
        if r.confidence > max_confidence {
            max_confidence = r.confidence;
            max_idx = Some(i);
        }
    }
    max_idx
}

// ── State ──────────────────────────────────────────────────

/// Aggregated results for one slot, aligned index-for-index with the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultState {
    tracked: bool,
    per_gesture: Vec<GestureResult>,
    emphasized: Option<usize>,
}

impl ResultState {
    /// An untracked state with `width` cleared entries.
    pub fn new(width: usize) -> Self {
        Self {
            tracked: false,
            per_gesture: vec![GestureResult::default(); width],
            emphasized: None,
        }
    }

    /// Replace the tracked flag and every entry, then recompute emphasis.
    ///
    /// `entries` is aligned with the catalog; a short list leaves the tail
    /// cleared and extra entries are dropped, so the width never changes.
    /// An untracked update resets everything regardless of `entries`.
    pub fn apply_frame_results(&mut self, tracked: bool, entries: &[GestureResult]) {
        if !tracked {
            self.reset();
            return;
        }

        self.tracked = true;
        for (i, slot) in self.per_gesture.iter_mut().enumerate() {
            *slot = match entries.get(i) {
                Some(e) if e.detected => GestureResult::new(true, sanitize_confidence(e.confidence)),
                Some(e) => GestureResult::new(e.detected, 0.0),
                None => GestureResult::default(),
            };
        }
        self.emphasized = select_emphasis(&self.per_gesture);
    }

    /// Tracking-loss reset: untracked, nothing detected, no emphasis.
    pub fn reset(&mut self) {
        self.tracked = false;
        for r in &mut self.per_gesture {
            *r = GestureResult::default();
        }
        self.emphasized = None;
    }

    pub fn tracked(&self) -> bool {
        self.tracked
    }

    pub fn results(&self) -> &[GestureResult] {
        &self.per_gesture
    }

    pub fn emphasized(&self) -> Option<usize> {
        self.emphasized
    }

    pub fn width(&self) -> usize {
        self.per_gesture.len()
    }

    pub fn detections(&self) -> Vec<bool> {
        self.per_gesture.iter().map(|r| r.detected).collect()
    }

    pub fn confidences(&self) -> Vec<f32> {
        self.per_gesture.iter().map(|r| r.confidence).collect()
    }
}

// ── Snapshots ──────────────────────────────────────────────

/// An immutable, fully-applied copy of a slot's state.  `version` grows by
/// one for every publication of that slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSnapshot {
    pub slot_index: usize,
    pub version: u64,
    pub tracking_id: TrackingId,
    pub state: ResultState,
}

impl ResultSnapshot {
    /// Project onto the display contract.
    pub fn view(&self, catalog: &GestureCatalog) -> SlotView {
        let emphasized = self.state.emphasized();
        let gesture_colors = (0..self.state.width())
            .map(|i| {
                if Some(i) == emphasized {
                    DisplayColor::Lime
                } else {
                    DisplayColor::Gray
                }
            })
            .collect();
        SlotView {
            slot_index: self.slot_index,
            tracking_id: self.tracking_id,
            tracked: self.state.tracked(),
            gesture_names: catalog.names(),
            detections: self.state.detections(),
            confidences: self.state.confidences(),
            emphasized,
            slot_color: if self.state.tracked() {
                DisplayColor::for_slot(self.slot_index)
            } else {
                DisplayColor::Gray
            },
            gesture_colors,
        }
    }
}

// ── Display projection ─────────────────────────────────────

/// Color keys used by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayColor {
    Red,
    Orange,
    Green,
    Blue,
    Indigo,
    Violet,
    Gray,
    Lime,
}

/// Colors of tracked bodies, by slot index.
const SLOT_COLORS: [DisplayColor; 6] = [
    DisplayColor::Red,
    DisplayColor::Orange,
    DisplayColor::Green,
    DisplayColor::Blue,
    DisplayColor::Indigo,
    DisplayColor::Violet,
];

impl DisplayColor {
    /// Color of a tracked body in slot `index`; wraps for large pools.
    pub fn for_slot(index: usize) -> Self {
        SLOT_COLORS[index % SLOT_COLORS.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Indigo => "indigo",
            Self::Violet => "violet",
            Self::Gray => "gray",
            Self::Lime => "lime",
        }
    }
}

/// What a display reads for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotView {
    pub slot_index: usize,
    pub tracking_id: TrackingId,
    pub tracked: bool,
    pub gesture_names: Vec<String>,
    pub detections: Vec<bool>,
    pub confidences: Vec<f32>,
    pub emphasized: Option<usize>,
    pub slot_color: DisplayColor,
    /// Lime for the emphasized gesture, gray for the rest.
    pub gesture_colors: Vec<DisplayColor>,
}

impl SlotView {
    /// Generate s-expression for status output.
    pub fn status_sexp(&self) -> String {
        let mut gestures = String::new();
        for (i, name) in self.gesture_names.iter().enumerate() {
            if i > 0 {
                gestures.push(' ');
            }
            gestures.push_str(&format!(
                "(\"{}\" :detected {} :confidence {:.2})",
                escape_string(name),
                bool_sexp(self.detections.get(i).copied().unwrap_or(false)),
                self.confidences.get(i).copied().unwrap_or(0.0),
            ));
        }
        format!(
            "(:slot {} :tracking-id {} :tracked {} :color :{} :emphasized {} :gestures ({}))",
            self.slot_index,
            self.tracking_id,
            bool_sexp(self.tracked),
            self.slot_color.as_str(),
            self.emphasized
                .map(|i| i.to_string())
                .unwrap_or_else(|| "nil".to_string()),
            gestures,
        )
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
fn results_from(confidences: &[f32]) -> Vec<GestureResult> {
    confidences
        .iter()
        .map(|&c| GestureResult::new(c > 0.0, c))
        .collect()
}
