//! Recognizer pool: one recognizer per trackable body slot.
//!
//! The pool owns every slot, applies the sensor's per-frame identity list
//! and hands out consistent per-slot snapshots.  All slots share one
//! catalog.

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::GestureCatalog;
use crate::error::{InvalidArgument, PoolError, SensorError};
use crate::recognizer::{GestureRecognizer, RecognizerPhase, RecognizerStats};
use crate::result_state::{ResultSnapshot, SlotView};
use crate::sensor::{Sensor, TrackingId, UNTRACKED};
use crate::slot::{slot_channel, Slot, SlotShared};

pub struct RecognizerPool {
    catalog: GestureCatalog,
    slots: Vec<Slot>,
    shut_down: bool,
}

impl RecognizerPool {
    /// Open one gesture source per body slot and start every slot paused
    /// and unbound.
    pub fn new(sensor: &mut dyn Sensor, catalog: GestureCatalog) -> Result<Self, PoolError> {
        if !sensor.is_available() {
            return Err(SensorError::Unavailable.into());
        }
        let body_count = sensor.body_count();
        if body_count == 0 {
            return Err(InvalidArgument::new("sensor", "sensor reports zero trackable bodies").into());
        }
        if catalog.is_empty() {
            return Err(InvalidArgument::new("catalog", "catalog has no entries").into());
        }

        let mut slots = Vec::with_capacity(body_count);
        for index in 0..body_count {
            let (feed, channel) = slot_channel(index);
            let source = sensor.open_gesture_source(index, feed.clone())?;
            let recognizer = GestureRecognizer::new(index, source, catalog.clone())?;
            slots.push(Slot::start(recognizer, feed, channel)?);
        }

        info!(
            slots = body_count,
            entries = catalog.len(),
            sources = catalog.sources().len(),
            "recognizer pool ready"
        );

        Ok(Self {
            catalog,
            slots,
            shut_down: false,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn catalog(&self) -> &GestureCatalog {
        &self.catalog
    }

    /// Apply the sensor's identity list for one body frame, index i to
    /// slot i.  Returns how many slots changed identity.
    ///
    /// A changed slot is bound to its new identity and paused exactly when
    /// that identity is zero.  Unchanged slots are left alone.
    pub fn on_entity_frame(&self, identities: &[TrackingId]) -> Result<usize, InvalidArgument> {
        if identities.len() != self.slots.len() {
            return Err(InvalidArgument::new(
                "identities",
                format!(
                    "expected {} tracking ids, got {}",
                    self.slots.len(),
                    identities.len()
                ),
            ));
        }

        let mut changed = 0;
        for (slot, &id) in self.slots.iter().zip(identities) {
            let shared = slot.shared();
            let mut recognizer = shared.recognizer.lock();
            if recognizer.is_released() || recognizer.tracking_id() == id {
                continue;
            }
            let previous = recognizer.tracking_id();
            recognizer.bind(id);
            recognizer.set_paused(id == UNTRACKED);
            shared.publish(&recognizer);
            changed += 1;
            info!(slot = slot.index(), previous, tracking_id = id, "slot identity changed");
        }
        Ok(changed)
    }

    /// Wait until every slot worker has handled the events queued so far.
    ///
    /// Must not be called while holding a slot's recognizer lock.
    pub fn flush(&self) {
        for slot in &self.slots {
            slot.flush();
        }
    }

    /// Read-only handle for display threads.
    pub fn reader(&self) -> PoolReader {
        PoolReader {
            catalog: self.catalog.clone(),
            slots: self.slots.iter().map(Slot::share).collect(),
        }
    }

    /// Latest published snapshot of `slot`.
    pub fn snapshot(&self, slot: usize) -> Option<Arc<ResultSnapshot>> {
        self.slots.get(slot).map(|s| s.shared().snapshot())
    }

    /// Snapshots of every slot, in slot order.
    pub fn snapshots(&self) -> Vec<Arc<ResultSnapshot>> {
        self.reader().snapshots()
    }

    /// Display views of every slot, in slot order.
    pub fn views(&self) -> Vec<SlotView> {
        self.reader().views()
    }

    pub fn phase(&self, slot: usize) -> Option<RecognizerPhase> {
        self.slots
            .get(slot)
            .map(|s| s.shared().recognizer.lock().phase())
    }

    pub fn stats(&self, slot: usize) -> Option<RecognizerStats> {
        self.slots
            .get(slot)
            .map(|s| s.shared().recognizer.lock().stats().clone())
    }

    /// Stop every slot worker after draining its queue, then release every
    /// gesture source.  Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        for slot in &mut self.slots {
            slot.shutdown();
        }
        self.shut_down = true;
        debug!(slots = self.slots.len(), "recognizer pool shut down");
    }

    /// Generate s-expression for status output.
    pub fn status_sexp(&self) -> String {
        let slots: Vec<String> = self
            .slots
            .iter()
            .map(|s| s.shared().recognizer.lock().status_sexp())
            .collect();
        format!(
            "(:slots {} :entries {} :shut-down {} :recognizers ({}))",
            self.slots.len(),
            self.catalog.len(),
            crate::sexp::bool_sexp(self.shut_down),
            slots.join(" ")
        )
    }
}

impl Drop for RecognizerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Snapshot access to every slot of a pool, usable from other threads.
///
/// Never blocks a slot worker: each read clones the latest published
/// snapshot.
#[derive(Clone)]
pub struct PoolReader {
    catalog: GestureCatalog,
    slots: Vec<Arc<SlotShared>>,
}

impl PoolReader {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Snapshots of every slot, in slot order.
    pub fn snapshots(&self) -> Vec<Arc<ResultSnapshot>> {
        self.slots.iter().map(|s| s.snapshot()).collect()
    }

    /// Display views of every slot, in slot order.
    pub fn views(&self) -> Vec<SlotView> {
        self.snapshots()
            .iter()
            .map(|s| s.view(&self.catalog))
            .collect()
    }
}
