//! Per-slot update loop.
//!
//! Each body slot owns a worker thread running a calloop event loop.  The
//! sensor pushes frames and tracking-loss notices into the slot's channel
//! through a [`SlotFeed`]; the worker folds them into the recognizer and
//! publishes a fresh snapshot after every change.  Readers only ever see
//! whole snapshots.
//!
//! Every event is stamped with the slot epoch current when it was sent.
//! Rebinding, pausing and releasing move the epoch, so events queued
//! before such a change are dropped instead of applied to the new binding.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use calloop::channel::{self, Channel, Sender};
use calloop::EventLoop;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::error::{FrameError, PoolError};
use crate::recognizer::GestureRecognizer;
use crate::result_state::ResultSnapshot;
use crate::sensor::{GestureFrame, TrackingId};

/// Idle wake-up interval of a slot worker.
const WORKER_POLL: Duration = Duration::from_millis(100);

/// Messages a slot worker consumes, in arrival order.
#[derive(Debug)]
pub enum SlotEvent {
    Frame {
        epoch: u64,
        frame: Result<GestureFrame, FrameError>,
    },
    TrackingLost {
        epoch: u64,
        tracking_id: TrackingId,
    },
    /// Answered once every earlier event has been handled.
    Flush(mpsc::Sender<()>),
    Shutdown,
}

/// Sending half of a slot's event channel, handed to the sensor.
#[derive(Clone)]
pub struct SlotFeed {
    slot: usize,
    sender: Sender<SlotEvent>,
    epoch: Arc<AtomicU64>,
}

impl fmt::Debug for SlotFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotFeed").field("slot", &self.slot).finish()
    }
}

impl SlotFeed {
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Queue a gesture frame.  Returns false once the worker is gone.
    pub fn deliver_frame(&self, frame: Result<GestureFrame, FrameError>) -> bool {
        let epoch = self.epoch();
        self.send(SlotEvent::Frame { epoch, frame })
    }

    /// Report that body `tracking_id` is no longer tracked.
    pub fn tracking_lost(&self, tracking_id: TrackingId) -> bool {
        let epoch = self.epoch();
        self.send(SlotEvent::TrackingLost { epoch, tracking_id })
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) -> bool {
        self.send(SlotEvent::Shutdown)
    }

    fn send(&self, event: SlotEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(_) => {
                trace!(slot = self.slot, "slot worker gone, event dropped");
                false
            }
        }
    }
}

/// Create the event channel for slot `slot`.
pub(crate) fn slot_channel(slot: usize) -> (SlotFeed, Channel<SlotEvent>) {
    let (sender, channel) = channel::channel();
    let feed = SlotFeed {
        slot,
        sender,
        epoch: Arc::new(AtomicU64::new(0)),
    };
    (feed, channel)
}

/// State shared between a slot's worker and the pool.
///
/// `recognizer` serializes every mutation; `snapshot` and `epoch` are only
/// written while `recognizer` is held, so published versions never go
/// backwards.
pub(crate) struct SlotShared {
    pub recognizer: Mutex<GestureRecognizer>,
    snapshot: RwLock<Arc<ResultSnapshot>>,
    epoch: Arc<AtomicU64>,
}

impl SlotShared {
    fn new(recognizer: GestureRecognizer, epoch: Arc<AtomicU64>) -> Self {
        let snapshot = Arc::new(recognizer.snapshot());
        epoch.store(recognizer.epoch(), Ordering::Release);
        Self {
            recognizer: Mutex::new(recognizer),
            snapshot: RwLock::new(snapshot),
            epoch,
        }
    }

    /// Replace the published snapshot with the recognizer's current state
    /// and stamp later events with its epoch.
    pub fn publish(&self, recognizer: &GestureRecognizer) {
        *self.snapshot.write() = Arc::new(recognizer.snapshot());
        self.epoch.store(recognizer.epoch(), Ordering::Release);
    }

    pub fn snapshot(&self) -> Arc<ResultSnapshot> {
        self.snapshot.read().clone()
    }
}

/// Event loop data of a slot worker.
struct SlotWorker {
    slot: usize,
    shared: Arc<SlotShared>,
    running: bool,
}

impl SlotWorker {
    fn handle(&mut self, event: SlotEvent) {
        match event {
            SlotEvent::Frame { epoch, frame } => {
                let mut recognizer = self.shared.recognizer.lock();
                if recognizer.admits(epoch) && recognizer.on_frame(frame) {
                    self.shared.publish(&recognizer);
                }
            }
            SlotEvent::TrackingLost { epoch, tracking_id } => {
                let mut recognizer = self.shared.recognizer.lock();
                if recognizer.admits(epoch) && recognizer.on_body_lost(tracking_id) {
                    self.shared.publish(&recognizer);
                }
            }
            SlotEvent::Flush(done) => {
                let _ = done.send(());
            }
            SlotEvent::Shutdown => {
                debug!(slot = self.slot, "slot worker stopping");
                self.running = false;
            }
        }
    }
}

fn run_worker(
    slot: usize,
    shared: Arc<SlotShared>,
    channel: Channel<SlotEvent>,
) -> Result<(), calloop::Error> {
    let mut event_loop = EventLoop::<SlotWorker>::try_new()?;
    event_loop
        .handle()
        .insert_source(channel, |event, _, worker: &mut SlotWorker| match event {
            channel::Event::Msg(event) => worker.handle(event),
            channel::Event::Closed => worker.running = false,
        })
        .map_err(|e| e.error)?;

    let mut worker = SlotWorker {
        slot,
        shared,
        running: true,
    };
    trace!(slot, "slot worker running");
    while worker.running {
        event_loop.dispatch(Some(WORKER_POLL), &mut worker)?;
    }
    Ok(())
}

/// One body slot: its shared state, its feed and its worker thread.
pub(crate) struct Slot {
    index: usize,
    shared: Arc<SlotShared>,
    feed: SlotFeed,
    worker: Option<JoinHandle<()>>,
}

impl Slot {
    /// Publish the recognizer's initial state and start the worker.
    pub fn start(
        recognizer: GestureRecognizer,
        feed: SlotFeed,
        channel: Channel<SlotEvent>,
    ) -> Result<Self, PoolError> {
        let index = recognizer.slot_index();
        let shared = Arc::new(SlotShared::new(recognizer, feed.epoch.clone()));
        let worker_shared = shared.clone();

        let worker = thread::Builder::new()
            .name(format!("slot-{index}"))
            .spawn(move || {
                if let Err(e) = run_worker(index, worker_shared, channel) {
                    error!(slot = index, error = %e, "slot worker failed");
                }
            })
            .map_err(|e| PoolError::Worker {
                slot: index,
                reason: e.to_string(),
            })?;

        Ok(Self {
            index,
            shared,
            feed,
            worker: Some(worker),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn shared(&self) -> &SlotShared {
        &self.shared
    }

    /// Handle to the shared state that outlives a borrow of the slot.
    pub fn share(&self) -> Arc<SlotShared> {
        self.shared.clone()
    }

    pub fn feed(&self) -> &SlotFeed {
        &self.feed
    }

    /// Block until the worker has handled every event queued so far.
    /// Returns at once when the worker is gone.
    ///
    /// Must not be called while holding this slot's recognizer lock.
    pub fn flush(&self) {
        if self.worker.is_none() {
            return;
        }
        let (done, wait) = mpsc::channel();
        if self.feed.send(SlotEvent::Flush(done)) {
            // an Err means the worker dropped the event on its way out
            let _ = wait.recv();
        }
    }

    /// Drain queued events, stop the worker and release the source.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.feed.shutdown();
            if worker.join().is_err() {
                warn!(slot = self.index, "slot worker panicked");
            }
        }
        let mut recognizer = self.shared.recognizer.lock();
        recognizer.release();
        self.shared.publish(&recognizer);
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.shutdown();
    }
}
