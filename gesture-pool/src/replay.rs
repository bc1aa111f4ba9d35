//! Scripted sensor and replay driver.
//!
//! [`ReplaySensor`] stands in for the motion sensor driver: each slot gets a
//! [`ReplaySource`] that honours tracking id, pause and release the way the
//! real driver does.  [`run`] plays a script against a fresh pool on a
//! calloop timer, one step per tick.
//!
//! Script forms:
//!
//! ```text
//! (body 0 0 42 0 0 0)                  ; identity list, one id per slot
//! (gesture 2 ("Wave" t 0.8) ("Clap" nil 0))
//! (lost 2)                             ; sensor lost the body in slot 2
//! (corrupt 2)                          ; unreadable gesture frame
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use calloop::timer::{TimeoutAction, Timer};
use calloop::EventLoop;
use lexpr::Value;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::GestureCatalog;
use crate::config::ReplayConfig;
use crate::error::{FrameError, InvalidArgument, ReplayError, SensorError};
use crate::pool::RecognizerPool;
use crate::result_state::SlotView;
use crate::sensor::{DetectionResult, GestureFrame, GestureSource, Sensor, TrackingId, UNTRACKED};
use crate::sexp::{atom_bool, atom_f64, atom_string, atom_u64, list_items};
use crate::slot::SlotFeed;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Upper bound on one event loop dispatch.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

// ── Script ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStep {
    /// Identity list for one body frame.
    Body(Vec<TrackingId>),
    /// Gesture frame for one slot.
    Gesture {
        slot: usize,
        results: Vec<(String, DetectionResult)>,
    },
    /// The body followed by a slot is gone.
    Lost { slot: usize },
    /// An unreadable gesture frame for one slot.
    Corrupt { slot: usize },
}

/// Parse a whole script.  Steps are numbered from 1 in errors.
pub fn parse_script(text: &str) -> Result<Vec<ReplayStep>, ReplayError> {
    let value = lexpr::from_str(&format!("(\n{}\n)", text)).map_err(|e| ReplayError::Parse {
        step: 0,
        reason: e.to_string(),
    })?;
    let forms = list_items(&value).ok_or_else(|| ReplayError::Parse {
        step: 0,
        reason: "script is not a sequence of forms".to_string(),
    })?;

    forms
        .into_iter()
        .enumerate()
        .map(|(i, form)| {
            parse_step(form).map_err(|reason| ReplayError::Parse { step: i + 1, reason })
        })
        .collect()
}

pub fn load_script(path: &Path) -> Result<Vec<ReplayStep>, ReplayError> {
    let text = std::fs::read_to_string(path).map_err(|source| ReplayError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_script(&text)
}

fn parse_step(form: &Value) -> Result<ReplayStep, String> {
    let items = list_items(form).ok_or_else(|| format!("expected a list, got {form}"))?;
    let (head, args) = items.split_first().ok_or("empty form")?;
    let head = atom_string(head).ok_or_else(|| format!("bad form head {head}"))?;

    match head.as_str() {
        "body" => args
            .iter()
            .map(|v| atom_u64(v).ok_or_else(|| format!("bad tracking id {v}")))
            .collect::<Result<Vec<_>, _>>()
            .map(ReplayStep::Body),
        "gesture" => {
            let (slot, results) = args.split_first().ok_or("gesture needs a slot")?;
            let slot = parse_slot(slot)?;
            let results = results
                .iter()
                .map(|r| parse_result(r))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ReplayStep::Gesture { slot, results })
        }
        "lost" => single_slot(args).map(|slot| ReplayStep::Lost { slot }),
        "corrupt" => single_slot(args).map(|slot| ReplayStep::Corrupt { slot }),
        other => Err(format!("unknown form `{other}`")),
    }
}

fn parse_slot(value: &Value) -> Result<usize, String> {
    atom_u64(value)
        .and_then(|s| usize::try_from(s).ok())
        .ok_or_else(|| format!("bad slot {value}"))
}

fn single_slot(args: &[&Value]) -> Result<usize, String> {
    match args {
        [slot] => parse_slot(slot),
        _ => Err(format!("expected one slot, got {} arguments", args.len())),
    }
}

/// `("Name" DETECTED CONFIDENCE)`
fn parse_result(value: &Value) -> Result<(String, DetectionResult), String> {
    let items = list_items(value).ok_or_else(|| format!("bad gesture result {value}"))?;
    match items.as_slice() {
        [name, detected, confidence] => {
            let name = atom_string(name).ok_or_else(|| format!("bad gesture name {name}"))?;
            let detected = atom_bool(detected).ok_or_else(|| format!("bad detected flag {detected}"))?;
            let confidence =
                atom_f64(confidence).ok_or_else(|| format!("bad confidence {confidence}"))?;
            Ok((name, DetectionResult::new(detected, confidence as f32)))
        }
        _ => Err(format!("gesture result needs name, flag and confidence: {value}")),
    }
}

/// Check slot references and identity list lengths against the sensor.
fn validate(steps: &[ReplayStep], body_count: usize) -> Result<(), ReplayError> {
    for (i, step) in steps.iter().enumerate() {
        let reason = match step {
            ReplayStep::Body(ids) if ids.len() != body_count => Some(format!(
                "expected {body_count} tracking ids, got {}",
                ids.len()
            )),
            ReplayStep::Gesture { slot, .. }
            | ReplayStep::Lost { slot }
            | ReplayStep::Corrupt { slot }
                if *slot >= body_count =>
            {
                Some(format!("slot {slot} out of range (sensor tracks {body_count})"))
            }
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(ReplayError::Parse { step: i + 1, reason });
        }
    }
    Ok(())
}

// ── Sensor ─────────────────────────────────────────────────

#[derive(Debug)]
struct ReplayChannel {
    feed: SlotFeed,
    gestures: Vec<String>,
    tracking_id: TrackingId,
    paused: bool,
    released: bool,
}

impl ReplayChannel {
    fn delivering(&self) -> bool {
        !self.released && !self.paused && self.tracking_id != UNTRACKED
    }
}

/// Gesture source of one replay slot.
pub struct ReplaySource(Arc<Mutex<ReplayChannel>>);

impl GestureSource for ReplaySource {
    fn add_gestures(&mut self, names: &[String]) {
        let mut channel = self.0.lock();
        for name in names {
            if !channel.gestures.contains(name) {
                channel.gestures.push(name.clone());
            }
        }
    }

    fn set_tracking_id(&mut self, id: TrackingId) {
        self.0.lock().tracking_id = id;
    }

    fn set_paused(&mut self, paused: bool) {
        self.0.lock().paused = paused;
    }

    fn release(&mut self) {
        self.0.lock().released = true;
    }
}

/// Simulated sensor with a fixed number of body slots.
pub struct ReplaySensor {
    body_count: usize,
    channels: Vec<Option<Arc<Mutex<ReplayChannel>>>>,
}

impl ReplaySensor {
    pub fn new(body_count: usize) -> Self {
        Self {
            body_count,
            channels: vec![None; body_count],
        }
    }

    fn channel(&self, slot: usize) -> Option<&Arc<Mutex<ReplayChannel>>> {
        self.channels.get(slot).and_then(Option::as_ref)
    }

    /// Deliver a gesture frame to `slot`.  Gestures the slot never
    /// registered are left out.  Returns whether the frame was sent.
    pub fn deliver(&self, slot: usize, results: &[(String, DetectionResult)]) -> bool {
        let Some(channel) = self.channel(slot) else {
            return false;
        };
        let channel = channel.lock();
        if !channel.delivering() {
            return false;
        }
        let mut frame = GestureFrame::new(channel.tracking_id);
        for (name, result) in results {
            if channel.gestures.contains(name) {
                frame.insert(name.clone(), *result);
            } else {
                debug!(slot, gesture = %name, "unregistered gesture not reported");
            }
        }
        channel.feed.deliver_frame(Ok(frame))
    }

    /// Deliver an unreadable frame to `slot`.
    pub fn corrupt(&self, slot: usize) -> bool {
        match self.channel(slot) {
            Some(channel) => {
                let channel = channel.lock();
                channel.delivering() && channel.feed.deliver_frame(Err(FrameError::Unavailable))
            }
            None => false,
        }
    }

    /// Report that the body followed by `slot` is gone.
    pub fn lose_tracking(&self, slot: usize) -> bool {
        match self.channel(slot) {
            Some(channel) => {
                let channel = channel.lock();
                !channel.released
                    && channel.tracking_id != UNTRACKED
                    && channel.feed.tracking_lost(channel.tracking_id)
            }
            None => false,
        }
    }
}

impl Sensor for ReplaySensor {
    fn is_available(&self) -> bool {
        true
    }

    fn body_count(&self) -> usize {
        self.body_count
    }

    fn open_gesture_source(
        &mut self,
        slot: usize,
        feed: SlotFeed,
    ) -> Result<Box<dyn GestureSource>, SensorError> {
        if slot >= self.body_count {
            return Err(InvalidArgument::new(
                "slot",
                format!("slot {slot} out of range (sensor tracks {})", self.body_count),
            )
            .into());
        }
        let channel = Arc::new(Mutex::new(ReplayChannel {
            feed,
            gestures: Vec::new(),
            tracking_id: UNTRACKED,
            paused: true,
            released: false,
        }));
        self.channels[slot] = Some(channel.clone());
        Ok(Box::new(ReplaySource(channel)))
    }
}

// ── Driver ─────────────────────────────────────────────────

/// Outcome of a replay run.
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    /// Steps executed.
    pub steps: usize,
    /// Gesture frames handed to a slot.
    pub delivered: u64,
    /// Gesture frames the sensor withheld (slot paused or unbound).
    pub withheld: u64,
    /// Whether a signal cut the run short.
    pub interrupted: bool,
    /// Final per-slot views, in slot order.
    pub views: Vec<SlotView>,
    /// Final pool status.
    pub status: String,
}

struct ReplayDriver {
    pool: RecognizerPool,
    sensor: ReplaySensor,
    steps: Vec<ReplayStep>,
    cursor: usize,
    status_every: u64,
    delivered: u64,
    withheld: u64,
    running: bool,
}

impl ReplayDriver {
    /// Execute the next step.  Returns whether more steps remain.
    fn step(&mut self) -> bool {
        let Some(step) = self.steps.get(self.cursor) else {
            return false;
        };

        match step {
            ReplayStep::Body(ids) => {
                // earlier frames belong to the previous identities
                self.pool.flush();
                if let Err(e) = self.pool.on_entity_frame(ids) {
                    warn!(step = self.cursor + 1, error = %e, "identity list rejected");
                }
            }
            ReplayStep::Gesture { slot, results } => {
                if self.sensor.deliver(*slot, results) {
                    self.delivered += 1;
                } else {
                    self.withheld += 1;
                }
            }
            ReplayStep::Lost { slot } => {
                self.sensor.lose_tracking(*slot);
            }
            ReplayStep::Corrupt { slot } => {
                if self.sensor.corrupt(*slot) {
                    self.delivered += 1;
                } else {
                    self.withheld += 1;
                }
            }
        }
        self.cursor += 1;

        if self.status_every > 0 && self.cursor as u64 % self.status_every == 0 {
            self.pool.flush();
            info!(step = self.cursor, status = %self.pool.status_sexp(), "replay status");
        }
        self.cursor < self.steps.len()
    }
}

fn frame_interval(frame_rate_hz: u32) -> Duration {
    if frame_rate_hz == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / frame_rate_hz as f64)
    }
}

/// Play `steps` against a fresh pool over `catalog`, then shut the pool
/// down and report the final views.
pub fn run(
    catalog: GestureCatalog,
    config: &ReplayConfig,
    steps: Vec<ReplayStep>,
) -> Result<ReplaySummary, ReplayError> {
    validate(&steps, config.body_count)?;

    let mut sensor = ReplaySensor::new(config.body_count);
    let pool = RecognizerPool::new(&mut sensor, catalog)?;

    let mut event_loop = EventLoop::<ReplayDriver>::try_new()
        .map_err(|e| ReplayError::EventLoop(e.to_string()))?;
    let interval = frame_interval(config.frame_rate_hz);
    event_loop
        .handle()
        .insert_source(Timer::immediate(), move |_deadline, _, driver: &mut ReplayDriver| {
            if driver.step() {
                TimeoutAction::ToDuration(interval)
            } else {
                driver.running = false;
                TimeoutAction::Drop
            }
        })
        .map_err(|e| ReplayError::EventLoop(e.error.to_string()))?;

    let mut driver = ReplayDriver {
        pool,
        sensor,
        steps,
        cursor: 0,
        status_every: config.status_every,
        delivered: 0,
        withheld: 0,
        running: true,
    };

    info!(
        steps = driver.steps.len(),
        frame_rate_hz = config.frame_rate_hz,
        slots = driver.pool.slot_count(),
        "replay starting"
    );

    let mut interrupted = false;
    while driver.running {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("Shutdown signal received, stopping replay");
            interrupted = true;
            break;
        }
        event_loop
            .dispatch(Some(POLL_INTERVAL), &mut driver)
            .map_err(|e| ReplayError::EventLoop(e.to_string()))?;
    }

    driver.pool.shutdown();
    let summary = ReplaySummary {
        steps: driver.cursor,
        delivered: driver.delivered,
        withheld: driver.withheld,
        interrupted,
        views: driver.pool.views(),
        status: driver.pool.status_sexp(),
    };
    info!(
        steps = summary.steps,
        delivered = summary.delivered,
        withheld = summary.withheld,
        "replay finished"
    );
    Ok(summary)
}
