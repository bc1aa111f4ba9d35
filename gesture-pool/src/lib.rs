//! Per-body discrete gesture recognition.
//!
//! A [`pool::RecognizerPool`] keeps one [`recognizer::GestureRecognizer`] per
//! trackable body slot of a motion sensor.  Every recognizer shares one
//! [`catalog::GestureCatalog`] loaded from the configured definition
//! sources, follows the body the sensor reports for its slot and publishes
//! a per-gesture result snapshot after every gesture frame.

pub mod catalog;
pub mod config;
pub mod error;
pub mod pool;
pub mod recognizer;
pub mod replay;
pub mod result_state;
pub mod sensor;
pub mod sexp;
pub mod slot;
