//! Scanning Core
//!
//! Turns a stream of frames into one card reading:
//! - [`main_loop`]: frame buffer, engine workers and observer notifications
//! - [`aggregator`]: error correction over noisy per-frame predictions
//! - [`state`]: when a session is done
//! - [`result`]: aggregated answers and session statistics

pub mod aggregator;
pub mod main_loop;
pub mod observer;
pub mod result;
pub mod state;

pub use aggregator::{ErrorCorrection, VoteTable};
pub use main_loop::{MainLoop, DEFAULT_FRAME_BUFFER_CAPACITY};
pub use observer::{Notification, ScanObserver};
pub use result::{CardDetails, ScanResult, ScanStatistics};
pub use state::{EvidenceGated, FixedDuration, ScanState, SessionStateMachine, TransitionRule};
