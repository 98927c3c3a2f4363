//! cardscan - Real-time payment card recognition
//!
//! Runs one or more recognition engines over a live frame stream and folds
//! their noisy per-frame readings into a single card number, expiry and name.
//! Recognition itself is delegated to [`vision::RecognitionEngine`]
//! implementations; this crate schedules frames, corrects errors and decides
//! when a scan is done.

pub mod capture;
pub mod config;
pub mod error;
pub mod scan;
pub mod vision;

pub use capture::{Frame, FrameMetadata, Rect};
pub use config::ScanConfig;
pub use error::{Result, ScanError};
pub use scan::{
    CardDetails, ErrorCorrection, MainLoop, ScanObserver, ScanResult, ScanState, ScanStatistics,
    SessionStateMachine,
};
pub use vision::{Expiry, Prediction, RecognitionEngine};
