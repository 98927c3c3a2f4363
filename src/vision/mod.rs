//! Vision/OCR Layer
//!
//! Recognition engines map a frame to a [`Prediction`]. How an engine gets
//! from pixels to text is its own business; the scanner only sees the
//! [`RecognitionEngine`] trait. Several engines can run side by side, each on
//! its own worker thread.

pub mod card_text;
pub mod prediction;
pub mod replay;

pub use card_text::{extract_expiry, extract_number, luhn_valid};
pub use prediction::{Expiry, Prediction};
pub use replay::{load_script, script_frames, ScriptedEngine, ScriptedFrame};

use crate::capture::Frame;

/// Common interface for all recognition engines.
///
/// `recognize` is synchronous and may be slow. It is always called outside
/// the scanner's lock and never concurrently on the same engine.
pub trait RecognitionEngine: Send {
    /// Short engine name used in logs and predictions
    fn name(&self) -> &str;

    /// Recognize card fields in `frame`
    fn recognize(&mut self, frame: &Frame) -> Prediction;
}

impl<T: RecognitionEngine + ?Sized> RecognitionEngine for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn recognize(&mut self, frame: &Frame) -> Prediction {
        (**self).recognize(frame)
    }
}
