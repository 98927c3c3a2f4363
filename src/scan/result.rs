//! Aggregated scan results and session statistics

use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::scan::state::ScanState;
use crate::vision::{Expiry, Prediction};

/// Best-guess card fields shown to the user while scanning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardDetails {
    pub number: Option<String>,
    pub expiry: Option<Expiry>,
    pub name: Option<String>,
}

/// The aggregator's best answer at a point in time
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Most recent prediction fed to the aggregator
    pub most_recent: Arc<Prediction>,
    /// Chosen card number; empty when the session finished without one
    pub number: String,
    /// Chosen expiry
    pub expiry: Option<Expiry>,
    /// Chosen cardholder name
    pub name: Option<String>,
    /// Session state when the result was produced
    pub state: ScanState,
    /// Predictions the aggregator has seen this session
    pub frame_count: u64,
    /// Time since the aggregator's first prediction
    pub duration: Duration,
}

impl ScanResult {
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn has_number(&self) -> bool {
        !self.number.is_empty()
    }

    /// Fields for the `show_*` observer callbacks
    pub fn details(&self) -> CardDetails {
        CardDetails {
            number: self.has_number().then(|| self.number.clone()),
            expiry: self.expiry,
            name: self.name.clone(),
        }
    }
}

/// Counters describing one scan session.
///
/// `success` is write-once: whichever of completion or cancellation records
/// an outcome first wins, later writes are ignored.
#[derive(Debug, Clone)]
pub struct ScanStatistics {
    /// Identifier used to correlate log lines of one session
    pub session_id: Uuid,
    /// Frames that went through recognition
    pub frames_processed: u64,
    /// Number of engines the scanner runs
    pub engine_count: usize,
    /// When scanning started
    pub start_time: Instant,
    /// When an outcome was recorded
    pub end_time: Option<Instant>,
    /// Outcome; `None` while the session is still running
    success: Option<bool>,
    /// Whether the user cancelled the scan
    pub user_cancelled: bool,
}

impl ScanStatistics {
    pub fn new(engine_count: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            frames_processed: 0,
            engine_count,
            start_time: Instant::now(),
            end_time: None,
            success: None,
            user_cancelled: false,
        }
    }

    pub fn success(&self) -> Option<bool> {
        self.success
    }

    /// Record a successful completion. Returns false if an outcome was
    /// already recorded.
    pub fn mark_success(&mut self) -> bool {
        self.record(true)
    }

    /// Record a user cancellation. Returns false if an outcome was already
    /// recorded; the cancel flag is set either way.
    pub fn mark_cancelled(&mut self) -> bool {
        self.user_cancelled = true;
        self.record(false)
    }

    fn record(&mut self, success: bool) -> bool {
        if self.success.is_some() {
            return false;
        }
        self.success = Some(success);
        self.end_time = Some(Instant::now());
        true
    }

    /// Wall time from start to outcome, or to now while running
    pub fn elapsed(&self) -> Duration {
        self.end_time
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.start_time)
    }

    /// Average frames per second over the session
    pub fn frames_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.frames_processed as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;

    #[test]
    fn test_success_is_write_once() {
        let mut stats = ScanStatistics::new(2);
        assert_eq!(stats.success(), None);

        assert!(stats.mark_success());
        assert!(!stats.mark_cancelled());
        assert_eq!(stats.success(), Some(true));
        assert!(stats.user_cancelled);
    }

    #[test]
    fn test_cancel_wins_when_first() {
        let mut stats = ScanStatistics::new(1);
        assert!(stats.mark_cancelled());
        let end = stats.end_time;
        assert!(!stats.mark_success());
        assert_eq!(stats.success(), Some(false));
        assert_eq!(stats.end_time, end);
    }

    #[test]
    fn test_result_details() {
        let result = ScanResult {
            most_recent: Arc::new(Prediction::empty(Frame::empty(0))),
            number: String::new(),
            expiry: Some(Expiry::new(1, 2030)),
            name: None,
            state: ScanState::Finished,
            frame_count: 3,
            duration: Duration::from_millis(300),
        };
        assert!(result.is_finished());
        assert!(!result.has_number());

        let details = result.details();
        assert_eq!(details.number, None);
        assert_eq!(details.expiry, Some(Expiry::new(1, 2030)));
    }
}
