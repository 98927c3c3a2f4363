//! Session state machine
//!
//! Decides, from elapsed time and evidence, where a scan session is in its
//! lifecycle and when it is done. Each rule is a transition function
//! `(state, time in state, evidence) -> Option<new state>`; `None` means stay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::vision::Prediction;

/// Scan session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// No evidence yet
    Initial,
    /// A card number has been read
    OcrOnly,
    /// A card is in view but no number has been read
    CardOnly,
    /// Card detected and number read
    OcrAndCard,
    /// The current reading is believed wrong; its votes are withheld
    OcrIncorrect,
    /// Number read, waiting for card detection to catch up
    OcrDelayForCard,
    /// Number read, the caller should force the torch on
    OcrForceFlash,
    /// Session concluded
    Finished,
    /// Collecting name and expiry after the number
    NameAndExpiry,
}

impl ScanState {
    pub fn is_finished(self) -> bool {
        self == ScanState::Finished
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanState::Initial => "initial",
            ScanState::OcrOnly => "ocr_only",
            ScanState::CardOnly => "card_only",
            ScanState::OcrAndCard => "ocr_and_card",
            ScanState::OcrIncorrect => "ocr_incorrect",
            ScanState::OcrDelayForCard => "ocr_delay_for_card",
            ScanState::OcrForceFlash => "ocr_force_flash",
            ScanState::Finished => "finished",
            ScanState::NameAndExpiry => "name_and_expiry",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence carried by a single frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameEvidence {
    pub has_number: bool,
    pub has_expiry: bool,
}

impl FrameEvidence {
    pub fn from_prediction(prediction: &Prediction) -> Self {
        Self {
            has_number: prediction.number.is_some(),
            has_expiry: prediction.expiry().is_some(),
        }
    }
}

/// A transition function for the session state machine.
///
/// Implementations may keep session evidence between calls; `fresh` returns
/// a copy carrying only the static configuration.
pub trait TransitionRule: Send + fmt::Debug {
    /// Next state, or `None` to stay in `state`
    fn transition(
        &mut self,
        state: ScanState,
        in_state: Duration,
        evidence: &FrameEvidence,
    ) -> Option<ScanState>;

    /// Same configuration, no evidence
    fn fresh(&self) -> Box<dyn TransitionRule>;
}

/// Finishes a fixed time after the first number is read
#[derive(Debug, Clone)]
pub struct FixedDuration {
    pub finish_after: Duration,
}

impl FixedDuration {
    pub const DEFAULT_FINISH_AFTER: Duration = Duration::from_secs(2);

    pub fn new(finish_after: Duration) -> Self {
        Self { finish_after }
    }
}

impl Default for FixedDuration {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FINISH_AFTER)
    }
}

impl TransitionRule for FixedDuration {
    fn transition(
        &mut self,
        state: ScanState,
        in_state: Duration,
        evidence: &FrameEvidence,
    ) -> Option<ScanState> {
        match state {
            ScanState::Initial if evidence.has_number => Some(ScanState::OcrOnly),
            ScanState::OcrOnly if in_state >= self.finish_after => Some(ScanState::Finished),
            _ => None,
        }
    }

    fn fresh(&self) -> Box<dyn TransitionRule> {
        Box::new(self.clone())
    }
}

/// Finishes after `min` once an expiry has been seen, or after `max` anyway
#[derive(Debug, Clone)]
pub struct EvidenceGated {
    pub min: Duration,
    pub max: Duration,
    expiry_seen: bool,
}

impl EvidenceGated {
    pub const DEFAULT_MIN: Duration = Duration::from_secs(2);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(4);

    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            expiry_seen: false,
        }
    }

    /// Whether an expiry has been seen at any point in this session
    pub fn expiry_seen(&self) -> bool {
        self.expiry_seen
    }
}

impl Default for EvidenceGated {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN, Self::DEFAULT_MAX)
    }
}

impl TransitionRule for EvidenceGated {
    fn transition(
        &mut self,
        state: ScanState,
        in_state: Duration,
        evidence: &FrameEvidence,
    ) -> Option<ScanState> {
        self.expiry_seen |= evidence.has_expiry;

        match state {
            ScanState::Initial if evidence.has_number => Some(ScanState::OcrOnly),
            ScanState::OcrOnly if in_state >= self.min && self.expiry_seen => {
                Some(ScanState::Finished)
            }
            ScanState::OcrOnly if in_state >= self.max => Some(ScanState::Finished),
            _ => None,
        }
    }

    fn fresh(&self) -> Box<dyn TransitionRule> {
        Box::new(EvidenceGated::new(self.min, self.max))
    }
}

/// Tracks the current state and how long the session has been in it
#[derive(Debug)]
pub struct SessionStateMachine {
    rule: Box<dyn TransitionRule>,
    state: ScanState,
    /// Set on the first event, then on every transition
    entered_at: Option<Instant>,
}

impl SessionStateMachine {
    pub fn new(rule: Box<dyn TransitionRule>) -> Self {
        Self {
            rule,
            state: ScanState::Initial,
            entered_at: None,
        }
    }

    pub fn fixed_duration(finish_after: Duration) -> Self {
        Self::new(Box::new(FixedDuration::new(finish_after)))
    }

    pub fn evidence_gated(min: Duration, max: Duration) -> Self {
        Self::new(Box::new(EvidenceGated::new(min, max)))
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Time spent in the current state as of `now`
    pub fn elapsed_in_state(&self, now: Instant) -> Duration {
        self.entered_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(Duration::ZERO)
    }

    /// Feed one prediction observed at `now` and return the resulting state
    pub fn event(&mut self, prediction: &Prediction, now: Instant) -> ScanState {
        self.event_with_evidence(&FrameEvidence::from_prediction(prediction), now)
    }

    pub fn event_with_evidence(&mut self, evidence: &FrameEvidence, now: Instant) -> ScanState {
        if self.state.is_finished() {
            return self.state;
        }

        let entered_at = *self.entered_at.get_or_insert(now);
        let in_state = now.saturating_duration_since(entered_at);

        if let Some(next) = self.rule.transition(self.state, in_state, evidence) {
            if next != self.state {
                debug!("Scan state {} -> {} after {:?}", self.state, next, in_state);
                self.state = next;
                self.entered_at = Some(now);
            }
        }
        self.state
    }

    /// Fresh machine at `Initial` with the same configuration
    pub fn reset(&self) -> Self {
        Self::new(self.rule.fresh())
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new(Box::new(FixedDuration::default()))
    }
}
