//! Error correction
//!
//! Folds a stream of noisy per-frame predictions into one converging answer.
//! Every accepted prediction votes for its number, expiry and name fragments;
//! the answer for each field is the value with the most votes.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::scan::result::ScanResult;
use crate::scan::state::{ScanState, SessionStateMachine};
use crate::vision::{Expiry, Prediction};

/// Frequency table that remembers insertion order.
///
/// Ties on the highest count go to the value that entered the table first.
#[derive(Debug, Clone)]
pub struct VoteTable<K> {
    entries: Vec<(K, u32)>,
    index: HashMap<K, usize>,
}

impl<K: Eq + Hash + Clone> VoteTable<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn vote(&mut self, key: K) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, 1));
            }
        }
    }

    pub fn count<Q>(&self, key: &Q) -> u32
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index
            .get(key)
            .map(|&i| self.entries[i].1)
            .unwrap_or(0)
    }

    /// Value with the highest count
    pub fn winner(&self) -> Option<&K> {
        let mut best: Option<&(K, u32)> = None;
        for entry in &self.entries {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for VoteTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Combines predictions into a [`ScanResult`], filtered through the session
/// state machine it owns.
#[derive(Debug)]
pub struct ErrorCorrection {
    machine: SessionStateMachine,
    numbers: VoteTable<String>,
    expiries: VoteTable<Expiry>,
    names: VoteTable<String>,
    most_recent: Option<Arc<Prediction>>,
    frame_count: u64,
    first_seen: Option<Instant>,
    last_seen: Option<Instant>,
}

impl ErrorCorrection {
    pub fn new(machine: SessionStateMachine) -> Self {
        Self {
            machine,
            numbers: VoteTable::new(),
            expiries: VoteTable::new(),
            names: VoteTable::new(),
            most_recent: None,
            frame_count: 0,
            first_seen: None,
            last_seen: None,
        }
    }

    /// Add a prediction observed now
    pub fn add(&mut self, prediction: Arc<Prediction>) -> Option<ScanResult> {
        self.add_at(prediction, Instant::now())
    }

    /// Add a prediction observed at `now` and return the updated result
    pub fn add_at(&mut self, prediction: Arc<Prediction>, now: Instant) -> Option<ScanResult> {
        let state = self.machine.event(&prediction, now);

        // A reading the machine considers wrong must not pollute the tables
        if state != ScanState::OcrIncorrect {
            if let Some(number) = &prediction.number {
                self.numbers.vote(number.clone());
            }
            if let Some(expiry) = prediction.expiry() {
                self.expiries.vote(expiry);
            }
            for fragment in prediction.name_fragments() {
                self.names.vote(fragment.to_string());
            }
        }

        self.first_seen.get_or_insert(now);
        self.last_seen = Some(now);
        self.frame_count += 1;
        self.most_recent = Some(prediction);

        self.result()
    }

    /// Current best answer, `None` until there is evidence
    pub fn result(&self) -> Option<ScanResult> {
        let state = self.machine.state();
        if state == ScanState::Initial {
            return None;
        }
        let most_recent = self.most_recent.clone()?;

        let number = match self.numbers.winner() {
            Some(number) => number.clone(),
            // Concluded without ever reading a number, e.g. the back of a card
            None if state == ScanState::Finished => String::new(),
            None if state == ScanState::OcrIncorrect => most_recent.number.clone()?,
            None => return None,
        };

        Some(ScanResult {
            number,
            expiry: self.expiries.winner().copied(),
            name: self.names.winner().cloned(),
            state,
            frame_count: self.frame_count,
            duration: self.duration(),
            most_recent,
        })
    }

    /// Fresh aggregator: empty tables, state machine back at `Initial`
    pub fn reset(&self) -> Self {
        Self::new(self.machine.reset())
    }

    pub fn state(&self) -> ScanState {
        self.machine.state()
    }

    /// Number currently winning the vote
    pub fn best_number(&self) -> Option<&str> {
        self.numbers.winner().map(String::as_str)
    }

    pub fn votes_for_number(&self, number: &str) -> u32 {
        self.numbers.count(number)
    }

    pub fn votes_for_expiry(&self, expiry: &Expiry) -> u32 {
        self.expiries.count(expiry)
    }

    pub fn votes_for_name(&self, name: &str) -> u32 {
        self.names.count(name)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn duration(&self) -> Duration {
        match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        }
    }
}

impl Default for ErrorCorrection {
    fn default() -> Self {
        Self::new(SessionStateMachine::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::scan::state::{FrameEvidence, TransitionRule};
    use std::collections::VecDeque;

    const VISA: &str = "4242424242424242";
    const OTHER: &str = "4111111111111111";

    /// Rule that walks through a fixed list of states, one per event
    #[derive(Debug, Clone)]
    struct ScriptedRule {
        states: VecDeque<ScanState>,
    }

    impl TransitionRule for ScriptedRule {
        fn transition(
            &mut self,
            _state: ScanState,
            _in_state: Duration,
            _evidence: &FrameEvidence,
        ) -> Option<ScanState> {
            self.states.pop_front()
        }

        fn fresh(&self) -> Box<dyn TransitionRule> {
            Box::new(ScriptedRule {
                states: VecDeque::new(),
            })
        }
    }

    fn scripted(states: &[ScanState]) -> ErrorCorrection {
        ErrorCorrection::new(SessionStateMachine::new(Box::new(ScriptedRule {
            states: states.iter().copied().collect(),
        })))
    }

    fn reading(number: Option<&str>) -> Arc<Prediction> {
        let mut prediction = Prediction::empty(Frame::empty(0));
        prediction.number = number.map(str::to_string);
        Arc::new(prediction)
    }

    #[test]
    fn test_vote_table_winner_and_ties() {
        let mut table = VoteTable::new();
        assert!(table.winner().is_none());

        table.vote("b");
        table.vote("a");
        table.vote("a");
        table.vote("b");
        assert_eq!(table.winner(), Some(&"b"));

        table.vote("a");
        assert_eq!(table.winner(), Some(&"a"));
        assert_eq!(table.count("a"), 3);
        assert_eq!(table.count("z"), 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_majority_number_wins() {
        let mut ec = ErrorCorrection::default();
        for number in [OTHER, VISA, OTHER, VISA, OTHER] {
            ec.add(reading(Some(number)));
        }
        let result = ec.result().unwrap();
        assert_eq!(result.number, OTHER);
        assert_eq!(ec.votes_for_number(OTHER), 3);
        assert_eq!(ec.votes_for_number(VISA), 2);
    }

    #[test]
    fn test_tie_goes_to_first_inserted() {
        let mut ec = ErrorCorrection::default();
        for number in [VISA, OTHER, OTHER, VISA] {
            ec.add(reading(Some(number)));
        }
        assert_eq!(ec.best_number(), Some(VISA));
    }

    #[test]
    fn test_no_result_in_initial_state() {
        let mut ec = ErrorCorrection::default();
        assert!(ec.add(reading(None)).is_none());
        assert_eq!(ec.state(), ScanState::Initial);
        assert_eq!(ec.frame_count(), 1);
    }

    #[test]
    fn test_incorrect_reading_does_not_vote() {
        let mut ec = scripted(&[
            ScanState::OcrOnly,
            ScanState::OcrIncorrect,
            ScanState::OcrOnly,
        ]);

        ec.add(reading(Some(VISA)));
        let during = ec.add(reading(Some(OTHER))).unwrap();
        assert_eq!(during.state, ScanState::OcrIncorrect);
        assert_eq!(during.number, VISA);
        assert_eq!(ec.votes_for_number(OTHER), 0);

        ec.add(reading(Some(VISA)));
        assert_eq!(ec.votes_for_number(VISA), 2);
        assert_eq!(ec.votes_for_number(OTHER), 0);
    }

    #[test]
    fn test_incorrect_without_votes_surfaces_raw_number() {
        let mut ec = scripted(&[ScanState::OcrIncorrect]);
        let result = ec.add(reading(Some(OTHER))).unwrap();
        assert_eq!(result.number, OTHER);
        assert!(!result.is_finished());
        assert_eq!(ec.best_number(), None);
    }

    #[test]
    fn test_incorrect_without_any_number_is_none() {
        let mut ec = scripted(&[ScanState::OcrIncorrect]);
        assert!(ec.add(reading(None)).is_none());
    }

    #[test]
    fn test_finished_without_number() {
        let mut ec = scripted(&[ScanState::CardOnly, ScanState::Finished]);
        assert!(ec.add(reading(None)).is_none());

        let result = ec.add(reading(None)).unwrap();
        assert!(result.is_finished());
        assert!(result.number.is_empty());
        assert_eq!(result.frame_count, 2);
    }

    #[test]
    fn test_expiry_and_name_votes() {
        let mut ec = scripted(&[ScanState::OcrOnly]);
        let with = |expiry: (u32, u32), name: &str| {
            Arc::new(
                Prediction::empty(Frame::empty(0))
                    .with_number(VISA)
                    .with_expiry(expiry.0, expiry.1)
                    .with_name(name),
            )
        };

        ec.add(with((1, 2028), "JANE DOE\nACME CORP"));
        ec.add(with((7, 2028), "JANE DOE"));
        let result = ec.add(with((1, 2028), "JANE D0E")).unwrap();

        assert_eq!(result.expiry, Some(Expiry::new(1, 2028)));
        assert_eq!(result.name.as_deref(), Some("JANE DOE"));
        assert_eq!(ec.votes_for_expiry(&Expiry::new(7, 2028)), 1);
        assert_eq!(ec.votes_for_name("ACME CORP"), 1);
    }

    #[test]
    fn test_holder_name_wins_over_printed_labels() {
        let mut ec = ErrorCorrection::default();
        let lines = ["ACME BANK", "4242 4242 4242 4242", "VALID THRU 11/28", "JANE DOE"];
        let mut last = None;
        for _ in 0..5 {
            last = ec.add(Arc::new(Prediction::from_text_lines(Frame::empty(0), &lines)));
        }

        let result = last.unwrap();
        assert_eq!(result.name.as_deref(), Some("JANE DOE"));
        assert_eq!(ec.votes_for_name("ACME BANK"), 0);
        assert_eq!(ec.votes_for_name("VALID THRU"), 0);
    }

    #[test]
    fn test_fixed_duration_session_converges() {
        let base = Instant::now();
        let mut ec = ErrorCorrection::new(SessionStateMachine::fixed_duration(Duration::from_secs(2)));

        assert!(ec.add_at(reading(None), base).is_none());

        let mut last = None;
        for step in 1..=21u64 {
            let now = base + Duration::from_millis(step * 100);
            last = ec.add_at(reading(Some(VISA)), now);
            if step < 21 {
                assert!(!last.as_ref().unwrap().is_finished(), "finished early at step {}", step);
            }
        }

        let result = last.unwrap();
        assert!(result.is_finished());
        assert_eq!(result.number, VISA);
        assert_eq!(result.frame_count, 22);
        assert_eq!(result.duration, Duration::from_millis(2100));
    }

    #[test]
    fn test_reset_clears_votes() {
        let base = Instant::now();
        let mut ec = ErrorCorrection::new(SessionStateMachine::fixed_duration(Duration::from_secs(2)));
        for i in 0..5u64 {
            ec.add_at(reading(Some(VISA)), base + Duration::from_millis(i * 10));
        }
        assert_eq!(ec.state(), ScanState::OcrOnly);
        assert_eq!(ec.votes_for_number(VISA), 5);

        let mut fresh = ec.reset();
        assert_eq!(fresh.state(), ScanState::Initial);
        assert!(fresh.result().is_none());
        assert_eq!(fresh.votes_for_number(VISA), 0);

        assert!(fresh.add_at(reading(None), base).is_none());
        let result = fresh.add_at(reading(Some(OTHER)), base).unwrap();
        assert_eq!(result.number, OTHER);
        assert_eq!(result.frame_count, 2);
    }
}
