//! Observer callbacks and the notification thread
//!
//! Every observer callback runs on one dedicated notification thread, in the
//! order the scanner enqueued it. Callbacks are therefore never concurrent
//! with each other. The observer is looked up at delivery time, so clearing
//! it suppresses everything still queued.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, info};

use crate::capture::FrameMetadata;
use crate::error::{Result, ScanError};
use crate::scan::result::{CardDetails, ScanResult};
use crate::scan::state::ScanState;
use crate::vision::Prediction;

/// Name of the thread observer callbacks run on
pub const NOTIFY_THREAD_NAME: &str = "cardscan-notify";

/// Receives scan progress. All methods default to doing nothing.
///
/// Every method except [`should_use_prediction`](Self::should_use_prediction)
/// is called on the notification thread.
pub trait ScanObserver: Send + Sync {
    /// A frame went through recognition
    fn on_prediction(&self, _prediction: &Prediction, _frame: &FrameMetadata, _state: ScanState) {}

    /// No usable card reading yet
    fn on_show_no_card(&self) {}

    /// The current reading looks wrong
    fn on_show_wrong_card(&self, _details: &CardDetails) {}

    /// Best guess so far
    fn on_show_card_details(&self, _details: &CardDetails) {}

    /// Best guess so far, and the user should be prompted to act (e.g. torch)
    fn on_show_card_details_urgent(&self, _details: &CardDetails) {}

    /// The session finished. Fires once per session.
    fn on_complete(&self, _result: &ScanResult) {}

    /// Filter applied before a prediction reaches error correction.
    ///
    /// Called on the engine's worker thread while the scanner lock is held;
    /// implementations must be quick and must not call back into the scanner.
    fn should_use_prediction(&self, _best_number: Option<&str>, _prediction: &Prediction) -> bool {
        true
    }
}

/// A queued observer callback
#[derive(Debug, Clone)]
pub enum Notification {
    Prediction {
        prediction: Arc<Prediction>,
        frame: FrameMetadata,
        state: ScanState,
    },
    ShowNoCard,
    ShowWrongCard(CardDetails),
    ShowCardDetails(CardDetails),
    ShowCardDetailsUrgent(CardDetails),
    Complete(ScanResult),
}

impl Notification {
    /// Callback selected by the state of the latest result
    pub fn for_result(result: Option<&ScanResult>) -> Notification {
        let Some(result) = result else {
            return Notification::ShowNoCard;
        };
        match result.state {
            ScanState::Initial | ScanState::CardOnly => Notification::ShowNoCard,
            ScanState::OcrOnly
            | ScanState::OcrAndCard
            | ScanState::OcrDelayForCard
            | ScanState::NameAndExpiry => Notification::ShowCardDetails(result.details()),
            ScanState::OcrForceFlash => Notification::ShowCardDetailsUrgent(result.details()),
            ScanState::OcrIncorrect => Notification::ShowWrongCard(result.details()),
            ScanState::Finished => Notification::Complete(result.clone()),
        }
    }

    fn deliver(&self, observer: &dyn ScanObserver) {
        match self {
            Notification::Prediction {
                prediction,
                frame,
                state,
            } => observer.on_prediction(prediction, frame, *state),
            Notification::ShowNoCard => observer.on_show_no_card(),
            Notification::ShowWrongCard(details) => observer.on_show_wrong_card(details),
            Notification::ShowCardDetails(details) => observer.on_show_card_details(details),
            Notification::ShowCardDetailsUrgent(details) => {
                observer.on_show_card_details_urgent(details)
            }
            Notification::Complete(result) => observer.on_complete(result),
        }
    }
}

enum NotifierMessage {
    Deliver(Notification),
    Shutdown,
}

/// Cloneable handle used by worker threads to enqueue callbacks
#[derive(Clone)]
pub struct NotificationSender {
    tx: Sender<NotifierMessage>,
}

impl NotificationSender {
    pub fn send(&self, notification: Notification) {
        // Only fails once the notifier is gone, at which point nobody listens
        let _ = self.tx.send(NotifierMessage::Deliver(notification));
    }
}

type ObserverSlot = ReentrantMutex<RefCell<Option<Arc<dyn ScanObserver>>>>;

/// Owns the notification thread and the observer slot it delivers to
pub struct Notifier {
    tx: Sender<NotifierMessage>,
    slot: Arc<ObserverSlot>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Notifier {
    /// Start the notification thread
    pub fn spawn(observer: Option<Arc<dyn ScanObserver>>) -> Result<Self> {
        let (tx, rx) = unbounded();
        let slot: Arc<ObserverSlot> = Arc::new(ReentrantMutex::new(RefCell::new(observer)));

        let thread_slot = slot.clone();
        let handle = std::thread::Builder::new()
            .name(NOTIFY_THREAD_NAME.to_string())
            .spawn(move || run_notifier(rx, thread_slot))
            .map_err(|source| ScanError::Spawn {
                name: NOTIFY_THREAD_NAME.to_string(),
                source,
            })?;
        let thread_id = handle.thread().id();

        Ok(Self {
            tx,
            slot,
            handle: Some(handle),
            thread_id,
        })
    }

    pub fn sender(&self) -> NotificationSender {
        NotificationSender {
            tx: self.tx.clone(),
        }
    }

    /// Drop the observer.
    ///
    /// Waits for a callback that is running on the notification thread to
    /// return, unless called from inside that callback. Nothing is delivered
    /// after this returns.
    pub fn clear_observer(&self) {
        let guard = self.slot.lock();
        guard.borrow_mut().take();
    }

    fn is_notifier_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Deliver everything already queued, then stop the thread
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(NotifierMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            if self.is_notifier_thread() {
                // Dropped from inside a callback; the thread exits on its own
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_notifier(rx: Receiver<NotifierMessage>, slot: Arc<ObserverSlot>) {
    debug!("Notification thread starting");
    for message in rx.iter() {
        match message {
            NotifierMessage::Deliver(notification) => {
                // Held for the whole callback so clear_observer can wait on it
                let guard = slot.lock();
                let observer = guard.borrow().clone();
                if let Some(observer) = observer {
                    notification.deliver(observer.as_ref());
                }
            }
            NotifierMessage::Shutdown => break,
        }
    }
    info!("Notification thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::vision::Expiry;
    use std::time::Duration;

    struct Forwarder {
        tx: Sender<String>,
    }

    impl ScanObserver for Forwarder {
        fn on_show_no_card(&self) {
            let _ = self.tx.send(format!(
                "no_card@{}",
                std::thread::current().name().unwrap_or("?")
            ));
        }

        fn on_show_card_details(&self, details: &CardDetails) {
            let _ = self
                .tx
                .send(format!("details:{}", details.number.clone().unwrap_or_default()));
        }
    }

    fn result_in(state: ScanState) -> ScanResult {
        ScanResult {
            most_recent: Arc::new(Prediction::empty(Frame::empty(0))),
            number: "4242424242424242".to_string(),
            expiry: Some(Expiry::new(2, 2029)),
            name: None,
            state,
            frame_count: 1,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_notification_for_state() {
        assert!(matches!(Notification::for_result(None), Notification::ShowNoCard));
        assert!(matches!(
            Notification::for_result(Some(&result_in(ScanState::CardOnly))),
            Notification::ShowNoCard
        ));
        assert!(matches!(
            Notification::for_result(Some(&result_in(ScanState::OcrOnly))),
            Notification::ShowCardDetails(_)
        ));
        assert!(matches!(
            Notification::for_result(Some(&result_in(ScanState::OcrForceFlash))),
            Notification::ShowCardDetailsUrgent(_)
        ));
        assert!(matches!(
            Notification::for_result(Some(&result_in(ScanState::OcrIncorrect))),
            Notification::ShowWrongCard(_)
        ));
        assert!(matches!(
            Notification::for_result(Some(&result_in(ScanState::Finished))),
            Notification::Complete(_)
        ));
    }

    #[test]
    fn test_delivers_in_order_on_notify_thread() {
        let (tx, rx) = unbounded();
        let notifier = Notifier::spawn(Some(Arc::new(Forwarder { tx }))).unwrap();
        let sender = notifier.sender();

        sender.send(Notification::ShowNoCard);
        sender.send(Notification::ShowCardDetails(CardDetails {
            number: Some("1".into()),
            ..Default::default()
        }));

        let timeout = Duration::from_secs(5);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            format!("no_card@{}", NOTIFY_THREAD_NAME)
        );
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "details:1");
        assert!(!notifier.is_notifier_thread());
    }

    #[test]
    fn test_cleared_observer_receives_nothing() {
        let (tx, rx) = unbounded();
        let mut notifier = Notifier::spawn(Some(Arc::new(Forwarder { tx }))).unwrap();
        notifier.clear_observer();

        notifier.sender().send(Notification::ShowNoCard);
        notifier.shutdown();
        assert!(rx.try_recv().is_err());
    }
}
