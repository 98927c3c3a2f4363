//! Scanner main loop
//!
//! Producer/consumer core of the scanner. Frames are pushed into a small
//! most-recent-first buffer; idle engine workers pop the newest frame,
//! recognize it on their own thread without holding the lock, then take the
//! lock again to feed the prediction to error correction and queue observer
//! callbacks.
//!
//! Locking: all scanner state lives behind one `parking_lot::Mutex`. Nothing
//! blocking happens while it is held. Recognition runs outside it and
//! observer callbacks run on the notification thread.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::scan::aggregator::ErrorCorrection;
use crate::scan::observer::{Notification, NotificationSender, Notifier, ScanObserver};
use crate::scan::result::{ScanResult, ScanStatistics};
use crate::scan::state::ScanState;
use crate::vision::{Prediction, RecognitionEngine};

/// Frames kept waiting for an engine unless configured otherwise
pub const DEFAULT_FRAME_BUFFER_CAPACITY: usize = 2;

/// Token for one engine worker.
///
/// Exactly one handle exists per worker. While it sits in the idle list the
/// worker is idle; dispatching moves it into the worker, which pushes it back
/// when it runs out of frames.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    dispatch: Sender<WorkerCommand>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    fn dispatch(self) {
        let tx = self.dispatch.clone();
        if tx.send(WorkerCommand::Run(self)).is_err() {
            warn!("Engine worker is gone, dropping dispatch");
        }
    }
}

#[derive(Debug)]
enum WorkerCommand {
    Run(WorkerHandle),
    Shutdown,
}

/// Everything guarded by the scanner lock
struct LoopState {
    /// Newest frame at the front
    frames: VecDeque<Frame>,
    idle: Vec<WorkerHandle>,
    aggregator: ErrorCorrection,
    stats: ScanStatistics,
    background: bool,
    cancelled: bool,
    /// Set once `on_complete` has been queued for the current session
    session_complete: bool,
    /// Used for `should_use_prediction`; callbacks go through the notifier
    observer: Option<Arc<dyn ScanObserver>>,
}

struct Shared {
    state: Mutex<LoopState>,
    capacity: usize,
    notifications: NotificationSender,
}

struct EngineWorker {
    name: String,
    dispatch: Sender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

/// Multi-engine card scanner
pub struct MainLoop {
    shared: Arc<Shared>,
    workers: Vec<EngineWorker>,
    notifier: Notifier,
}

impl MainLoop {
    /// Create a scanner with default settings
    pub fn new(
        engines: Vec<Box<dyn RecognitionEngine>>,
        observer: Option<Arc<dyn ScanObserver>>,
    ) -> Result<Self> {
        Self::with_config(engines, observer, &ScanConfig::default())
    }

    /// Create a scanner from configuration
    pub fn with_config(
        engines: Vec<Box<dyn RecognitionEngine>>,
        observer: Option<Arc<dyn ScanObserver>>,
        config: &ScanConfig,
    ) -> Result<Self> {
        config.validate()?;
        let aggregator = ErrorCorrection::new(config.state_machine.build());
        Self::with_parts(
            engines,
            observer,
            aggregator,
            config.scanner.frame_buffer_capacity,
        )
    }

    /// Create a scanner around an existing aggregator
    pub fn with_parts(
        engines: Vec<Box<dyn RecognitionEngine>>,
        observer: Option<Arc<dyn ScanObserver>>,
        aggregator: ErrorCorrection,
        frame_buffer_capacity: usize,
    ) -> Result<Self> {
        if engines.is_empty() {
            return Err(ScanError::NoEngines);
        }
        if frame_buffer_capacity == 0 {
            return Err(ScanError::InvalidConfig(
                "frame buffer capacity must be at least 1".to_string(),
            ));
        }

        let notifier = Notifier::spawn(observer.clone())?;
        let stats = ScanStatistics::new(engines.len());
        let session_id = stats.session_id;

        let shared = Arc::new(Shared {
            state: Mutex::new(LoopState {
                frames: VecDeque::with_capacity(frame_buffer_capacity + 1),
                idle: Vec::with_capacity(engines.len()),
                aggregator,
                stats,
                background: false,
                cancelled: false,
                session_complete: false,
                observer,
            }),
            capacity: frame_buffer_capacity,
            notifications: notifier.sender(),
        });

        let mut main_loop = Self {
            shared,
            workers: Vec::with_capacity(engines.len()),
            notifier,
        };

        for (id, engine) in engines.into_iter().enumerate() {
            let worker = main_loop.spawn_worker(id, engine)?;
            main_loop.workers.push(worker);
        }

        info!(
            "Scan session {} started with {} engine(s): {}",
            session_id,
            main_loop.workers.len(),
            main_loop
                .workers
                .iter()
                .map(|w| w.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(main_loop)
    }

    fn spawn_worker(&self, id: usize, engine: Box<dyn RecognitionEngine>) -> Result<EngineWorker> {
        let name = engine.name().to_string();
        let (tx, rx) = unbounded();
        let shared = self.shared.clone();
        let thread_name = format!("cardscan-engine-{}", id);

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_worker(id, engine, shared, rx))
            .map_err(|source| ScanError::Spawn {
                name: thread_name,
                source,
            })?;

        self.shared.state.lock().idle.push(WorkerHandle {
            id,
            dispatch: tx.clone(),
        });

        Ok(EngineWorker {
            name,
            dispatch: tx,
            thread_id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    /// Offer a frame to the scanner.
    ///
    /// The frame goes to the front of the buffer and the oldest frames are
    /// evicted beyond capacity. Frames are dropped while suspended, after
    /// cancellation and once the session has finished.
    pub fn push(&self, frame: Frame) {
        let worker = {
            let mut state = self.shared.state.lock();
            if state.background || state.cancelled || state.session_complete {
                return;
            }

            state.frames.push_front(frame);
            while state.frames.len() > self.shared.capacity {
                if let Some(evicted) = state.frames.pop_back() {
                    debug!("Frame {} evicted from buffer", evicted.id);
                }
            }
            state.idle.pop()
        };

        if let Some(worker) = worker {
            debug!("Dispatching engine worker {}", worker.id);
            worker.dispatch();
        }
    }

    /// Start a new session: empty vote tables, state machine at `Initial`.
    /// Engine workers are left alone.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.aggregator = state.aggregator.reset();
        state.session_complete = false;
        debug!("Scan session {} reset", state.stats.session_id);
    }

    /// The user abandoned the scan.
    ///
    /// Records failure unless an outcome is already recorded and drops the
    /// observer. When this returns no further observer callback will run.
    /// Must not be called from `should_use_prediction`.
    pub fn user_cancelled(&self) {
        {
            let mut state = self.shared.state.lock();
            state.cancelled = true;
            state.frames.clear();
            if state.stats.mark_cancelled() {
                info!(
                    "Scan session {} cancelled by user after {} frames",
                    state.stats.session_id, state.stats.frames_processed
                );
            }
            state.observer = None;
        }
        // Waits out a callback already running on the notification thread
        self.notifier.clear_observer();
    }

    /// The embedding application went to the background
    pub fn on_suspend(&self) {
        let mut state = self.shared.state.lock();
        state.background = true;
        state.frames.clear();
        info!("Scan session {} suspended", state.stats.session_id);
    }

    /// The embedding application came back; evidence gathered before is dropped
    pub fn on_resume(&self) {
        {
            let mut state = self.shared.state.lock();
            state.background = false;
            info!("Scan session {} resumed", state.stats.session_id);
        }
        self.reset();
    }

    /// Current session state
    pub fn state(&self) -> ScanState {
        self.shared.state.lock().aggregator.state()
    }

    /// Current best answer
    pub fn result(&self) -> Option<ScanResult> {
        self.shared.state.lock().aggregator.result()
    }

    /// Snapshot of the session statistics
    pub fn statistics(&self) -> ScanStatistics {
        self.shared.state.lock().stats.clone()
    }

    /// Ids of the buffered frames, newest first
    pub fn buffered_frames(&self) -> Vec<u64> {
        self.shared.state.lock().frames.iter().map(|f| f.id).collect()
    }

    /// Number of workers waiting for frames
    pub fn idle_workers(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    pub fn engine_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().background
    }

    /// Stop the engine workers and the notification thread.
    ///
    /// Workers finish the frames still buffered; queued callbacks are
    /// delivered before the notification thread exits.
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            let _ = worker.dispatch.send(WorkerCommand::Shutdown);
        }

        let current = std::thread::current().id();
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if worker.thread_id == current {
                    continue;
                }
                if handle.join().is_err() {
                    warn!("Engine worker {} panicked", worker.name);
                }
            }
        }

        self.notifier.shutdown();
    }
}

impl Drop for MainLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    id: usize,
    mut engine: Box<dyn RecognitionEngine>,
    shared: Arc<Shared>,
    rx: Receiver<WorkerCommand>,
) {
    debug!("Engine worker {} ({}) starting", id, engine.name());
    for command in rx.iter() {
        match command {
            WorkerCommand::Run(handle) => shared.analysis_cycle(engine.as_mut(), handle),
            WorkerCommand::Shutdown => break,
        }
    }
    debug!("Engine worker {} ({}) exiting", id, engine.name());
}

impl Shared {
    /// Drain the buffer with one engine until it is empty or the session ends
    fn analysis_cycle(&self, engine: &mut dyn RecognitionEngine, handle: WorkerHandle) {
        loop {
            let frame = {
                let mut state = self.state.lock();
                match state.frames.pop_front() {
                    Some(frame) => frame,
                    None => {
                        state.idle.push(handle);
                        return;
                    }
                }
            };

            let prediction = Arc::new(engine.recognize(&frame));

            if self.combine(&frame, prediction) {
                let mut state = self.state.lock();
                // A finishing worker is normally not redispatched. Frames here
                // can only belong to a session started by reset() while this
                // frame was in flight, and this worker drains them.
                if state.frames.is_empty() {
                    state.idle.push(handle);
                    return;
                }
            }
        }
    }

    /// Feed one prediction through error correction. Returns true when the
    /// session has finished or was cancelled.
    fn combine(&self, frame: &Frame, prediction: Arc<Prediction>) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Recognition outlived user_cancelled(): nothing is counted or queued
        if state.cancelled {
            debug!("Prediction for frame {} discarded after cancellation", frame.id);
            return true;
        }

        state.stats.frames_processed += 1;
        self.notifications.send(Notification::Prediction {
            prediction: prediction.clone(),
            frame: frame.metadata(),
            state: state.aggregator.state(),
        });

        if state.session_complete {
            return true;
        }

        if let Some(observer) = &state.observer {
            if !observer.should_use_prediction(state.aggregator.best_number(), &prediction) {
                debug!("Prediction for frame {} filtered out by observer", frame.id);
                return false;
            }
        }

        let result = state.aggregator.add(prediction);
        let notification = Notification::for_result(result.as_ref());

        let finished = matches!(notification, Notification::Complete(_));
        if finished {
            state.session_complete = true;
            state.frames.clear();
            if state.stats.mark_success() {
                info!(
                    "Scan session {} finished after {} frames in {:?}",
                    state.stats.session_id,
                    state.stats.frames_processed,
                    state.stats.elapsed()
                );
            }
        }

        self.notifications.send(notification);
        finished
    }
}
