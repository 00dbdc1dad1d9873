use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use presencia_core::VerificationResult;
use presencia_hw::{request_stream, CameraError, CameraHandle, CaptureConstraints, CaptureDevice, ClientContext};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::machine::{SessionError, StatusSnapshot, VerificationSession};

/// Messages sent from handles to the session task.
enum Command {
    Cancel { reply: oneshot::Sender<bool> },
    Retry {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

type Acquisition = (u64, Result<CameraHandle, CameraError>);

/// Clone-safe handle to a running session. Dropping the last handle cancels
/// the session and releases the camera.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::Sender<Command>,
    status: watch::Receiver<StatusSnapshot>,
    result: watch::Receiver<Option<VerificationResult>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest published status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver that wakes on every status change.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    pub fn result(&self) -> Option<VerificationResult> {
        self.result.borrow().clone()
    }

    /// Skip verification. Returns whether the session was still cancellable.
    pub async fn cancel(&self) -> Result<bool, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Cancel { reply: reply_tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Start a new acquisition attempt after a failure or a skip.
    pub async fn retry(&self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Retry { reply: reply_tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Wait until the session reaches a final phase. Returns the last
    /// status seen if the task stops first.
    pub async fn wait_terminal(&self) -> StatusSnapshot {
        let mut rx = self.status.clone();
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.phase.is_terminal() {
                return snapshot;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

/// Spawn the task that owns `session` and start acquiring the camera.
///
/// The task serialises handle commands, acquisition results, sampling
/// ticks and the overall deadline through one `select!` loop, so nothing
/// touches the session concurrently and a slow tick delays rather than
/// overlaps the next one. Acquisition itself may block on a permission
/// prompt and runs on the blocking pool, one request at a time.
pub fn spawn_session(
    session: VerificationSession,
    device: Arc<dyn CaptureDevice>,
    timeout: Duration,
) -> SessionHandle {
    let id = session.id();
    let (tx, rx) = mpsc::channel::<Command>(8);
    let (status_tx, status_rx) = watch::channel(session.status().clone());
    let (result_tx, result_rx) = watch::channel(None);

    tokio::spawn(run_session(session, device, timeout, rx, status_tx, result_tx));

    SessionHandle {
        id,
        tx,
        status: status_rx,
        result: result_rx,
    }
}

async fn run_session(
    mut session: VerificationSession,
    device: Arc<dyn CaptureDevice>,
    timeout: Duration,
    mut rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<StatusSnapshot>,
    result_tx: watch::Sender<Option<VerificationResult>>,
) {
    let id = session.id();
    let (acq_tx, mut acq_rx) = mpsc::channel::<Acquisition>(4);
    let mut acquirer = Acquirer::new(device, session.client().clone(), acq_tx);

    let mut ticker = time::interval(session.profile().tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = time::sleep(timeout);
    tokio::pin!(deadline);

    tracing::info!(session = %id, profile = %session.profile().name, "session task started");

    match session.begin() {
        Ok(generation) => acquirer.request(generation),
        Err(e) => tracing::error!(session = %id, error = %e, "session was not idle"),
    }
    publish(&session, &status_tx, &result_tx);

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Cancel { reply }) => {
                    let cancelled = session.cancel(Utc::now());
                    publish(&session, &status_tx, &result_tx);
                    let _ = reply.send(cancelled);
                }
                Some(Command::Retry { reply }) => {
                    let outcome = session.retry();
                    if let Ok(generation) = outcome {
                        acquirer.request(generation);
                        deadline.as_mut().reset(Instant::now() + timeout);
                        ticker.reset();
                    }
                    publish(&session, &status_tx, &result_tx);
                    let _ = reply.send(outcome.map(|_| ()));
                }
                None => {
                    // Every handle is gone.
                    if session.cancel(Utc::now()) {
                        tracing::info!(session = %id, "all handles dropped, session cancelled");
                    }
                    publish(&session, &status_tx, &result_tx);
                    break;
                }
            },
            Some((generation, result)) = acq_rx.recv() => {
                session.on_camera_result(generation, result);
                if let Some(next) = acquirer.finished() {
                    if session.is_awaiting(next) {
                        acquirer.request(next);
                    }
                }
                publish(&session, &status_tx, &result_tx);
            }
            _ = ticker.tick(), if session.phase().is_sampling() => {
                session.tick(Utc::now());
                publish(&session, &status_tx, &result_tx);
            }
            _ = &mut deadline, if !session.phase().is_terminal() => {
                session.time_out();
                publish(&session, &status_tx, &result_tx);
            }
        }
    }

    tracing::info!(session = %id, phase = %session.phase(), "session task exiting");
}

/// Runs camera requests on the blocking pool, never more than one at a
/// time. A request made while another is still opening the device waits
/// until that one's result has been delivered and, if stale, released.
struct Acquirer {
    device: Arc<dyn CaptureDevice>,
    constraints: CaptureConstraints,
    client: ClientContext,
    tx: mpsc::Sender<Acquisition>,
    in_flight: bool,
    queued: Option<u64>,
}

impl Acquirer {
    fn new(device: Arc<dyn CaptureDevice>, client: ClientContext, tx: mpsc::Sender<Acquisition>) -> Self {
        Self {
            device,
            constraints: CaptureConstraints::default(),
            client,
            tx,
            in_flight: false,
            queued: None,
        }
    }

    fn request(&mut self, generation: u64) {
        if self.in_flight {
            tracing::debug!(generation, "camera busy with an earlier request, queued");
            self.queued = Some(generation);
            return;
        }
        self.in_flight = true;
        let device = Arc::clone(&self.device);
        let constraints = self.constraints;
        let client = self.client.clone();
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = request_stream(device.as_ref(), &constraints, &client);
            // If the session task is gone the handle drops here and stops the stream.
            let _ = tx.blocking_send((generation, result));
        });
    }

    /// The outstanding request delivered its result. Returns the generation
    /// queued behind it, if any.
    fn finished(&mut self) -> Option<u64> {
        self.in_flight = false;
        self.queued.take()
    }
}

/// Result goes out before status so a watcher that sees a final phase
/// can read the result straight away.
fn publish(
    session: &VerificationSession,
    status_tx: &watch::Sender<StatusSnapshot>,
    result_tx: &watch::Sender<Option<VerificationResult>>,
) {
    let result = session.result();
    result_tx.send_if_modified(|current| {
        if current.as_ref() == result {
            false
        } else {
            *current = result.cloned();
            true
        }
    });
    status_tx.send_if_modified(|current| {
        if *current == *session.status() {
            false
        } else {
            *current = session.status().clone();
            true
        }
    });
}
