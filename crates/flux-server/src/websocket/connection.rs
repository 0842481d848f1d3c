//! Per-client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use flux_core::{ConnectionId, Envelope};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::hub::HubError;
use crate::metrics::WS_SEND_DROPS_TOTAL;

/// The cancellable unit of work a connection is currently running.
struct ActiveTask {
    generation: u64,
    cancel: CancellationToken,
}

/// A connected WebSocket client.
///
/// Holds the sending half of the outbound queue and the one cancellable
/// task (chat stream or change generation) the client may have in flight.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// `None` once closed.
    tx: Mutex<Option<mpsc::Sender<Arc<String>>>>,
    /// Guards task replacement and task output together.
    active: Mutex<Option<ActiveTask>>,
    next_generation: AtomicU64,
    /// When the connection was accepted.
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Wrap the sending half of an outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx: Mutex::new(Some(tx)),
            active: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a pre-serialized frame without waiting.
    ///
    /// A full queue drops the frame and reports
    /// [`HubError::BackpressureExceeded`]; the connection stays open.
    pub fn try_send(&self, message: Arc<String>) -> Result<(), HubError> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(HubError::ConnectionClosed(self.id.clone()));
        };
        match tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                Err(HubError::BackpressureExceeded(self.id.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(HubError::ConnectionClosed(self.id.clone())),
        }
    }

    /// Serialize and enqueue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), HubError> {
        let json = envelope.encode()?;
        self.try_send(Arc::new(json))
    }

    /// Frames dropped on a full queue so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Close the outbound queue and cancel the active task.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let closed = self.tx.lock().take().is_some();
        if closed {
            let _ = self.cancel_active();
        }
        closed
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Start a new cancellable task, cancelling whatever was running.
    ///
    /// Returns the task's generation and its token. On a closed connection
    /// the token comes back already cancelled.
    pub fn begin_task(&self) -> (u64, CancellationToken) {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        if self.is_closed() {
            cancel.cancel();
        }
        *active = Some(ActiveTask {
            generation,
            cancel: cancel.clone(),
        });
        (generation, cancel)
    }

    /// Cancel the active task, if any. Returns whether one was running.
    pub fn cancel_active(&self) -> bool {
        match self.active.lock().take() {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the active slot if it still belongs to `generation`.
    pub fn finish_task(&self, generation: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|t| t.generation == generation) {
            *active = None;
        }
    }

    /// Whether `generation` is the live, uncancelled task.
    pub fn is_current(&self, generation: u64) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|t| t.generation == generation && !t.cancel.is_cancelled())
    }

    /// Enqueue `envelope` only while `generation` is the live task.
    ///
    /// The check and the enqueue happen under the lock that
    /// [`begin_task`](Self::begin_task) takes, so a superseded task can
    /// never emit after its replacement has started. Returns `Ok(false)`
    /// when the frame was suppressed.
    pub fn emit_if_current(&self, generation: u64, envelope: &Envelope) -> Result<bool, HubError> {
        let active = self.active.lock();
        let current = active
            .as_ref()
            .is_some_and(|t| t.generation == generation && !t.cancel.is_cancelled());
        if !current {
            return Ok(false);
        }
        self.send_envelope(envelope)?;
        Ok(true)
    }
}
