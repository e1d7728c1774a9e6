//! Request/confirmation matching.
//!
//! EISCP has no request ids. A receiver answers a command with a status report
//! under the same code, so a pending command is matched by its
//! (zone, operation) key. Commands sharing a key are served FIFO; commands
//! with different keys resolve independently of each other.

use crate::command::{operations_for, Action, Command, Field, Operation, Status};
use crate::error::{EiscpError, Result};
use crate::frame::Frame;
use crate::types::Zone;
use crate::zone_state::ZoneStateModel;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use uuid::Uuid;

/// Receiver's answer to an issued command
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub zone: Zone,
    /// Value the receiver reported after executing the command
    pub field: Field,
    pub received_at: DateTime<Utc>,
}

struct PendingRequest {
    id: Uuid,
    command: Command,
    tx: oneshot::Sender<Result<Confirmation>>,
}

/// State shared between callers and the read loop
struct Link {
    /// Pending requests waiting for confirmations, FIFO per key
    pending: HashMap<(Zone, Operation), VecDeque<PendingRequest>>,
    /// Channel to the session's writer task; `None` while disconnected
    writer: Option<mpsc::UnboundedSender<Frame>>,
}

impl Link {
    /// Oldest request under `key` whose caller is still waiting
    fn take_front(&mut self, key: (Zone, Operation)) -> Option<PendingRequest> {
        let queue = self.pending.get_mut(&key)?;
        let mut request = None;
        while let Some(front) = queue.pop_front() {
            if front.tx.is_closed() {
                tracing::debug!("Dropping abandoned request {} ({})", front.id, front.command);
                continue;
            }
            request = Some(front);
            break;
        }
        if queue.is_empty() {
            self.pending.remove(&key);
        }
        request
    }

    fn remove(&mut self, key: (Zone, Operation), id: Uuid) -> bool {
        let Some(queue) = self.pending.get_mut(&key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|r| r.id != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.pending.remove(&key);
        }
        removed
    }

    fn fail_all(&mut self) -> usize {
        let mut failed = 0;
        for (_, queue) in self.pending.drain() {
            for request in queue {
                let _ = request.tx.send(Err(EiscpError::ConnectionLost));
                failed += 1;
            }
        }
        failed
    }
}

/// Removes a pending request whose caller stopped waiting
///
/// Dropped together with the `issue` future, e.g. by an outer `timeout` or a
/// losing `select!` branch. If the table is busy the entry stays behind and
/// `take_front` skips it once its receiver is gone.
struct PendingGuard<'a> {
    link: &'a Mutex<Link>,
    key: (Zone, Operation),
    id: Uuid,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut link) = self.link.try_lock() {
            if link.remove(self.key, self.id) {
                tracing::debug!(
                    "Caller of {} {} went away, request {} removed",
                    self.key.0,
                    self.key.1,
                    self.id
                );
            }
        }
    }
}

/// Issues commands and routes incoming reports
pub(crate) struct Dispatcher {
    link: Mutex<Link>,
    zones: Arc<ZoneStateModel>,
    /// Optional features a zone answered `N/A` for; skipped on refresh
    missing: parking_lot::Mutex<HashSet<(Zone, Operation)>>,
}

impl Dispatcher {
    pub(crate) fn new(zones: Arc<ZoneStateModel>) -> Self {
        Self {
            link: Mutex::new(Link {
                pending: HashMap::new(),
                writer: None,
            }),
            zones,
            missing: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Attach the writer of a freshly connected session
    pub(crate) async fn attach(&self, writer: mpsc::UnboundedSender<Frame>) {
        self.link.lock().await.writer = Some(writer);
    }

    /// Detach from a dead session and fail everything in flight
    pub(crate) async fn detach(&self) {
        let mut link = self.link.lock().await;
        link.writer = None;
        let failed = link.fail_all();
        if failed > 0 {
            tracing::warn!("Connection lost with {} command(s) in flight", failed);
        }
    }

    /// Write a frame without waiting for any reply
    pub async fn send(&self, frame: Frame) -> Result<()> {
        let link = self.link.lock().await;
        let writer = link.writer.as_ref().ok_or(EiscpError::NotConnected)?;
        tracing::debug!("Sending (no confirmation): {}", frame.message);
        writer.send(frame).map_err(|_| EiscpError::NotConnected)
    }

    /// Send a command and wait for the receiver to confirm it
    ///
    /// Never retries. `Timeout` and `ConnectionLost` mean the outcome is
    /// unknown; the caller decides whether issuing again is safe.
    pub async fn issue(&self, command: Command, deadline: Duration) -> Result<Confirmation> {
        let message = command.encode()?;
        let key = command.key();
        let id = Uuid::new_v4();
        let (tx, mut rx) = oneshot::channel();

        {
            let mut link = self.link.lock().await;
            let writer = link.writer.clone().ok_or(EiscpError::NotConnected)?;

            tracing::debug!("Sending: {}", message);
            writer
                .send(Frame::new(message))
                .map_err(|_| EiscpError::NotConnected)?;

            link.pending
                .entry(key)
                .or_default()
                .push_back(PendingRequest { id, command, tx });
        }

        let mut guard = PendingGuard {
            link: &self.link,
            key,
            id,
            armed: true,
        };

        let outcome = timeout(deadline, &mut rx).await;
        guard.disarm();

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EiscpError::ConnectionLost),
            Err(_) => {
                let removed = self.link.lock().await.remove(key, id);
                if !removed {
                    // Resolved between the deadline and taking the lock
                    if let Ok(result) = rx.try_recv() {
                        return result;
                    }
                }
                tracing::warn!("No confirmation for {} {} within {:?}", key.0, key.1, deadline);
                Err(EiscpError::Timeout)
            }
        }
    }

    /// Query every operation of a zone, feeding the answers into the model
    ///
    /// A zone that does not answer the power query is skipped. Individual
    /// fields the receiver refuses (`N/A`, e.g. volume while in standby) are
    /// left unknown. An HDMI output selector answering `N/A` is not there at
    /// all, so it is not asked again.
    pub async fn query_zone(&self, zone: Zone, deadline: Duration) -> Result<()> {
        match self.issue(Command::new(zone, Action::QueryPower), deadline).await {
            Ok(_) => {}
            Err(EiscpError::Rejected { .. }) | Err(EiscpError::Timeout) => {
                tracing::debug!("Zone {} did not answer, skipping", zone);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        for operation in operations_for(zone).filter(|op| *op != Operation::Power) {
            if self.missing.lock().contains(&(zone, operation)) {
                continue;
            }
            match self.issue(Command::new(zone, Action::query(operation)), deadline).await {
                Err(EiscpError::Rejected { .. }) if operation == Operation::HdmiOutput => {
                    tracing::info!("No {} on {}, no longer querying it", operation, zone);
                    self.missing.lock().insert((zone, operation));
                }
                Ok(_) | Err(EiscpError::Rejected { .. }) | Err(EiscpError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Route one decoded frame from the read loop
    ///
    /// The oldest pending command under the report's key is confirmed;
    /// anything else is an unsolicited push. The model is updated before the
    /// caller wakes, so a returned confirmation is already visible in it.
    pub(crate) async fn resolve(&self, frame: &Frame) {
        let status = match Status::parse(&frame.message) {
            Ok(Some(status)) => status,
            Ok(None) => {
                tracing::trace!("Ignoring message {}", frame.message);
                return;
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed report {:?}: {}", frame.message, e);
                return;
            }
        };

        let request = self.link.lock().await.take_front(status.key());
        let Some(request) = request else {
            self.zones.apply_push(status.zone, status.field);
            return;
        };

        let result = match status.field {
            Field::NotAvailable(operation) => Err(EiscpError::Rejected {
                zone: status.zone,
                operation,
            }),
            field => {
                let confirmation = Confirmation {
                    zone: status.zone,
                    field,
                    received_at: Utc::now(),
                };
                self.zones
                    .apply_confirmation(status.zone, &request.command, &confirmation);
                Ok(confirmation)
            }
        };

        if request.tx.send(result).is_err() {
            tracing::debug!("Caller for {} gave up before its confirmation", request.command);
        }
    }

    #[cfg(test)]
    async fn pending_count(&self) -> usize {
        self.link.lock().await.pending.values().map(VecDeque::len).sum()
    }
}
