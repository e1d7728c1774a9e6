use crate::command::Field;
use crate::error::{EiscpError, Result};
use crate::types::Zone;
use crate::zone_state::ZoneState;
use tokio::sync::broadcast;

/// Change to the zone state model
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// A field of one zone was overwritten
    ZoneChanged {
        zone: Zone,
        field: Field,
        /// Snapshot of the zone right after the change
        state: ZoneState,
    },

    /// Connection dropped; every zone is unknown again
    ZonesReset,
}

/// Receiver for state updates
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next state update
    ///
    /// Fails with `ConnectionLost` once the client is dropped and with
    /// `Lagged` when updates were missed; the subscription stays usable.
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EiscpError::ConnectionLost,
            broadcast::error::RecvError::Lagged(n) => {
                tracing::warn!("State subscriber lagged by {} updates", n);
                EiscpError::Lagged(n)
            }
        })
    }

    /// Try to receive a state update without waiting
    ///
    /// Returns `None` if no update is pending.
    pub fn try_recv(&mut self) -> Result<Option<StateUpdate>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(EiscpError::ConnectionLost),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(EiscpError::Lagged(n)),
        }
    }
}
