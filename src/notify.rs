//! Rider totals notifications.
//!
//! After an ingestion commits, the rider's new all-time total is handed to
//! a listener. The coin side of the system subscribes here; it is never
//! called while a transaction is open.

use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A rider's totals after one committed measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderTotals {
    pub rider_id: Uuid,
    pub distance_total: f64,
    /// Kilometres added by the measurement
    pub delta_km: f64,
    pub last_active: DateTime<Utc>,
}

/// Receives committed rider totals.
pub trait RiderTotalsListener: Send + Sync {
    fn rider_totals_changed(&self, totals: &RiderTotals);
}

/// Forwards totals into a crossbeam channel without blocking.
pub struct ChannelListener {
    tx: Sender<RiderTotals>,
}

impl ChannelListener {
    pub fn new(tx: Sender<RiderTotals>) -> Self {
        Self { tx }
    }

    /// Listener with a bounded queue and its receiving end.
    pub fn bounded(capacity: usize) -> (Self, Receiver<RiderTotals>) {
        let (tx, rx) = crossbeam::channel::bounded(capacity);
        (Self::new(tx), rx)
    }

    /// Listener with an unbounded queue and its receiving end.
    pub fn unbounded() -> (Self, Receiver<RiderTotals>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self::new(tx), rx)
    }
}

impl RiderTotalsListener for ChannelListener {
    fn rider_totals_changed(&self, totals: &RiderTotals) {
        match self.tx.try_send(totals.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    "Totals queue full, dropping update for rider {}",
                    dropped.rider_id
                );
            }
            Err(TrySendError::Disconnected(dropped)) => {
                tracing::warn!(
                    "Totals receiver gone, dropping update for rider {}",
                    dropped.rider_id
                );
            }
        }
    }
}
