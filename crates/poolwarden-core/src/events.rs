use crate::types::{BatchId, TxRef};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine-wide event types, broadcast to the control plane and logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A balance snapshot was recorded
    SnapshotRecorded(SnapshotRecordedEvent),

    /// The evaluator triggered and a batch was proposed
    BatchProposed(BatchProposedEvent),

    /// The governor approved a batch for execution
    BatchApproved(BatchLifecycleEvent),

    /// The batch's transaction was broadcast
    BatchSubmitted(BatchSubmittedEvent),

    /// On-chain confirmation observed
    BatchConfirmed(BatchConfirmedEvent),

    /// The batch failed after submission
    BatchFailed(BatchLifecycleEvent),

    /// The batch was aborted before submission
    BatchAborted(BatchLifecycleEvent),

    /// Config file changed on disk
    ConfigChanged(ConfigChangedEvent),

    /// Operator halt state changed
    HaltChanged(HaltChangedEvent),
}

impl EngineEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::SnapshotRecorded(_) => "snapshot_recorded",
            EngineEvent::BatchProposed(_) => "batch_proposed",
            EngineEvent::BatchApproved(_) => "batch_approved",
            EngineEvent::BatchSubmitted(_) => "batch_submitted",
            EngineEvent::BatchConfirmed(_) => "batch_confirmed",
            EngineEvent::BatchFailed(_) => "batch_failed",
            EngineEvent::BatchAborted(_) => "batch_aborted",
            EngineEvent::ConfigChanged(_) => "config_changed",
            EngineEvent::HaltChanged(_) => "halt_changed",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::SnapshotRecorded(e) => e.timestamp,
            EngineEvent::BatchProposed(e) => e.timestamp,
            EngineEvent::BatchApproved(e) => e.timestamp,
            EngineEvent::BatchSubmitted(e) => e.timestamp,
            EngineEvent::BatchConfirmed(e) => e.timestamp,
            EngineEvent::BatchFailed(e) => e.timestamp,
            EngineEvent::BatchAborted(e) => e.timestamp,
            EngineEvent::ConfigChanged(e) => e.timestamp,
            EngineEvent::HaltChanged(e) => e.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecordedEvent {
    pub balance_a: Decimal,
    pub balance_b: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProposedEvent {
    pub batch_id: BatchId,
    pub amount_a: Decimal,
    pub amount_b: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Shared shape for approval/abort/failure transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLifecycleEvent {
    pub batch_id: BatchId,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmittedEvent {
    pub batch_id: BatchId,
    pub matched_a: Decimal,
    pub matched_b: Decimal,
    pub tx_ref: TxRef,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfirmedEvent {
    pub batch_id: BatchId,
    pub lp_tokens: Decimal,
    pub tx_ref: TxRef,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChangedEvent {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl ConfigChangedEvent {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltChangedEvent {
    pub halted: bool,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn event_type_strings() {
        let event = EngineEvent::SnapshotRecorded(SnapshotRecordedEvent {
            balance_a: dec!(1200),
            balance_b: dec!(120),
            timestamp: Utc::now(),
        });
        assert_eq!(event.event_type(), "snapshot_recorded");

        let event = EngineEvent::ConfigChanged(ConfigChangedEvent::new("config.toml".into()));
        assert_eq!(event.event_type(), "config_changed");
    }
}
