//! Outbound audit records.
//!
//! Consensus results and bias reports leave the pipeline through an
//! [`AuditSink`]. The default sink logs them; [`MemoryAuditSink`] keeps them
//! for inspection.

use crate::{error::RlcfError, Result};
use rlcf_council::{BiasReport, ConsensusResult};
use std::sync::Mutex;
use tracing::info;

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Receives the consensus committed for a task.
    fn record_consensus(&self, task_id: &str, consensus: &ConsensusResult) -> Result<()>;

    /// Receives the bias reports produced for a task.
    fn record_bias(&self, reports: &[BiasReport]) -> Result<()>;
}

/// Sink that writes records to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_consensus(&self, task_id: &str, consensus: &ConsensusResult) -> Result<()> {
        info!(
            "Consensus for {}: {:?} with confidence {:.3} over {} entries",
            task_id,
            consensus.primary_value().map(|v| v.key()),
            consensus.confidence,
            consensus.participant_count
        );
        Ok(())
    }

    fn record_bias(&self, reports: &[BiasReport]) -> Result<()> {
        if let Some(total) = reports.iter().find(|r| r.dimension == "total") {
            info!("Bias for {}: total {:.3}", total.task_id, total.score);
        }
        Ok(())
    }
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    consensus: Mutex<Vec<(String, ConsensusResult)>>,
    bias: Mutex<Vec<BiasReport>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded consensus results, in arrival order.
    pub fn consensus_records(&self) -> Vec<(String, ConsensusResult)> {
        self.consensus.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Recorded bias reports, in arrival order.
    pub fn bias_reports(&self) -> Vec<BiasReport> {
        self.bias.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_consensus(&self, task_id: &str, consensus: &ConsensusResult) -> Result<()> {
        self.consensus
            .lock()
            .map_err(|_| RlcfError::Audit("consensus log poisoned".to_string()))?
            .push((task_id.to_string(), consensus.clone()));
        Ok(())
    }

    fn record_bias(&self, reports: &[BiasReport]) -> Result<()> {
        self.bias
            .lock()
            .map_err(|_| RlcfError::Audit("bias log poisoned".to_string()))?
            .extend_from_slice(reports);
        Ok(())
    }
}
