//! Error taxonomy for the simulation core.

use crate::agent::AgentId;
use crate::tick::TickPhase;
use thiserror::Error;

/// Errors escalated to the orchestrator or the caller
#[derive(Debug, Error)]
pub enum SimError {
    /// Rejected before the first tick opens
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Reset or bounds changes are only allowed between ticks
    #[error("operation requires an idle simulation, coordinator is {phase:?}")]
    NotIdle { phase: TickPhase },

    /// Grid occupancy and the occupancy index disagree
    #[error("occupancy index mismatch for agent {agent}: {detail}")]
    OccupancyMismatch { agent: AgentId, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
