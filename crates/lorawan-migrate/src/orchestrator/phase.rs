//! Per-device migration phases.

use serde::{Deserialize, Serialize};

use crate::store::MigrationStatus;

/// Where a single device migration currently stands.
///
/// ```text
/// Pending -> Fetching -> Provisioning -> AssigningCredential -> Completed
///               |            |    \                |
///               v            v     `-> RequiresManualSteps <-'
///             Failed       Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Pending,
    Fetching,
    Provisioning,
    AssigningCredential,
    Completed,
    RequiresManualSteps,
    Failed,
}

impl MigrationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Completed | MigrationPhase::RequiresManualSteps | MigrationPhase::Failed
        )
    }

    pub fn can_transition_to(&self, next: MigrationPhase) -> bool {
        use MigrationPhase::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Provisioning)
                | (Fetching, Failed)
                | (Provisioning, AssigningCredential)
                | (Provisioning, RequiresManualSteps)
                | (Provisioning, Failed)
                | (AssigningCredential, Completed)
                | (AssigningCredential, RequiresManualSteps)
        )
    }

    /// Status recorded for this phase.
    pub fn status(&self) -> MigrationStatus {
        match self {
            MigrationPhase::Pending => MigrationStatus::Pending,
            MigrationPhase::Fetching
            | MigrationPhase::Provisioning
            | MigrationPhase::AssigningCredential => MigrationStatus::InProgress,
            MigrationPhase::Completed => MigrationStatus::Completed,
            MigrationPhase::RequiresManualSteps => MigrationStatus::RequiresManualSteps,
            MigrationPhase::Failed => MigrationStatus::Failed,
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationPhase::Pending => "pending",
            MigrationPhase::Fetching => "fetching",
            MigrationPhase::Provisioning => "provisioning",
            MigrationPhase::AssigningCredential => "assigning_credential",
            MigrationPhase::Completed => "completed",
            MigrationPhase::RequiresManualSteps => "requires_manual_steps",
            MigrationPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}
