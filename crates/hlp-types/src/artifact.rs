//! Artifacts produced by plan-units.
//!
//! An artifact is anything a unit applied to the outside world (a file, a
//! deployed resource, a registry entry). Each one carries enough information
//! for a compensator, selected by `artifact_type`, to undo it.

use serde::{Deserialize, Serialize};

/// What a unit worker reports back for each artifact it applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact ID, unique within the plan.
    pub id: String,
    /// Selects the compensator used during rollback.
    pub artifact_type: String,
    #[serde(default = "default_artifact_version")]
    pub version: String,
    /// Opaque reference understood by the compensator.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub reference: serde_json::Value,
}

fn default_artifact_version() -> String {
    "1".to_string()
}

impl ArtifactSpec {
    pub fn new(id: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            artifact_type: artifact_type.into(),
            version: default_artifact_version(),
            reference: serde_json::Value::Null,
        }
    }
}

/// A recorded artifact, owned by the unit that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub artifact_type: String,
    pub version: String,
    /// Producing unit.
    pub unit_id: String,
    /// Creation order within the producing unit (0-based).
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub reference: serde_json::Value,
    pub status: ArtifactStatus,
    /// Last compensation error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Artifact {
    /// Record an artifact reported by a worker.
    pub fn applied(spec: ArtifactSpec, unit_id: &str, sequence: u32) -> Self {
        Self {
            id: spec.id,
            artifact_type: spec.artifact_type,
            version: spec.version,
            unit_id: unit_id.to_string(),
            sequence,
            reference: spec.reference,
            status: ArtifactStatus::Applied,
            error: None,
        }
    }

    /// Whether a rollback still has work to do for this artifact.
    pub fn needs_compensation(&self) -> bool {
        matches!(
            self.status,
            ArtifactStatus::Applied | ArtifactStatus::RollbackFailed
        )
    }
}

/// Lifecycle of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Applied,
    Compensated,
    /// The compensator reported the artifact was already gone.
    Absent,
    RollbackFailed,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactStatus::Applied => "applied",
            ArtifactStatus::Compensated => "compensated",
            ArtifactStatus::Absent => "absent",
            ArtifactStatus::RollbackFailed => "rollback_failed",
        };
        write!(f, "{s}")
    }
}
