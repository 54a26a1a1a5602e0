//! Procedure module - canonical definitions of service procedures.
//!
//! A procedure is an ordered set of steps, each holding a checklist of
//! tasks, plus the edges connecting the steps. Definitions are immutable
//! for the lifetime of a run; progress lives in snapshots (see [`crate::merge`]).
//!
//! # Invariants
//! - Step ids are unique within a procedure
//! - Task ids are unique within a step
//! - Every edge endpoint names an existing step

mod catalog;
mod edge;
mod step;
mod task;

pub use catalog::ProcedureCatalog;
pub use edge::{Edge, EdgeKind, EdgeStyle};
pub use step::{
    canonical_order, Assignment, Ordinal, Position, Step, StepKind, STANDALONE_STEP_ID,
};
pub use task::{NoteError, NoteEvent, Task};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

/// Default size of one grid unit on the canvas.
pub const DEFAULT_GRID_UNIT: u32 = 30;

fn default_grid_unit() -> u32 {
    DEFAULT_GRID_UNIT
}

/// Canonical procedure definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default)]
    pub edges: Vec<Edge>,

    #[serde(default = "default_grid_unit")]
    pub grid_unit: u32,
}

impl Procedure {
    pub fn new(id: impl Into<String>, steps: Vec<Step>, edges: Vec<Edge>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: None,
            steps,
            edges,
            grid_unit: DEFAULT_GRID_UNIT,
        }
    }

    pub fn from_json_str(data: &str) -> Result<Self, ProcedureError> {
        serde_json::from_str(data).map_err(|e| ProcedureError::Parse(e.to_string()))
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, ProcedureError> {
        serde_yaml::from_str(data).map_err(|e| ProcedureError::Parse(e.to_string()))
    }

    /// Load a definition from disk. `.yaml`/`.yml` files are read as YAML,
    /// everything else as JSON.
    pub fn from_path(path: &Path) -> Result<Self, ProcedureError> {
        let data = std::fs::read_to_string(path).map_err(|e| ProcedureError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&data),
            _ => Self::from_json_str(&data),
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Check structural invariants.
    ///
    /// With `strict`, step ids that do not parse as `major[.minor]` are
    /// rejected instead of being laid out in column 0. Standalone steps are
    /// exempt either way.
    pub fn validate(&self, strict: bool) -> Result<(), ProcedureError> {
        let mut step_ids = HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(step.id.as_str()) {
                return Err(ProcedureError::DuplicateStep(step.id.clone()));
            }
            if !step.is_standalone() && step.ordinal().is_none() {
                if strict {
                    return Err(ProcedureError::MalformedStepId(step.id.clone()));
                }
                tracing::warn!(
                    procedure_id = %self.id,
                    step_id = %step.id,
                    "Malformed step id; placing it in column 0"
                );
            }
            let mut task_ids = HashSet::new();
            for task in &step.tasks {
                if !task_ids.insert(task.id.as_str()) {
                    return Err(ProcedureError::DuplicateTask {
                        step: step.id.clone(),
                        task: task.id.clone(),
                    });
                }
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !step_ids.contains(endpoint.as_str()) {
                    return Err(ProcedureError::DanglingEdge {
                        edge: edge.id.clone(),
                        step: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Ordered `(step id, task count)` pairs. Two definitions with the same
    /// signature accept each other's snapshots.
    pub fn drift_signature(&self) -> Vec<(&str, usize)> {
        self.steps
            .iter()
            .map(|s| (s.id.as_str(), s.tasks.len()))
            .collect()
    }

    /// SHA-256 hex digest of the drift signature.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (id, count) in self.drift_signature() {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
            hasher.update((count as u64).to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Copy of this procedure keeping only tasks that apply to `service_type`.
    ///
    /// Tasks without a service type apply to every interval.
    pub fn for_service_type(&self, service_type: &str) -> Procedure {
        let mut filtered = self.clone();
        for step in &mut filtered.steps {
            step.tasks.retain(|t| {
                t.service_type
                    .as_deref()
                    .map_or(true, |kind| kind.eq_ignore_ascii_case(service_type))
            });
        }
        filtered
    }
}

/// Errors from loading or validating a procedure definition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcedureError {
    #[error("Failed to read procedure {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse procedure: {0}")]
    Parse(String),

    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Duplicate task id {task} in step {step}")]
    DuplicateTask { step: String, task: String },

    #[error("Edge {edge} references unknown step {step}")]
    DanglingEdge { edge: String, step: String },

    #[error("Step id {0:?} is not of the form major[.minor]")]
    MalformedStepId(String),
}
