//! Technicians and the per-session role bindings used for attribution.
//!
//! The directory is consulted only to display who completed a step; it never
//! gates progress.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::procedure::{Assignment, Step};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Technician {
    pub id: String,
    /// Derived from `display_name` when a roster file leaves it blank.
    #[serde(default)]
    pub initials: String,
    pub display_name: String,
}

impl Technician {
    /// Create a technician, deriving initials from the display name.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let initials = display_name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .take(3)
            .collect();
        Self {
            id: id.into(),
            initials,
            display_name,
        }
    }
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Failed to read technician roster {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse technician roster {path}: {message}")]
    Parse { path: String, message: String },
}

/// Lookup of technicians by id.
pub trait TechnicianDirectory: Debug + Send + Sync {
    fn resolve(&self, id: &str) -> Option<Technician>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    technicians: HashMap<String, Technician>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, technician: Technician) {
        self.technicians.insert(technician.id.clone(), technician);
    }

    pub fn with(mut self, technician: Technician) -> Self {
        self.insert(technician);
        self
    }

    /// Load a roster: a JSON or YAML list of technicians.
    pub fn from_path(path: &Path) -> Result<Self, RosterError> {
        let display = path.display().to_string();
        let data = std::fs::read_to_string(path).map_err(|e| RosterError::Io {
            path: display.clone(),
            message: e.to_string(),
        })?;
        let parsed: Vec<Technician> = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&data).map_err(|e| e.to_string()),
            _ => serde_json::from_str(&data).map_err(|e| e.to_string()),
        }
        .map_err(|message| RosterError::Parse {
            path: display,
            message,
        })?;

        let mut directory = Self::new();
        for technician in parsed {
            let technician = if technician.initials.trim().is_empty() {
                Technician::new(technician.id, technician.display_name)
            } else {
                technician
            };
            directory.insert(technician);
        }
        tracing::debug!(
            path = %path.display(),
            technicians = directory.len(),
            "Loaded technician roster"
        );
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.technicians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.technicians.is_empty()
    }
}

impl TechnicianDirectory for InMemoryDirectory {
    fn resolve(&self, id: &str) -> Option<Technician> {
        self.technicians.get(id).cloned()
    }
}

/// A technician role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    A,
    B,
}

/// Who completed a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub technician_id: String,
    pub initials: Option<String>,
}

/// Which technicians occupy roles A and B for the current session.
///
/// Passed explicitly into the completion state machine.
#[derive(Debug, Clone)]
pub struct SessionContext {
    technician_a: Option<String>,
    technician_b: Option<String>,
    directory: Arc<dyn TechnicianDirectory>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryDirectory::new()))
    }
}

impl SessionContext {
    pub fn new(directory: Arc<dyn TechnicianDirectory>) -> Self {
        Self {
            technician_a: None,
            technician_b: None,
            directory,
        }
    }

    pub fn with_role(mut self, role: Role, technician_id: impl Into<String>) -> Self {
        self.bind(role, Some(technician_id.into()));
        self
    }

    pub fn bind(&mut self, role: Role, technician_id: Option<String>) {
        match role {
            Role::A => self.technician_a = technician_id,
            Role::B => self.technician_b = technician_id,
        }
    }

    pub fn technician(&self, role: Role) -> Option<&str> {
        match role {
            Role::A => self.technician_a.as_deref(),
            Role::B => self.technician_b.as_deref(),
        }
    }

    /// Technician bound to the role a step is assigned to.
    ///
    /// Shared steps resolve to role A, falling back to role B.
    pub fn technician_for(&self, assignment: Assignment) -> Option<&str> {
        match assignment {
            Assignment::A => self.technician(Role::A),
            Assignment::B => self.technician(Role::B),
            Assignment::Both => self.technician(Role::A).or(self.technician(Role::B)),
        }
    }

    pub fn directory(&self) -> &dyn TechnicianDirectory {
        self.directory.as_ref()
    }

    /// Resolve who gets credit for completing `step`.
    ///
    /// A technician bound to the step itself wins over the role binding.
    /// Returns `None` when nobody is bound.
    pub fn attribute(&self, step: &Step) -> Option<Attribution> {
        let technician_id = step
            .technician_id
            .as_deref()
            .or_else(|| self.technician_for(step.technician_assignment))?;
        let initials = self
            .directory
            .resolve(technician_id)
            .map(|t| t.initials)
            .filter(|i| !i.is_empty());
        Some(Attribution {
            technician_id: technician_id.to_string(),
            initials,
        })
    }
}
