//! Steps of a procedure and their compact identifiers.
//!
//! A step id such as `"5.2"` encodes two ordinals:
//! - `major` (5): the step's position in the procedure sequence
//! - `minor` (2): its parallel slot when several technicians work the same stage
//!
//! # Invariants
//! - Step ids are unique within a procedure
//! - Steps sharing a `major` are mutually parallel and share a layout column

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::task::Task;

/// Sentinel id for the non-sequential addendum step.
///
/// A step with this id is treated as standalone even without the
/// [`StepKind::Standalone`] tag.
pub const STANDALONE_STEP_ID: &str = "addendum";

/// Parsed `(major, minor?)` pair of a step id.
///
/// Ordering is canonical procedure order: by `major`, then `minor`, with a
/// missing minor sorting before any explicit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ordinal {
    pub major: u32,
    pub minor: Option<u32>,
}

impl Ordinal {
    /// Parse a step id of the form `"<major>"` or `"<major>.<minor>"`.
    ///
    /// Returns `None` for anything else (empty, non-numeric, more than two groups).
    pub fn parse(id: &str) -> Option<Self> {
        let mut parts = id.trim().split('.');
        let major = parse_group(parts.next()?)?;
        let minor = match parts.next() {
            Some(group) => Some(parse_group(group)?),
            None => None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor })
    }

    /// Parse a step id, placing malformed ids in the first column (`major = 0`).
    ///
    /// Silent: malformed ids are reported once, by [`Procedure::validate`].
    ///
    /// [`Procedure::validate`]: crate::procedure::Procedure::validate
    pub fn parse_lenient(id: &str) -> Self {
        Self::parse(id).unwrap_or(Self {
            major: 0,
            minor: None,
        })
    }

    /// Whether the minor slot is odd. A missing minor counts as slot 1.
    pub fn is_odd_slot(&self) -> bool {
        self.minor.unwrap_or(1) % 2 == 1
    }
}

fn parse_group(group: &str) -> Option<u32> {
    if group.is_empty() || !group.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    group.parse().ok()
}

/// Which technician role a step is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Assignment {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B")]
    B,
    #[default]
    #[serde(rename = "both")]
    Both,
}

impl Assignment {
    /// Whether two steps with these assignments are connected across adjacent columns.
    ///
    /// Shared (`Both`) steps fan out to / fan in from every neighbour; otherwise
    /// only steps in the same technician's lane connect.
    pub fn connects_to(self, other: Assignment) -> bool {
        self == Assignment::Both || other == Assignment::Both || self == other
    }
}

/// Position of a step on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn is_origin(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

/// Whether a step takes part in the sequential flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    #[default]
    Sequential,
    /// Addendum block placed beneath the sequence and excluded from columns.
    Standalone,
}

/// One node of the procedure graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub technician_assignment: Assignment,

    #[serde(default)]
    pub position: Position,

    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(default)]
    pub kind: StepKind,

    /// For standalone steps: the step it hangs beneath.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,

    /// Technician bound to this specific step, overriding the role binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technician_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by_initials: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, assignment: Assignment, tasks: Vec<Task>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            technician_assignment: assignment,
            position: Position::default(),
            tasks,
            kind: StepKind::Sequential,
            anchor: None,
            technician_id: None,
            completed_at: None,
            completed_by: None,
            completed_by_initials: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Mark this step as the standalone addendum, optionally hung beneath `anchor`.
    pub fn standalone(mut self, anchor: Option<&str>) -> Self {
        self.kind = StepKind::Standalone;
        self.anchor = anchor.map(str::to_string);
        self
    }

    pub fn ordinal(&self) -> Option<Ordinal> {
        Ordinal::parse(&self.id)
    }

    pub fn ordinal_lenient(&self) -> Ordinal {
        Ordinal::parse_lenient(&self.id)
    }

    pub fn is_standalone(&self) -> bool {
        self.kind == StepKind::Standalone || self.id == STANDALONE_STEP_ID
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Tasks whose description carries a structured document reference.
    pub fn reference_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.has_reference())
    }

    /// Drop completion and attribution.
    pub fn clear_completion(&mut self) {
        self.completed_at = None;
        self.completed_by = None;
        self.completed_by_initials = None;
    }
}

/// Indices of `steps` in canonical sequence order (major, then minor).
///
/// Ties (duplicate or malformed ids) keep their input order.
pub fn canonical_order(steps: &[Step]) -> Vec<usize> {
    let ordinals: Vec<Ordinal> = steps.iter().map(Step::ordinal_lenient).collect();
    let mut order: Vec<usize> = (0..steps.len()).collect();
    order.sort_by(|&a, &b| match ordinals[a].cmp(&ordinals[b]) {
        Ordering::Equal => a.cmp(&b),
        other => other,
    });
    order
}
