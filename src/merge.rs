//! Persistence merger - combine a canonical procedure with saved progress.
//!
//! A snapshot records progress (completion, timing, notes) and layout
//! (positions, edges) for one run of a procedure. On reopen the canonical
//! definition is authoritative for structure and the snapshot only
//! contributes progress and placement. Snapshots that cannot be trusted are
//! dropped whole:
//!
//! - unparseable JSON is treated as absent
//! - two or more positioned steps all at the origin means a corrupt save
//! - any shared step whose task count differs means the definition drifted
//!
//! Nothing in here fails; the worst case is the canonical, unmerged state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::procedure::{Edge, NoteEvent, Position, Procedure, Step, Task};
use crate::progress::meets_completion_rule;

/// Saved state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTask {
    pub id: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<NoteEvent>,
}

/// Saved state of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub tasks: Vec<SnapshotTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technician_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by_initials: Option<String>,
}

/// Persisted progress record for one procedure run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub procedure_id: String,
    /// Fingerprint of the definition the snapshot was taken against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub active_step_ids: Vec<String>,
    #[serde(default)]
    pub steps: Vec<SnapshotStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<Edge>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Record the current run state.
    pub fn capture(procedure: &Procedure, steps: &[Step], edges: &[Edge]) -> Self {
        Self {
            procedure_id: procedure.id.clone(),
            fingerprint: Some(procedure.fingerprint()),
            started: false,
            active_step_ids: Vec::new(),
            steps: steps.iter().map(capture_step).collect(),
            edges: Some(edges.to_vec()),
            saved_at: Some(Utc::now()),
        }
    }

    pub fn with_activity(mut self, started: bool, active_step_ids: Vec<String>) -> Self {
        self.started = started;
        self.active_step_ids = active_step_ids;
        self
    }

    /// Decode a stored value; anything that does not decode is logged and
    /// treated as no snapshot.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable snapshot");
                None
            }
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn is_corrupt(&self) -> bool {
        let positioned: Vec<&Position> =
            self.steps.iter().filter_map(|s| s.position.as_ref()).collect();
        positioned.len() > 1 && positioned.iter().all(|p| p.is_origin())
    }
}

/// Parse raw JSON text into a snapshot; invalid JSON yields `None`.
pub fn parse_snapshot(raw: &str) -> Option<Snapshot> {
    match serde_json::from_str(raw) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unparseable snapshot");
            None
        }
    }
}

fn capture_step(step: &Step) -> SnapshotStep {
    SnapshotStep {
        id: step.id.clone(),
        position: Some(step.position),
        tasks: step
            .tasks
            .iter()
            .map(|t| SnapshotTask {
                id: t.id.clone(),
                completed: t.completed,
                completed_at: t.completed_at,
                actual_time_minutes: t.actual_time_minutes,
                notes: t.notes.clone(),
            })
            .collect(),
        technician_id: step.technician_id.clone(),
        completed_at: step.completed_at,
        completed_by: step.completed_by.clone(),
        completed_by_initials: step.completed_by_initials.clone(),
    }
}

/// How [`reconcile`] arrived at its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MergeDecision {
    /// No snapshot; canonical state returned.
    FirstRun,
    /// All positioned steps sat at the origin.
    DiscardedCorrupt,
    /// A shared step's task count changed since the snapshot was taken.
    DiscardedDrift {
        step_id: String,
        canonical: usize,
        snapshot: usize,
    },
    Merged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    pub decision: MergeDecision,
}

impl MergeOutcome {
    fn canonical(procedure: &Procedure, decision: MergeDecision) -> Self {
        Self {
            steps: procedure.steps.clone(),
            edges: procedure.edges.clone(),
            decision,
        }
    }

    /// Whether saved progress was applied.
    pub fn merged(&self) -> bool {
        self.decision == MergeDecision::Merged
    }
}

/// Merge saved progress onto the canonical procedure.
pub fn reconcile(procedure: &Procedure, snapshot: Option<&Snapshot>) -> MergeOutcome {
    let Some(snapshot) = snapshot else {
        return MergeOutcome::canonical(procedure, MergeDecision::FirstRun);
    };

    if snapshot.is_corrupt() {
        tracing::warn!(
            procedure_id = %procedure.id,
            steps = snapshot.steps.len(),
            "Snapshot has every step at the origin; discarding"
        );
        return MergeOutcome::canonical(procedure, MergeDecision::DiscardedCorrupt);
    }

    let saved: HashMap<&str, &SnapshotStep> =
        snapshot.steps.iter().map(|s| (s.id.as_str(), s)).collect();

    for step in &procedure.steps {
        if let Some(saved_step) = saved.get(step.id.as_str()) {
            if saved_step.tasks.len() != step.tasks.len() {
                tracing::warn!(
                    procedure_id = %procedure.id,
                    step_id = %step.id,
                    canonical = step.tasks.len(),
                    snapshot = saved_step.tasks.len(),
                    "Procedure definition drifted since snapshot; discarding"
                );
                return MergeOutcome::canonical(
                    procedure,
                    MergeDecision::DiscardedDrift {
                        step_id: step.id.clone(),
                        canonical: step.tasks.len(),
                        snapshot: saved_step.tasks.len(),
                    },
                );
            }
        }
    }

    if let Some(fingerprint) = &snapshot.fingerprint {
        if *fingerprint != procedure.fingerprint() {
            tracing::debug!(
                procedure_id = %procedure.id,
                "Snapshot fingerprint differs from definition"
            );
        }
    }

    let steps: Vec<Step> = procedure
        .steps
        .iter()
        .map(|step| match saved.get(step.id.as_str()) {
            Some(saved_step) => merge_step(step, saved_step),
            None => step.clone(),
        })
        .collect();

    let edges = merge_edges(procedure, snapshot, &steps);

    tracing::debug!(
        procedure_id = %procedure.id,
        steps = steps.len(),
        edges = edges.len(),
        "Merged snapshot"
    );

    MergeOutcome {
        steps,
        edges,
        decision: MergeDecision::Merged,
    }
}

fn merge_step(canonical: &Step, saved: &SnapshotStep) -> Step {
    let mut step = canonical.clone();
    if let Some(position) = saved.position {
        step.position = position;
    }
    step.technician_id = saved.technician_id.clone().or(step.technician_id);
    step.completed_at = saved.completed_at;
    step.completed_by = saved.completed_by.clone();
    step.completed_by_initials = saved.completed_by_initials.clone();

    let tasks: HashMap<&str, &SnapshotTask> =
        saved.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    for task in &mut step.tasks {
        if let Some(saved_task) = tasks.get(task.id.as_str()) {
            apply_task_progress(task, saved_task);
        }
    }
    // Saved completion only survives while the canonical tasks still earn it.
    if step.is_complete() && !meets_completion_rule(&step) {
        tracing::debug!(step_id = %step.id, "Clearing stale step completion");
        step.clear_completion();
    }
    step
}

fn apply_task_progress(task: &mut Task, saved: &SnapshotTask) {
    task.completed = saved.completed;
    task.completed_at = saved.completed_at;
    task.actual_time_minutes = saved.actual_time_minutes;
    task.notes = saved.notes.clone();
}

/// Saved edges win when present and non-empty. Edges pointing at steps that
/// no longer exist are dropped.
fn merge_edges(procedure: &Procedure, snapshot: &Snapshot, steps: &[Step]) -> Vec<Edge> {
    let Some(saved) = snapshot.edges.as_ref().filter(|e| !e.is_empty()) else {
        return procedure.edges.clone();
    };
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    let kept: Vec<Edge> = saved
        .iter()
        .filter(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()))
        .cloned()
        .collect();
    if kept.len() != saved.len() {
        tracing::debug!(
            dropped = saved.len() - kept.len(),
            "Dropped saved edges referencing removed steps"
        );
    }
    if kept.is_empty() {
        procedure.edges.clone()
    } else {
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{Assignment, EdgeKind};

    fn procedure() -> Procedure {
        Procedure::new(
            "gearbox",
            vec![
                Step::new(
                    "1",
                    Assignment::Both,
                    vec![
                        Task::new("1a", "1.1 Drain oil"),
                        Task::new("1b", "Wipe housing"),
                    ],
                )
                .with_position(Position::new(60, 60)),
                Step::new("2", Assignment::A, vec![Task::new("2a", "2.1 Refill")])
                    .with_position(Position::new(420, 60)),
            ],
            vec![Edge::new("1", "2", EdgeKind::FlowAligned)],
        )
    }

    fn progressed() -> Snapshot {
        let p = procedure();
        let mut steps = p.steps.clone();
        let now = Utc::now();
        steps[0].position = Position::new(90, 120);
        steps[0].tasks[0].set_completed(true, now);
        steps[0].tasks[0].actual_time_minutes = Some(25);
        steps[0].completed_at = Some(now);
        steps[0].completed_by = Some("tech-7".into());
        Snapshot::capture(&p, &steps, &p.edges)
    }

    #[test]
    fn no_snapshot_returns_canonical() {
        let p = procedure();
        let outcome = reconcile(&p, None);
        assert_eq!(outcome.steps, p.steps);
        assert_eq!(outcome.edges, p.edges);
        assert_eq!(outcome.decision, MergeDecision::FirstRun);
    }

    #[test]
    fn merges_progress_and_positions() {
        let p = procedure();
        let outcome = reconcile(&p, Some(&progressed()));
        assert!(outcome.merged());
        let first = &outcome.steps[0];
        assert_eq!(first.position, Position::new(90, 120));
        assert!(first.tasks[0].completed);
        assert_eq!(first.tasks[0].actual_time_minutes, Some(25));
        assert_eq!(first.completed_by.as_deref(), Some("tech-7"));
        assert_eq!(outcome.steps[1], p.steps[1].clone());
    }

    #[test]
    fn structure_comes_from_canonical() {
        let mut p = procedure();
        let snapshot = progressed();
        p.steps[0].tasks[0].description = "1.1 Drain gear oil fully".into();
        p.steps[0].title = "Drain".into();

        let outcome = reconcile(&p, Some(&snapshot));
        assert!(outcome.merged());
        assert_eq!(outcome.steps[0].tasks[0].description, "1.1 Drain gear oil fully");
        assert_eq!(outcome.steps[0].title, "Drain");
        assert!(outcome.steps[0].tasks[0].completed);
    }

    #[test]
    fn completion_is_cleared_when_references_are_edited_away() {
        let mut p = procedure();
        let snapshot = progressed();
        p.steps[0].tasks[0].description = "Drain oil".into();

        let outcome = reconcile(&p, Some(&snapshot));
        assert!(outcome.merged());
        let first = &outcome.steps[0];
        assert_eq!(first.reference_tasks().count(), 0);
        assert!(first.tasks[0].completed);
        assert!(!first.is_complete());
        assert_eq!(first.completed_at, None);
        assert_eq!(first.completed_by, None);
        assert_eq!(first.completed_by_initials, None);
    }

    #[test]
    fn completion_is_cleared_when_a_new_reference_is_unchecked() {
        let mut p = procedure();
        let snapshot = progressed();
        p.steps[0].tasks[1].description = "1.2 Wipe housing".into();

        let outcome = reconcile(&p, Some(&snapshot));
        assert!(outcome.merged());
        assert!(!outcome.steps[0].is_complete());
        assert_eq!(outcome.steps[0].completed_by, None);
    }

    #[test]
    fn new_canonical_steps_keep_defaults() {
        let mut p = procedure();
        let snapshot = progressed();
        p.steps
            .push(Step::new("3", Assignment::B, vec![Task::new("3a", "3.1 Test run")]));
        let outcome = reconcile(&p, Some(&snapshot));
        assert!(outcome.merged());
        assert_eq!(outcome.steps[2], p.steps[2]);
    }

    #[test]
    fn task_count_drift_discards_whole_snapshot() {
        let mut p = procedure();
        let snapshot = progressed();
        p.steps[1].tasks.push(Task::new("2b", "2.2 Check level"));

        let outcome = reconcile(&p, Some(&snapshot));
        assert_eq!(outcome.steps, p.steps);
        assert_eq!(outcome.edges, p.edges);
        assert_eq!(
            outcome.decision,
            MergeDecision::DiscardedDrift {
                step_id: "2".into(),
                canonical: 2,
                snapshot: 1,
            }
        );
    }

    #[test]
    fn all_origin_positions_are_corrupt() {
        let p = procedure();
        let mut snapshot = progressed();
        for step in &mut snapshot.steps {
            step.position = Some(Position::default());
        }
        let outcome = reconcile(&p, Some(&snapshot));
        assert_eq!(outcome, MergeOutcome::canonical(&p, MergeDecision::DiscardedCorrupt));
        assert_eq!(outcome.steps, reconcile(&p, None).steps);
    }

    #[test]
    fn single_origin_step_is_not_corrupt() {
        let p = procedure();
        let mut snapshot = progressed();
        snapshot.steps[0].position = Some(Position::default());
        snapshot.steps[1].position = None;
        let outcome = reconcile(&p, Some(&snapshot));
        assert!(outcome.merged());
        assert_eq!(outcome.steps[0].position, Position::default());
        assert_eq!(outcome.steps[1].position, p.steps[1].position);
    }

    #[test]
    fn edges_fall_back_when_saved_list_is_empty() {
        let p = procedure();
        let mut snapshot = progressed();
        snapshot.edges = Some(Vec::new());
        assert_eq!(reconcile(&p, Some(&snapshot)).edges, p.edges);
        snapshot.edges = None;
        assert_eq!(reconcile(&p, Some(&snapshot)).edges, p.edges);

        let bent = vec![Edge::new("1", "2", EdgeKind::Bent)];
        snapshot.edges = Some(bent.clone());
        assert_eq!(reconcile(&p, Some(&snapshot)).edges, bent);
    }

    #[test]
    fn notes_survive_the_round_trip() {
        let p = procedure();
        let mut steps = p.steps.clone();
        steps[1].tasks[0]
            .append_note("Seal replaced", Some("tech-2"), Utc::now())
            .expect("note");
        let raw = serde_json::to_string(&Snapshot::capture(&p, &steps, &p.edges))
            .expect("serialize");
        let snapshot = parse_snapshot(&raw).expect("parse");
        let outcome = reconcile(&p, Some(&snapshot));
        assert_eq!(outcome.steps[1].tasks[0].current_notes().len(), 1);
    }

    #[test]
    fn unparseable_snapshot_is_absent() {
        assert!(parse_snapshot("{not json").is_none());
        assert!(Snapshot::from_value(serde_json::json!({"steps": 3})).is_none());
        let empty = Snapshot::from_value(serde_json::json!({})).expect("defaults");
        assert!(empty.steps.is_empty());
    }
}
