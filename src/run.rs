//! Service run driver.
//!
//! [`ServiceRun`] owns the merged state of one procedure instance and drives
//! the pure engine functions: it merges the saved snapshot on open, gates
//! task toggling behind [`ServiceRun::start`], tracks which steps are active,
//! and writes a fresh snapshot to the store after every mutation.
//!
//! Mutating methods take `&mut self`; callers sharing a run between tasks
//! wrap it in a lock, which serializes toggles and re-layouts per instance.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::layout::{apply_layout, layout, Layout, LayoutMode};
use crate::merge::{reconcile, MergeDecision, Snapshot};
use crate::procedure::{Edge, NoteError, Position, Procedure, ProcedureError, Step, Task};
use crate::progress::{self, ProcedureProgress};
use crate::reference::{group_by_section, ChecklistView};
use crate::store::{SnapshotStore, StoreError};
use crate::technician::{Role, SessionContext};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Procedure(#[from] ProcedureError),

    #[error(transparent)]
    Note(#[from] NoteError),

    #[error("Run has not been started")]
    NotStarted,

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Unknown task {task} in step {step}")]
    UnknownTask { step: String, task: String },
}

/// Options applied when opening a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Layout used when the merged steps carry no usable positions.
    pub layout: LayoutMode,
    /// Reject malformed step ids instead of placing them in column 0.
    pub strict_step_ids: bool,
}

/// What a toggle changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleReport {
    pub step_just_completed: Option<String>,
    pub step_reopened: Option<String>,
    /// Steps that became active because of this toggle.
    pub activated: Vec<String>,
}

pub struct ServiceRun {
    procedure: Procedure,
    steps: Vec<Step>,
    edges: Vec<Edge>,
    started: bool,
    active: Vec<String>,
    session: SessionContext,
    store: Arc<dyn SnapshotStore>,
    decision: MergeDecision,
}

impl std::fmt::Debug for ServiceRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRun")
            .field("procedure", &self.procedure.id)
            .field("started", &self.started)
            .field("active", &self.active)
            .field("decision", &self.decision)
            .finish()
    }
}

impl ServiceRun {
    /// Load saved progress for `procedure` from `store` and merge it.
    pub async fn open(
        procedure: Procedure,
        store: Arc<dyn SnapshotStore>,
        session: SessionContext,
        options: RunOptions,
    ) -> Result<Self, RunError> {
        procedure.validate(options.strict_step_ids)?;

        let snapshot = store
            .get(&procedure.id)
            .await?
            .and_then(Snapshot::from_value);
        let merged = reconcile(&procedure, snapshot.as_ref());

        let (started, active) = match (&merged.decision, &snapshot) {
            (MergeDecision::Merged, Some(saved)) => (saved.started, saved.active_step_ids.clone()),
            _ => (false, Vec::new()),
        };

        let mut run = Self {
            procedure,
            steps: merged.steps,
            edges: merged.edges,
            started,
            active,
            session,
            store,
            decision: merged.decision,
        };

        if run.needs_layout() {
            tracing::info!(procedure_id = %run.procedure.id, mode = %options.layout, "Steps have no positions; computing layout");
            run.apply(layout(&run.steps, options.layout, run.procedure.grid_unit));
        }
        run.normalize_active();

        tracing::info!(
            procedure_id = %run.procedure.id,
            decision = ?run.decision,
            started = run.started,
            active = ?run.active,
            "Opened service run"
        );
        Ok(run)
    }

    pub fn procedure(&self) -> &Procedure {
        &self.procedure
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Currently active step ids, in canonical order.
    pub fn active_steps(&self) -> &[String] {
        &self.active
    }

    pub fn merge_decision(&self) -> &MergeDecision {
        &self.decision
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Open the execution gate and activate the first stage.
    pub async fn start(&mut self) -> Result<(), RunError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.active = progress::initial_active(&self.steps);
        tracing::info!(procedure_id = %self.procedure.id, active = ?self.active, "Run started");
        self.persist().await
    }

    /// Flip a task's completion. Unknown ids leave the run untouched.
    pub async fn toggle_task(
        &mut self,
        step_id: &str,
        task_id: &str,
    ) -> Result<ToggleReport, RunError> {
        if !self.started {
            return Err(RunError::NotStarted);
        }
        let outcome =
            progress::toggle_task(&self.steps, step_id, task_id, &self.session, Utc::now());
        self.steps = outcome.steps;

        let mut activated = Vec::new();
        if let Some(done) = &outcome.step_just_completed {
            self.active.retain(|id| id != done);
            if !self.stage_open(done) {
                for id in progress::next_active_after(&self.steps, done) {
                    if !self.active.contains(&id) {
                        self.active.push(id.clone());
                        activated.push(id);
                    }
                }
            }
        }
        if let Some(reopened) = &outcome.step_reopened {
            if !self.active.contains(reopened) {
                self.active.push(reopened.clone());
                activated.push(reopened.clone());
            }
        }
        self.normalize_active();
        if !activated.is_empty() {
            tracing::info!(procedure_id = %self.procedure.id, activated = ?activated, "Activated steps");
        }

        self.persist().await?;
        Ok(ToggleReport {
            step_just_completed: outcome.step_just_completed,
            step_reopened: outcome.step_reopened,
            activated,
        })
    }

    /// Place one step at an explicit position (manual drag).
    pub async fn move_step(&mut self, step_id: &str, position: Position) -> Result<(), RunError> {
        let step = self.step_mut(step_id)?;
        step.position = position;
        self.persist().await
    }

    /// Recompute positions and edges from scratch.
    pub async fn relayout(&mut self, mode: LayoutMode) -> Result<Layout, RunError> {
        let computed = layout(&self.steps, mode, self.procedure.grid_unit);
        self.apply(computed.clone());
        self.persist().await?;
        Ok(computed)
    }

    /// Clear all completion and timing, close the gate, and keep positions
    /// and the note log.
    pub async fn reset(&mut self) -> Result<(), RunError> {
        for step in &mut self.steps {
            step.clear_completion();
            for task in &mut step.tasks {
                task.completed = false;
                task.completed_at = None;
                task.actual_time_minutes = None;
            }
        }
        self.started = false;
        self.active.clear();
        tracing::info!(procedure_id = %self.procedure.id, "Run reset");
        self.persist().await
    }

    /// Append a note to a task, authored by the technician bound to the step.
    pub async fn add_note(
        &mut self,
        step_id: &str,
        task_id: &str,
        text: &str,
    ) -> Result<Uuid, RunError> {
        let author = self.author_for(step_id)?;
        let id = self
            .task_mut(step_id, task_id)?
            .append_note(text, author.as_deref(), Utc::now())?;
        self.persist().await?;
        Ok(id)
    }

    /// Revise a note; earlier versions stay in the log.
    pub async fn edit_note(
        &mut self,
        step_id: &str,
        task_id: &str,
        note_id: Uuid,
        text: &str,
    ) -> Result<Uuid, RunError> {
        let author = self.author_for(step_id)?;
        let id = self
            .task_mut(step_id, task_id)?
            .edit_note(note_id, text, author.as_deref(), Utc::now())?;
        self.persist().await?;
        Ok(id)
    }

    /// Record the time actually spent on a task.
    pub async fn record_time(
        &mut self,
        step_id: &str,
        task_id: &str,
        minutes: u32,
    ) -> Result<(), RunError> {
        self.task_mut(step_id, task_id)?.actual_time_minutes = Some(minutes);
        self.persist().await
    }

    /// Bind (or unbind) the technician occupying a role for this session.
    pub fn bind_technician(&mut self, role: Role, technician_id: Option<String>) {
        tracing::debug!(role = ?role, technician_id = ?technician_id, "Bound technician");
        self.session.bind(role, technician_id);
    }

    pub fn progress(&self) -> ProcedureProgress {
        progress::progress(&self.steps)
    }

    pub fn checklist(&self, step_id: &str) -> Option<ChecklistView> {
        self.steps
            .iter()
            .find(|s| s.id == step_id)
            .map(|s| group_by_section(&s.tasks))
    }

    pub fn is_finished(&self) -> bool {
        progress::is_finished(&self.steps)
    }

    /// Current state as it would be persisted.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.procedure, &self.steps, &self.edges)
            .with_activity(self.started, self.active.clone())
    }

    async fn persist(&self) -> Result<(), RunError> {
        let snapshot = self.snapshot();
        self.store
            .set(&self.procedure.id, &snapshot.to_value())
            .await?;
        tracing::debug!(
            procedure_id = %self.procedure.id,
            steps = snapshot.steps.len(),
            "Persisted snapshot"
        );
        Ok(())
    }

    fn apply(&mut self, computed: Layout) {
        apply_layout(&mut self.steps, &computed);
        self.edges = computed.edges;
    }

    /// Two or more steps all at the origin would be discarded as corrupt on
    /// the next open, so they get a computed layout instead.
    fn needs_layout(&self) -> bool {
        self.steps.len() > 1 && self.steps.iter().all(|s| s.position.is_origin())
    }

    /// Whether `step_id` still has incomplete parallel siblings.
    fn stage_open(&self, step_id: &str) -> bool {
        let Some(done) = self.steps.iter().find(|s| s.id == step_id) else {
            return false;
        };
        if done.is_standalone() {
            return false;
        }
        let major = done.ordinal_lenient().major;
        self.steps.iter().any(|s| {
            s.id != step_id
                && !s.is_standalone()
                && !s.is_complete()
                && s.ordinal_lenient().major == major
        })
    }

    /// Drop unknown or completed ids and keep canonical order.
    fn normalize_active(&mut self) {
        if !self.started {
            self.active.clear();
            return;
        }
        let order = crate::procedure::canonical_order(&self.steps);
        let active: Vec<String> = order
            .into_iter()
            .map(|i| &self.steps[i])
            .filter(|s| !s.is_complete() && self.active.contains(&s.id))
            .map(|s| s.id.clone())
            .collect();
        self.active = if active.is_empty() {
            progress::initial_active(&self.steps)
        } else {
            active
        };
    }

    fn author_for(&self, step_id: &str) -> Result<Option<String>, RunError> {
        let step = self
            .steps
            .iter()
            .find(|s| s.id == step_id)
            .ok_or_else(|| RunError::UnknownStep(step_id.to_string()))?;
        Ok(self.session.attribute(step).map(|a| a.technician_id))
    }

    fn step_mut(&mut self, step_id: &str) -> Result<&mut Step, RunError> {
        self.steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| RunError::UnknownStep(step_id.to_string()))
    }

    fn task_mut(&mut self, step_id: &str, task_id: &str) -> Result<&mut Task, RunError> {
        self.step_mut(step_id)?
            .task_mut(task_id)
            .ok_or_else(|| RunError::UnknownTask {
                step: step_id.to_string(),
                task: task_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{Assignment, Task};
    use crate::store::{
        create_snapshot_store, InMemorySnapshotStore, SqliteSnapshotStore, StoreType,
    };
    use crate::technician::{InMemoryDirectory, Technician};

    fn procedure() -> Procedure {
        Procedure::new(
            "compressor-annual",
            vec![
                Step::new(
                    "1",
                    Assignment::Both,
                    vec![
                        Task::new("1a", "1.1 Lock out power"),
                        Task::new("1b", "1.2 Vent pressure"),
                    ],
                ),
                Step::new("2.1", Assignment::A, vec![Task::new("2a", "2.1 Replace filter")]),
                Step::new(
                    "2.2",
                    Assignment::B,
                    vec![
                        Task::new("2b", "2.2 Drain condensate"),
                        Task::new("2g", "Photograph the tank"),
                    ],
                ),
                Step::new("3", Assignment::Both, vec![Task::new("3a", "3.1 Test run")]),
            ],
            Vec::new(),
        )
    }

    fn session() -> SessionContext {
        let directory = InMemoryDirectory::new()
            .with(Technician::new("t-ada", "Ada Lovelace"))
            .with(Technician::new("t-alan", "Alan Turing"));
        SessionContext::new(Arc::new(directory))
            .with_role(Role::A, "t-ada")
            .with_role(Role::B, "t-alan")
    }

    async fn open(store: Arc<dyn SnapshotStore>) -> ServiceRun {
        ServiceRun::open(procedure(), store, session(), RunOptions::default())
            .await
            .expect("open run")
    }

    #[tokio::test]
    async fn first_open_lays_out_and_waits_for_start() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let mut run = open(store).await;
        assert_eq!(run.merge_decision(), &MergeDecision::FirstRun);
        assert!(!run.is_started());
        assert!(run.active_steps().is_empty());
        assert!(run.steps().iter().all(|s| !s.position.is_origin()));
        assert_eq!(run.edges().len(), 4);

        let err = run.toggle_task("1", "1a").await.expect_err("gated");
        assert!(matches!(err, RunError::NotStarted));
    }

    #[tokio::test]
    async fn parallel_stage_waits_for_both_lanes() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let mut run = open(store).await;
        run.start().await.expect("start");
        assert_eq!(run.active_steps(), ["1"]);

        run.toggle_task("1", "1a").await.expect("toggle");
        let report = run.toggle_task("1", "1b").await.expect("toggle");
        assert_eq!(report.step_just_completed.as_deref(), Some("1"));
        assert_eq!(report.activated, vec!["2.1", "2.2"]);
        assert_eq!(run.steps()[0].completed_by.as_deref(), Some("t-ada"));
        assert_eq!(run.steps()[0].completed_by_initials.as_deref(), Some("AL"));

        let report = run.toggle_task("2.2", "2b").await.expect("toggle");
        assert_eq!(report.step_just_completed.as_deref(), Some("2.2"));
        assert!(report.activated.is_empty(), "stage 2 still has 2.1 open");
        assert_eq!(run.active_steps(), ["2.1"]);
        assert_eq!(run.steps()[2].completed_by.as_deref(), Some("t-alan"));

        let report = run.toggle_task("2.1", "2a").await.expect("toggle");
        assert_eq!(report.activated, vec!["3"]);
        assert_eq!(run.active_steps(), ["3"]);

        let report = run.toggle_task("2.1", "2a").await.expect("toggle");
        assert_eq!(report.step_reopened.as_deref(), Some("2.1"));
        assert_eq!(run.active_steps(), ["2.1", "3"]);
    }

    #[tokio::test]
    async fn unknown_ids_are_ignored_by_toggle() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let mut run = open(store).await;
        run.start().await.expect("start");
        let before = run.steps().to_vec();
        let report = run.toggle_task("1", "nope").await.expect("toggle");
        assert_eq!(report.step_just_completed, None);
        assert_eq!(run.steps(), before.as_slice());
    }

    async fn full_cycle(store_type: StoreType) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn SnapshotStore> = Arc::from(
            create_snapshot_store(store_type, dir.path().to_path_buf(), "crew")
                .await
                .expect("store"),
        );

        let mut run = open(store.clone()).await;
        run.start().await.expect("start");
        run.toggle_task("1", "1a").await.expect("toggle");
        run.toggle_task("1", "1b").await.expect("toggle");
        run.record_time("1", "1a", 12).await.expect("time");
        run.move_step("3", Position::new(900, 300)).await.expect("move");
        let note = run
            .add_note("2.2", "2b", "Drain valve sticky")
            .await
            .expect("note");
        run.edit_note("2.2", "2b", note, "Drain valve replaced")
            .await
            .expect("edit");
        drop(run);

        // A fresh handle on persistent backends proves the data hit storage.
        let store: Arc<dyn SnapshotStore> = if store.is_persistent() {
            Arc::from(
                create_snapshot_store(store_type, dir.path().to_path_buf(), "crew")
                    .await
                    .expect("reopen store"),
            )
        } else {
            store
        };
        let run = open(store).await;
        assert_eq!(run.merge_decision(), &MergeDecision::Merged);
        assert!(run.is_started());
        assert_eq!(run.active_steps(), ["2.1", "2.2"]);
        assert!(run.steps()[0].is_complete());
        assert_eq!(run.steps()[0].tasks[0].actual_time_minutes, Some(12));
        assert_eq!(run.steps()[3].position, Position::new(900, 300));

        let task = &run.steps()[2].tasks[0];
        assert_eq!(task.notes.len(), 2);
        let current = task.current_notes();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].text, "Drain valve replaced");
        assert_eq!(current[0].author.as_deref(), Some("t-alan"));
    }

    #[tokio::test]
    async fn cycle_memory() {
        full_cycle(StoreType::Memory).await;
    }

    #[tokio::test]
    async fn cycle_file() {
        full_cycle(StoreType::File).await;
    }

    #[tokio::test]
    async fn cycle_sqlite() {
        full_cycle(StoreType::Sqlite).await;
    }

    #[tokio::test]
    async fn drifted_definition_starts_over() {
        let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::open_in_memory().expect("db"));
        let mut run = open(store.clone()).await;
        run.start().await.expect("start");
        run.toggle_task("1", "1a").await.expect("toggle");

        let mut changed = procedure();
        changed.steps[0].tasks.push(Task::new("1c", "1.3 Tag the valve"));
        let run = ServiceRun::open(changed, store, session(), RunOptions::default())
            .await
            .expect("reopen");
        assert!(matches!(
            run.merge_decision(),
            MergeDecision::DiscardedDrift { step_id, .. } if step_id == "1"
        ));
        assert!(!run.is_started());
        assert!(run.steps().iter().all(|s| s.tasks.iter().all(|t| !t.completed)));
    }

    #[tokio::test]
    async fn reset_clears_progress_but_keeps_notes() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let mut run = open(store).await;
        run.start().await.expect("start");
        run.toggle_task("3", "3a").await.expect("toggle");
        run.record_time("3", "3a", 40).await.expect("time");
        run.add_note("3", "3a", "Ran for 10 minutes").await.expect("note");
        run.reset().await.expect("reset");

        assert!(!run.is_started());
        assert!(run.active_steps().is_empty());
        let task = &run.steps()[3].tasks[0];
        assert!(!task.completed);
        assert_eq!(task.actual_time_minutes, None);
        assert_eq!(task.notes.len(), 1);
        assert!(!run.steps()[3].is_complete());
        assert_eq!(run.progress().completed_tasks, 0);
    }

    #[tokio::test]
    async fn strict_mode_rejects_malformed_ids() {
        let mut p = procedure();
        p.steps.push(Step::new("intro", Assignment::Both, Vec::new()));
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let options = RunOptions {
            strict_step_ids: true,
            ..RunOptions::default()
        };
        let err = ServiceRun::open(p.clone(), store.clone(), session(), options)
            .await
            .expect_err("strict");
        assert!(matches!(
            err,
            RunError::Procedure(ProcedureError::MalformedStepId(_))
        ));
        assert!(
            ServiceRun::open(p, store, session(), RunOptions::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn relayout_checklist_and_finish() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let mut run = open(store).await;
        let centered = run.relayout(LayoutMode::Centered).await.expect("layout");
        assert_eq!(centered.positions["2.1"], run.steps()[1].position);

        let view = run.checklist("2.2").expect("checklist");
        assert_eq!(view.reference_count(), 1);
        assert_eq!(view.general.len(), 1);
        assert!(run.checklist("9").is_none());

        run.start().await.expect("start");
        for (step, task) in [("1", "1a"), ("1", "1b"), ("2.1", "2a"), ("2.2", "2b"), ("3", "3a")] {
            run.toggle_task(step, task).await.expect("toggle");
        }
        assert!(run.is_finished());
        assert!(run.active_steps().is_empty());
    }

    #[tokio::test]
    async fn unbound_role_leaves_step_unattributed() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let mut run = open(store).await;
        run.bind_technician(Role::A, None);
        run.bind_technician(Role::B, None);
        run.start().await.expect("start");
        run.toggle_task("1", "1a").await.expect("toggle");
        run.toggle_task("1", "1b").await.expect("toggle");
        assert!(run.steps()[0].is_complete());
        assert_eq!(run.steps()[0].completed_by, None);
    }
}
