//! Task toggling and step-level completion.
//!
//! # Completion rule
//! A step is complete iff it has at least one reference-bearing task and
//! every reference-bearing task is completed. General tasks never gate it,
//! so a step made only of general tasks cannot auto-complete.
//!
//! # State Machine (per step)
//! ```text
//! Incomplete --(last reference task checked)--> Complete   [stamp + attribute]
//! Complete   --(any reference task unchecked)--> Incomplete [clear stamp + attribution]
//! ```
//!
//! All functions here are pure over their inputs: the caller supplies the
//! clock and applies the returned state.

use chrono::{DateTime, Utc};

use crate::procedure::Step;
use crate::technician::SessionContext;

/// Result of toggling a task.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleOutcome {
    pub steps: Vec<Step>,
    /// Set when this toggle moved the step into the complete state.
    pub step_just_completed: Option<String>,
    /// Set when this toggle took completion away from the step.
    pub step_reopened: Option<String>,
}

/// Step-level transition produced by [`reconcile_step_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Completed,
    Reopened,
}

/// Whether `step` currently satisfies the completion rule.
pub fn meets_completion_rule(step: &Step) -> bool {
    let mut reference_tasks = step.reference_tasks().peekable();
    reference_tasks.peek().is_some() && reference_tasks.all(|t| t.completed)
}

/// Bring the step's completion stamp and attribution in line with its tasks.
///
/// Also used after editing a step's task list, so a step whose last
/// reference-bearing task was removed loses its completion.
pub fn reconcile_step_completion(
    step: &mut Step,
    ctx: &SessionContext,
    now: DateTime<Utc>,
) -> Transition {
    match (step.is_complete(), meets_completion_rule(step)) {
        (false, true) => {
            step.completed_at = Some(now);
            if let Some(who) = ctx.attribute(step) {
                step.completed_by = Some(who.technician_id);
                step.completed_by_initials = who.initials;
            }
            Transition::Completed
        }
        (true, false) => {
            step.clear_completion();
            Transition::Reopened
        }
        _ => Transition::Unchanged,
    }
}

/// Flip the completion of one task and recompute its step.
///
/// Unknown step or task ids leave the state untouched.
pub fn toggle_task(
    steps: &[Step],
    step_id: &str,
    task_id: &str,
    ctx: &SessionContext,
    now: DateTime<Utc>,
) -> ToggleOutcome {
    let mut steps = steps.to_vec();
    let mut outcome = ToggleOutcome {
        steps: Vec::new(),
        step_just_completed: None,
        step_reopened: None,
    };

    let Some(step) = steps.iter_mut().find(|s| s.id == step_id) else {
        tracing::debug!(step_id, task_id, "Toggle ignored: unknown step");
        outcome.steps = steps;
        return outcome;
    };
    let Some(task) = step.task_mut(task_id) else {
        tracing::debug!(step_id, task_id, "Toggle ignored: unknown task");
        outcome.steps = steps;
        return outcome;
    };

    let completed = !task.completed;
    task.set_completed(completed, now);

    match reconcile_step_completion(step, ctx, now) {
        Transition::Completed => {
            tracing::info!(
                step_id,
                completed_by = step.completed_by.as_deref().unwrap_or("-"),
                "Step completed"
            );
            outcome.step_just_completed = Some(step.id.clone());
        }
        Transition::Reopened => {
            tracing::info!(step_id, "Step reopened");
            outcome.step_reopened = Some(step.id.clone());
        }
        Transition::Unchanged => {}
    }

    outcome.steps = steps;
    outcome
}
