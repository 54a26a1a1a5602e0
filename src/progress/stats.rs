//! Progress counters for a run.

use serde::Serialize;

use crate::procedure::Step;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    pub step_id: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub reference_tasks: usize,
    pub completed_reference_tasks: usize,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureProgress {
    pub steps: Vec<StepProgress>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub total_steps: usize,
    pub completed_steps: usize,
    /// Completed tasks as a percentage of all tasks (0 when there are none).
    pub percent: f64,
    /// Sum of recorded task times.
    pub actual_time_minutes: u64,
}

pub fn step_progress(step: &Step) -> StepProgress {
    let reference: Vec<bool> = step.reference_tasks().map(|t| t.completed).collect();
    StepProgress {
        step_id: step.id.clone(),
        total_tasks: step.tasks.len(),
        completed_tasks: step.tasks.iter().filter(|t| t.completed).count(),
        reference_tasks: reference.len(),
        completed_reference_tasks: reference.iter().filter(|c| **c).count(),
        complete: step.is_complete(),
    }
}

/// Counters over all steps, including general (non-reference) tasks.
pub fn progress(steps: &[Step]) -> ProcedureProgress {
    let per_step: Vec<StepProgress> = steps.iter().map(step_progress).collect();
    let total_tasks: usize = per_step.iter().map(|s| s.total_tasks).sum();
    let completed_tasks: usize = per_step.iter().map(|s| s.completed_tasks).sum();
    let percent = if total_tasks == 0 {
        0.0
    } else {
        (completed_tasks as f64 / total_tasks as f64) * 100.0
    };
    let actual_time_minutes = steps
        .iter()
        .flat_map(|s| &s.tasks)
        .filter_map(|t| t.actual_time_minutes)
        .map(u64::from)
        .sum();
    ProcedureProgress {
        total_steps: per_step.len(),
        completed_steps: per_step.iter().filter(|s| s.complete).count(),
        steps: per_step,
        total_tasks,
        completed_tasks,
        percent,
        actual_time_minutes,
    }
}
