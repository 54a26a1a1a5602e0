//! Which step(s) become active after a step completes.
//!
//! Parallel branches are derived from the step ids themselves: steps that
//! share a major ordinal are siblings and become active together.

use crate::procedure::{canonical_order, Step};

/// Steps to activate after the step at `completed_index` (an index into
/// `steps`) has completed.
///
/// Scans forward in canonical order to the first incomplete sequential step
/// and returns it together with its incomplete parallel siblings. Returns an
/// empty list when the completed step is last, when every later step is
/// already complete, or when the index is out of range.
pub fn next_active(steps: &[Step], completed_index: usize) -> Vec<String> {
    let order = canonical_order(steps);
    let Some(position) = order.iter().position(|&i| i == completed_index) else {
        return Vec::new();
    };

    let remaining: Vec<&Step> = order[position + 1..]
        .iter()
        .map(|&i| &steps[i])
        .filter(|s| !s.is_standalone())
        .collect();

    let Some(next) = remaining.iter().find(|s| !s.is_complete()) else {
        return Vec::new();
    };
    let major = next.ordinal_lenient().major;

    remaining
        .iter()
        .filter(|s| s.ordinal_lenient().major == major && !s.is_complete())
        .map(|s| s.id.clone())
        .collect()
}

/// Same as [`next_active`], addressed by step id.
pub fn next_active_after(steps: &[Step], completed_step_id: &str) -> Vec<String> {
    steps
        .iter()
        .position(|s| s.id == completed_step_id)
        .map(|index| next_active(steps, index))
        .unwrap_or_default()
}

/// Steps active at the start of a run (or after a reset): the first
/// incomplete stage and its parallel siblings.
pub fn initial_active(steps: &[Step]) -> Vec<String> {
    let order = canonical_order(steps);
    let sequential: Vec<&Step> = order
        .iter()
        .map(|&i| &steps[i])
        .filter(|s| !s.is_standalone())
        .collect();
    let Some(first) = sequential.iter().find(|s| !s.is_complete()) else {
        return Vec::new();
    };
    let major = first.ordinal_lenient().major;
    sequential
        .iter()
        .filter(|s| s.ordinal_lenient().major == major && !s.is_complete())
        .map(|s| s.id.clone())
        .collect()
}

/// Whether the run is finished.
///
/// Only steps with at least one reference-bearing task can complete, so the
/// run is finished once all of those are complete (and at least one exists).
pub fn is_finished(steps: &[Step]) -> bool {
    let mut completable = steps
        .iter()
        .filter(|s| s.reference_tasks().next().is_some())
        .peekable();
    completable.peek().is_some() && completable.all(Step::is_complete)
}
