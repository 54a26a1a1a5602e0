//! Progress module - how a run advances.
//!
//! - `completion`: task toggling and the step completion rule
//! - `activation`: which steps become active after a step completes
//! - `stats`: progress counters

mod activation;
mod completion;
mod stats;

pub use activation::{initial_active, is_finished, next_active, next_active_after};
pub use completion::{
    meets_completion_rule, reconcile_step_completion, toggle_task, ToggleOutcome, Transition,
};
pub use stats::{progress, step_progress, ProcedureProgress, StepProgress};
