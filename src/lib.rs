//! # servicerun
//!
//! Procedure-progression engine for multi-technician service runs.
//!
//! A service procedure is a graph of steps, each a checklist of tasks. Two
//! technicians (roles A and B) work through it, sometimes in parallel. This
//! library provides:
//! - Reference matching on task descriptions (`1.2.3 Check torque`)
//! - Step completion gated on reference-bearing tasks, with attribution
//! - Activation of the next step, or parallel steps, after a completion
//! - Deterministic canvas layout in sequence-aligned or centered mode
//! - Merging of saved progress onto a possibly changed definition
//!
//! ## Architecture
//!
//! ```text
//!   definition ──► merge::reconcile ◄── store (memory | file | sqlite)
//!                        │                        ▲
//!                        ▼                        │ snapshot
//!                   run::ServiceRun ──────────────┘
//!                   │      │      │
//!        progress::toggle  │   layout::layout
//!                          ▼
//!              progress::next_active
//! ```
//!
//! Everything except `store` and `run` is pure and synchronous.
//!
//! ## Modules
//! - `procedure`: Definitions, steps, tasks, edges, catalog
//! - `reference`: Reference matcher and section-grouped checklists
//! - `progress`: Completion state machine, activation planner, statistics
//! - `layout`: Layout planner
//! - `merge`: Persistence merger and snapshots
//! - `technician`: Technician directory and session role bindings
//! - `store`: Key-value snapshot storage
//! - `run`: Service run driver

pub mod config;
pub mod layout;
pub mod merge;
pub mod procedure;
pub mod progress;
pub mod reference;
pub mod run;
pub mod store;
pub mod technician;
pub mod util;

pub use config::Config;
pub use procedure::Procedure;
pub use run::{RunError, RunOptions, ServiceRun};
