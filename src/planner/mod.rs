//! Planning and execution.
//!
//! The planner compares desired and observed state per section and builds
//! an ordered plan; the executor applies it.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffView};
pub use executor::{
    ActionResult, CancelHandle, CancelSignal, ExecuteOptions, Executor, FailureCause, Outcome,
    Report, SkipReason,
};
pub use plan::{ActionKind, Plan, PlannedAction, Planner};
