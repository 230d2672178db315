//! Phase orchestration.
//!
//! [`PhaseStateMachine`] moves each part through the eleven phases. A single
//! `advance` runs one attempt of the current phase: plan tasks, check them
//! against the scope boundary, delegate, inspect the results, charge the
//! budget and evaluate the phase's gates. The outcome is a value: advancing,
//! restarting, rolling back, halting or escalating.
//!
//! Persistence lives beside it: [`RoadmapStore`] owns `roadmap.json` under an
//! exclusive lock and [`StateManager`] appends every status transition to
//! `state.jsonl`, which is replayed on load.

mod machine;
mod planner;
mod roadmap;
mod state;
mod store;

pub use machine::{Collaborators, PhaseOutcome, PhaseStateMachine};
pub use planner::{PlanContext, StaticPlanner, TaskPlanner};
pub use roadmap::{GateRecord, ROADMAP_FORMAT, Roadmap, TaskEntry, TaskMetrics};
pub use state::{StateEntry, StateManager};
pub use store::RoadmapStore;
