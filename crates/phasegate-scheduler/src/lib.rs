//! # phasegate-scheduler
//!
//! Scheduling core for the phasegate pipeline.
//!
//! ## Components
//!
//! - **State table**: successor, rejection and failure routing per state
//! - **Dependency resolver**: predecessor checks against the done set
//! - **Epic tracker**: derived epic completion
//! - **Scheduler**: ready set, epic barrier and priority ordering
//! - **Context policy**: which phases need an isolated executor context
//! - **Driver**: the dispatch loop over a [`phasegate_store::TaskStore`]
//!
//! The first five are pure, synchronous functions of a
//! [`phasegate_core::TaskSnapshot`]. Only the driver performs I/O.

pub mod audit;
pub mod context;
pub mod dependency;
pub mod diagnostics;
pub mod driver;
pub mod epic;
pub mod policy;
pub mod scheduler;
pub mod state_table;

pub use audit::{TransitionKind, TransitionLog, TransitionRecord};
pub use context::needs_fresh_context;
pub use dependency::{can_start, completed_ids};
pub use diagnostics::{explain, find_cycles, Eligibility, Exclusion};
pub use driver::{
    advance, DispatchRequest, DispatchResult, Driver, DriverConfig, PhaseExecutor, PhaseReport,
    RunReport, StepOutcome, StopReason,
};
pub use epic::{completed_epics, epic_progress, is_complete, EpicProgress};
pub use policy::{policy_for, EpicBarrierPolicy, OrderingPolicy, PriorityFirstPolicy};
pub use scheduler::{ready_tasks, Candidate, Scheduler};
pub use state_table::{StateCategory, StateTable};
