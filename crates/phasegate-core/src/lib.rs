//! # phasegate-core
//!
//! Core types for the phasegate task/epic workflow scheduler.
//!
//! A task walks an ordered pipeline of phases (analysis, reviews, tests,
//! implementation, verification, docs, release). Tasks belong to epics, which
//! are completed one after another, and may declare predecessor tasks.
//!
//! ## Core Paradigm
//!
//! - Task records are plain data; scheduling reads a [`TaskSnapshot`]
//! - The only mutation the scheduler performs is writing a new workflow state
//! - Epic completion is derived from its tasks, never stored

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    AuditConfig, CycleCheck, DispatchMode, DriverSettings, ExecutorConfig, PhaseGateConfig,
    PolicyKind, SchedulerConfig, StoreConfig,
};
pub use error::{PhaseGateError, Result};
pub use types::*;
