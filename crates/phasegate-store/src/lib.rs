//! # phasegate-store
//!
//! Task record storage for phasegate.
//!
//! The scheduler only sees the [`TaskStore`] trait. Two backends ship here:
//! - [`FileTaskStore`]: one JSON file per task plus an epic order file
//! - [`MemoryTaskStore`]: lock-guarded records for tests and embedding

pub mod file;
mod memory;
mod store;

pub use file::FileTaskStore;
pub use memory::MemoryTaskStore;
pub use store::TaskStore;
