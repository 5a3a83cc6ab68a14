//! Stowage Core
//!
//! Shared primitives for the Stowage engine: fast collections, the
//! generational sparse set backing loadable ids, the per-tick work budget,
//! logging and profiling setup.

pub mod alloc;
pub mod budget;
pub mod logging;
pub mod profiling;

pub use budget::{BudgetLimit, FrameBudget};
