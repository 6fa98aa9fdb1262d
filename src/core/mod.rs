//! Core domain model for marshal.
//!
//! This module contains the target tree, the expression language used for
//! parallelism bounds, leaf outcomes and plan file loading.

pub mod expr;
pub mod plan;
pub mod result;
pub mod tree;

pub use result::{ExecutionResult, SchedulerKind};
pub use tree::{count_leaves, MaxParallel, Options, TargetNode, TargetSpec};
