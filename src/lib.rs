pub mod child;
pub mod config;
pub mod core;
pub mod error;
pub mod ipc;
pub mod log;
pub mod orchestration;
pub mod runner;
pub mod util;
pub mod worker;

pub use child::{Child, ChildFactory, ChildGuard, ChildId};
pub use crate::core::{count_leaves, ExecutionResult, MaxParallel, SchedulerKind, TargetNode, TargetSpec};
pub use error::{Error, Result};
pub use orchestration::{RunStream, Scheduler, Workspace};
pub use runner::{ResultStream, TargetRunner};
