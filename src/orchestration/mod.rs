//! Scheduling of target trees.
//!
//! Two strategies walk the same tree shape. The regular strategy runs every
//! leaf on its own, in process or on a fresh one-shot child. The child-pool
//! strategy keeps a bounded set of reusable children and threads them
//! through the walk. Both use the slot construct in [`slots`] for bounded
//! parallelism and report through [`Progress`].

mod pool;
mod progress;
mod regular;
mod scheduler;
pub mod slots;

pub use pool::ChildPoolStrategy;
pub use progress::{LogProgress, NoProgress, Progress, ProgressSink};
pub use regular::{LeafBackend, RegularStrategy};
pub use scheduler::{RunContext, RunStream, Scheduler, Workspace};
