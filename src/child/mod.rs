//! Isolated executors for leaves.
//!
//! A [`Child`] runs one request at a time and may be reused for many. The
//! backends differ only in where the work happens:
//!
//! - [`InProcessChild`]: directly on the orchestrator's runtime
//! - [`ProcessChild`]: in a `marshal-worker` subprocess, reused or one-shot
//! - [`ThreadChild`]: on a dedicated worker thread with its own runtime
//!
//! Subprocess and thread children start lazily on their first request and
//! share the request loop in [`remote`].

mod in_process;
mod process;
mod remote;
mod thread;

use std::fmt;

use uuid::Uuid;

use crate::core::{Options, TargetSpec};
use crate::runner::ResultStream;

pub use in_process::{InProcessChild, InProcessChildFactory};
pub use process::{ProcessChild, ProcessChildFactory, ProcessLauncher};
pub use remote::{Inbound, Launcher, Link, RemoteChild};
pub use thread::{ThreadChild, ThreadChildFactory, ThreadLauncher};

/// Unique identifier of a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildId(pub Uuid);

impl ChildId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ChildId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// An executor for leaf invocations.
///
/// Only one request may be in flight. Issuing another before the previous
/// stream finished fails with [`Error::ChildBusy`](crate::Error::ChildBusy).
/// Dropping a stream early abandons its request and leaves the child busy;
/// such a child is expected to be destroyed.
pub trait Child: Send {
    fn id(&self) -> ChildId;

    fn execute_target(&mut self, spec: TargetSpec, extra: Options) -> ResultStream<'_>;

    fn execute_builder(
        &mut self,
        project: String,
        builder: String,
        options: Options,
        target: Option<String>,
    ) -> ResultStream<'_>;

    /// Release the child's resources. Idempotent.
    fn destroy(&mut self);
}

/// Run a leaf on a child, picking the request shape from the target spec.
///
/// Transient specs with a project go out as builder requests with the extra
/// options merged over their own; everything else is a target request.
pub fn execute_leaf<'a>(
    child: &'a mut dyn Child,
    spec: &TargetSpec,
    extra: &Options,
) -> ResultStream<'a> {
    match spec {
        TargetSpec::Transient {
            builder,
            project: Some(project),
            options,
        } => {
            let mut merged = options.clone();
            merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            child.execute_builder(project.clone(), builder.clone(), merged, None)
        }
        _ => child.execute_target(spec.clone(), extra.clone()),
    }
}

/// Creates children of one kind.
pub trait ChildFactory: Send + Sync {
    fn create(&self) -> Box<dyn Child>;
}

/// Owns a child and destroys it when dropped.
pub struct ChildGuard {
    child: Box<dyn Child>,
}

impl ChildGuard {
    pub fn new(child: Box<dyn Child>) -> Self {
        Self { child }
    }

    pub fn id(&self) -> ChildId {
        self.child.id()
    }

    pub fn child_mut(&mut self) -> &mut dyn Child {
        self.child.as_mut()
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.child.destroy();
    }
}

impl fmt::Debug for ChildGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildGuard")
            .field("id", &self.child.id())
            .finish()
    }
}
