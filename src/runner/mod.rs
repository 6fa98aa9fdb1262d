//! The target-running capability the scheduler is built on.
//!
//! The scheduler never knows what a target *is*. It hands a [`TargetSpec`]
//! to a [`TargetRunner`] and consumes the stream of [`ExecutionResult`]s that
//! comes back. The in-process scheduler calls the runner directly; worker
//! processes and threads build their own runner through a [`RunnerFactory`]
//! from the workspace root they are started with.

mod command;

use std::path::Path;
use std::sync::Arc;

use futures::stream::BoxStream;

use crate::core::{ExecutionResult, Options, TargetSpec};
use crate::log::Logger;
use crate::Result;

pub use command::{option_args, CommandRunner, CommandRunnerFactory, Invocation};

/// Stream of outcomes produced by one invocation.
///
/// Most invocations yield exactly one item; watch-style runners may yield
/// several over time.
pub type ResultStream<'a> = BoxStream<'a, Result<ExecutionResult>>;

/// Runs one target and reports whether it succeeded.
pub trait TargetRunner: Send + Sync {
    /// Run `spec` with `extra` options layered on top of its own.
    fn run(&self, spec: TargetSpec, extra: Options, logger: Logger) -> ResultStream<'_>;

    /// Run `builder` for `project` as a transient target.
    ///
    /// `target`, when given, is passed to the builder as the `target` option.
    fn run_builder(
        &self,
        project: String,
        builder: String,
        options: Options,
        target: Option<String>,
        logger: Logger,
    ) -> ResultStream<'_> {
        let mut extra = Options::new();
        if let Some(target) = target {
            extra.insert("target".to_string(), serde_json::Value::String(target));
        }
        let spec = TargetSpec::Transient {
            builder,
            project: Some(project),
            options,
        };
        self.run(spec, extra, logger)
    }
}

/// Builds a runner bound to a workspace root.
pub trait RunnerFactory: Send + Sync {
    fn create(&self, workspace_root: &Path) -> Result<Arc<dyn TargetRunner>>;
}

impl<F> RunnerFactory for F
where
    F: Fn(&Path) -> Result<Arc<dyn TargetRunner>> + Send + Sync,
{
    fn create(&self, workspace_root: &Path) -> Result<Arc<dyn TargetRunner>> {
        self(workspace_root)
    }
}
