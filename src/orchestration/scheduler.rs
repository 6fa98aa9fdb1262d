//! Scheduler front end and result aggregation.
//!
//! [`Scheduler::run`] turns a target tree into a [`RunStream`] of leaf
//! results. The tree walk runs inside the stream: it makes progress only
//! while the stream is polled, and dropping the stream cancels it. Every
//! child created for the run is owned by a guard inside the walk, so
//! cancellation destroys them all.
//!
//! Fail-fast: the first failed leaf ends the walk. Its result is not
//! yielded; the stream yields the failure as an error instead, after any
//! results already emitted, and then ends.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::pool::ChildPoolStrategy;
use super::progress::{NoProgress, Progress, ProgressSink};
use super::regular::{LeafBackend, RegularStrategy};
use crate::child::{ChildFactory, ProcessChildFactory, ThreadChildFactory};
use crate::config::Config;
use crate::core::{ExecutionResult, Options, SchedulerKind, TargetNode, TargetSpec};
use crate::log::Logger;
use crate::runner::{CommandRunnerFactory, ResultStream, RunnerFactory, TargetRunner};
use crate::{mlog, mlog_debug, mlog_error, Error, Result};

/// State shared by every leaf of one run.
pub struct RunContext {
    results: mpsc::UnboundedSender<ExecutionResult>,
    progress: Arc<Progress>,
    extra_options: Options,
    logger: Logger,
}

impl RunContext {
    pub fn extra_options(&self) -> &Options {
        &self.extra_options
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

/// Consume one leaf's result stream.
///
/// Successful results are emitted to the run. A failed result or an error
/// ends the leaf with an error. Either way the leaf counts toward progress
/// once it reaches a terminal outcome; a leaf dropped mid-flight does not.
pub(crate) async fn drive_leaf(ctx: &RunContext, spec: &TargetSpec, mut results: ResultStream<'_>) -> Result<()> {
    let label = spec.to_string();
    let mut outcome = Ok(());
    while let Some(item) = results.next().await {
        match item.and_then(|result| result.into_result(&label)) {
            Ok(result) => {
                let _ = ctx.results.send(result);
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    ctx.progress.record(&label, outcome.is_ok());
    if let Err(e) = &outcome {
        mlog_error!("Target {} failed: {}", label, e);
    }
    outcome
}

#[derive(Clone)]
enum Strategy {
    Regular(RegularStrategy),
    ChildPool(ChildPoolStrategy),
}

/// Everything needed to build children and runners for one workspace.
#[derive(Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub runner_factory: Arc<dyn RunnerFactory>,
}

impl Workspace {
    /// Open a workspace, reading its `marshal.toml`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = Config::load(&root)?;
        Ok(Self {
            root,
            config,
            runner_factory: Arc::new(CommandRunnerFactory),
        })
    }

    pub fn with_runner_factory(mut self, factory: Arc<dyn RunnerFactory>) -> Self {
        self.runner_factory = factory;
        self
    }
}

/// Schedules target trees with a fixed strategy.
#[derive(Clone)]
pub struct Scheduler {
    strategy: Strategy,
    progress: Arc<dyn ProgressSink>,
    logger: Logger,
    extra_options: Options,
}

impl Scheduler {
    fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            progress: Arc::new(NoProgress),
            logger: Logger::global(),
            extra_options: Options::new(),
        }
    }

    /// Leaves run directly on `runner`.
    pub fn in_process(runner: Arc<dyn TargetRunner>) -> Self {
        Self::with_strategy(Strategy::Regular(RegularStrategy::new(LeafBackend::InProcess(runner))))
    }

    /// Every leaf gets a fresh child from `factory`.
    pub fn respawn(factory: Arc<dyn ChildFactory>) -> Self {
        Self::with_strategy(Strategy::Regular(RegularStrategy::new(LeafBackend::Respawn(factory))))
    }

    /// Leaves share a bounded pool of children from `factory`.
    pub fn child_pool(factory: Arc<dyn ChildFactory>) -> Self {
        Self::with_strategy(Strategy::ChildPool(ChildPoolStrategy::new(factory)))
    }

    /// Build the scheduler for `kind` over `workspace`.
    ///
    /// `logger` receives both in-process leaf output and the `Logging`
    /// lines forwarded by every child the scheduler creates.
    pub fn for_kind(kind: SchedulerKind, workspace: &Workspace, logger: Logger) -> Result<Self> {
        let root = workspace.root.clone();
        let scheduler = match kind {
            SchedulerKind::InProcess => Self::in_process(workspace.runner_factory.create(&root)?),
            SchedulerKind::Spawn => Self::child_pool(Arc::new(ProcessChildFactory::new(
                workspace.config.worker_program()?,
                root,
                logger.clone(),
            ))),
            SchedulerKind::Respawn => Self::respawn(Arc::new(ProcessChildFactory::one_shot(
                workspace.config.worker_program()?,
                root,
                logger.clone(),
            ))),
            SchedulerKind::Worker => Self::child_pool(Arc::new(ThreadChildFactory::new(
                root,
                workspace.runner_factory.clone(),
                logger.clone(),
            ))),
        };
        mlog_debug!("Scheduler built: kind={}", kind);
        Ok(scheduler.with_logger(logger))
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Logger handed to in-process leaves. Children keep the logger their
    /// factory was built with; see [`Scheduler::for_kind`].
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Options layered onto every leaf of every run.
    pub fn with_extra_options(mut self, options: Options) -> Self {
        self.extra_options = options;
        self
    }

    /// Start scheduling `tree`. Nothing runs until the stream is polled.
    pub fn run(&self, tree: TargetNode) -> RunStream<'_> {
        let total = tree.count_leaves();
        let progress = Arc::new(Progress::new(total, self.progress.clone()));
        let (results, receiver) = mpsc::unbounded_channel();
        let ctx = RunContext {
            results,
            progress: progress.clone(),
            extra_options: self.extra_options.clone(),
            logger: self.logger.clone(),
        };
        mlog!("Run started: {} targets", total);

        let walk = async move {
            let outcome = match &self.strategy {
                Strategy::Regular(strategy) => strategy.walk(&tree, &ctx).await,
                Strategy::ChildPool(strategy) => strategy.run(&tree, None, &ctx).await,
            };
            match &outcome {
                Ok(()) => mlog!("Run finished: {}/{} targets", ctx.progress.completed(), total),
                Err(e) => mlog_error!("Run failed: {}", e),
            }
            outcome
        }
        .boxed();

        RunStream {
            walk: Some(walk),
            results: receiver,
            error: None,
            progress,
        }
    }
}

/// Lazily scheduled run. Yields leaf results as they complete.
pub struct RunStream<'a> {
    walk: Option<BoxFuture<'a, Result<()>>>,
    results: mpsc::UnboundedReceiver<ExecutionResult>,
    error: Option<Error>,
    progress: Arc<Progress>,
}

impl RunStream<'_> {
    /// Leaves finished so far.
    pub fn completed(&self) -> usize {
        self.progress.completed()
    }

    /// Leaves in the tree.
    pub fn total(&self) -> usize {
        self.progress.total()
    }
}

impl Stream for RunStream<'_> {
    type Item = Result<ExecutionResult>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Poll::Ready(Some(result)) = this.results.poll_recv(cx) {
                return Poll::Ready(Some(Ok(result)));
            }
            let Some(walk) = this.walk.as_mut() else {
                // The walk is gone, so is the sender: everything is drained.
                return Poll::Ready(this.error.take().map(Err));
            };
            match walk.as_mut().poll(cx) {
                Poll::Ready(outcome) => {
                    this.walk = None;
                    this.error = outcome.err();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
