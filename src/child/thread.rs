//! Children backed by a dedicated worker thread.
//!
//! Each worker thread runs its own single-threaded runtime and builds its own
//! runner from the workspace root, so no runner state is shared with the
//! orchestrator. A panic on the thread surfaces as a transport failure.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::remote::{route, Inbound, Launcher, Link, RemoteChild};
use super::{Child, ChildFactory, ChildId};
use crate::log::Logger;
use crate::runner::RunnerFactory;
use crate::util::{blocking, panic_message};
use crate::{mlog_debug, worker, Result};

pub type ThreadChild = RemoteChild<ThreadLauncher>;

/// Starts worker threads.
#[derive(Clone)]
pub struct ThreadLauncher {
    workspace_root: PathBuf,
    factory: Arc<dyn RunnerFactory>,
}

impl ThreadLauncher {
    pub fn new(workspace_root: impl Into<PathBuf>, factory: Arc<dyn RunnerFactory>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            factory,
        }
    }
}

impl Launcher for ThreadLauncher {
    fn kind(&self) -> &'static str {
        "thread"
    }

    fn launch(&mut self, id: ChildId, logger: &Logger) -> Result<Link> {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (response_tx, mut responses) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let root = self.workspace_root.clone();
        let factory = self.factory.clone();
        let token = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(format!("marshal-worker-{}", id))
            .spawn(move || worker::run_thread(root, factory, request_rx, response_tx, token))?;
        mlog_debug!("Child {} started worker thread", id);

        let logger = logger.clone();
        let pump = tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                route(response, &logger, &inbound_tx);
            }
            let cause = match blocking(move || Ok(handle.join())).await {
                Ok(Ok(Ok(()))) => "stopped".to_string(),
                Ok(Ok(Err(e))) => format!("failed ({e})"),
                Ok(Err(payload)) => format!("panicked ({})", panic_message(payload.as_ref())),
                Err(e) => format!("could not be joined ({e})"),
            };
            mlog_debug!("Child {} worker thread {}", id, cause);
            let _ = inbound_tx.send(Inbound::Closed(cause));
        });

        Ok(Link {
            requests,
            inbound,
            tasks: vec![pump],
            cancel: Some(cancel),
        })
    }
}

/// Creates thread children for one workspace.
#[derive(Clone)]
pub struct ThreadChildFactory {
    launcher: ThreadLauncher,
    logger: Logger,
}

impl ThreadChildFactory {
    pub fn new(workspace_root: impl Into<PathBuf>, factory: Arc<dyn RunnerFactory>, logger: Logger) -> Self {
        Self {
            launcher: ThreadLauncher::new(workspace_root, factory),
            logger,
        }
    }
}

impl ChildFactory for ThreadChildFactory {
    fn create(&self) -> Box<dyn Child> {
        Box::new(ThreadChild::new(self.launcher.clone(), self.logger.clone()))
    }
}
