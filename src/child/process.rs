//! Children backed by a `marshal-worker` subprocess.
//!
//! The worker is started with the workspace root as its only argument. Its
//! stdin and stdout carry newline-delimited JSON messages and its stderr is
//! inherited. The process is killed when the child is destroyed.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc;

use super::remote::{route, Inbound, Launcher, Link, RemoteChild};
use super::{Child, ChildFactory, ChildId};
use crate::ipc::{wire, Request, Response};
use crate::log::Logger;
use crate::util::describe_exit;
use crate::{mlog_debug, mlog_warn, Error, Result};

pub type ProcessChild = RemoteChild<ProcessLauncher>;

/// Spawns worker subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    workspace_root: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workspace_root: workspace_root.into(),
        }
    }
}

impl Launcher for ProcessLauncher {
    fn kind(&self) -> &'static str {
        "process"
    }

    fn launch(&mut self, id: ChildId, logger: &Logger) -> Result<Link> {
        let mut process = Command::new(&self.program)
            .arg(&self.workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Transport(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;
        mlog_debug!("Child {} spawned worker pid={:?}", id, process.id());

        let mut stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("failed to capture worker stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("failed to capture worker stdout".to_string()))?;

        let (requests, mut outgoing) = mpsc::unbounded_channel::<Request>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(request) = outgoing.recv().await {
                if let Err(e) = wire::write_message(&mut stdin, &request).await {
                    mlog_warn!("Child {} failed to write request: {}", id, e);
                    break;
                }
            }
        });

        let logger = logger.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout);
            loop {
                match wire::read_message::<_, Response>(&mut lines).await {
                    Ok(Some(response)) => route(response, &logger, &inbound_tx),
                    Ok(None) => break,
                    Err(Error::Protocol(line)) => {
                        let _ = inbound_tx.send(Inbound::Invalid(line));
                    }
                    Err(e) => {
                        // The stream can no longer be framed; the worker is unusable.
                        mlog_warn!("Child {} failed to read worker output: {}", id, e);
                        let _ = inbound_tx.send(Inbound::Invalid(format!("unreadable worker output: {e}")));
                        if let Err(e) = process.start_kill() {
                            mlog_warn!("Child {} failed to kill worker: {}", id, e);
                        }
                        break;
                    }
                }
            }
            let cause = match process.wait().await {
                Ok(status) => describe_exit(&status),
                Err(e) => format!("could not be waited on ({e})"),
            };
            mlog_debug!("Child {} worker {}", id, cause);
            let _ = inbound_tx.send(Inbound::Closed(cause));
        });

        Ok(Link {
            requests,
            inbound,
            tasks: vec![writer, reader],
            cancel: None,
        })
    }
}

/// Creates process children for one workspace.
#[derive(Debug, Clone)]
pub struct ProcessChildFactory {
    launcher: ProcessLauncher,
    logger: Logger,
    one_shot: bool,
}

impl ProcessChildFactory {
    /// Children that keep their worker across requests.
    pub fn new(program: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>, logger: Logger) -> Self {
        Self {
            launcher: ProcessLauncher::new(program, workspace_root),
            logger,
            one_shot: false,
        }
    }

    /// Children that serve a single request each.
    pub fn one_shot(program: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>, logger: Logger) -> Self {
        Self {
            one_shot: true,
            ..Self::new(program, workspace_root, logger)
        }
    }
}

impl ChildFactory for ProcessChildFactory {
    fn create(&self) -> Box<dyn Child> {
        let launcher = self.launcher.clone();
        let logger = self.logger.clone();
        if self.one_shot {
            Box::new(ProcessChild::one_shot(launcher, logger))
        } else {
            Box::new(ProcessChild::new(launcher, logger))
        }
    }
}
