//! The request loop shared by subprocess and thread children.
//!
//! A [`Launcher`] starts the worker and returns a [`Link`]: a request port,
//! an event port, and the background tasks that pump them. `Logging`
//! responses are replayed by the pump as soon as they arrive, so they keep
//! flowing even when no request stream is being polled. Everything else is
//! delivered to [`RemoteChild`] as an [`Inbound`] event.

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Child, ChildId};
use crate::core::{ExecutionResult, Options, TargetSpec};
use crate::ipc::{Exchange, Request, Response, Step};
use crate::log::Logger;
use crate::runner::ResultStream;
use crate::{mlog, mlog_debug, Error, Result};

/// Event delivered from a worker's pump task.
#[derive(Debug)]
pub enum Inbound {
    Response(Response),
    /// A line that did not parse as a protocol message.
    Invalid(String),
    /// The worker is gone. Carries a description of how it ended.
    Closed(String),
}

/// A live connection to a started worker.
///
/// Dropping the link stops its pump tasks and cancels its token, which is
/// how workers are torn down.
pub struct Link {
    pub requests: mpsc::UnboundedSender<Request>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
    pub tasks: Vec<JoinHandle<()>>,
    pub cancel: Option<CancellationToken>,
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Starts a worker.
pub trait Launcher: Send {
    /// Short name used in log lines, e.g. `process`.
    fn kind(&self) -> &'static str;

    /// Start the worker. Called from inside a tokio runtime.
    fn launch(&mut self, id: ChildId, logger: &Logger) -> Result<Link>;
}

/// A child whose work happens behind a message port.
pub struct RemoteChild<L: Launcher> {
    id: ChildId,
    launcher: L,
    link: Option<Link>,
    exchange: Exchange,
    logger: Logger,
}

impl<L: Launcher> RemoteChild<L> {
    pub fn new(launcher: L, logger: Logger) -> Self {
        let id = ChildId::new();
        Self {
            id,
            launcher,
            link: None,
            exchange: Exchange::new(id),
            logger,
        }
    }

    /// A child that serves exactly one request.
    pub fn one_shot(launcher: L, logger: Logger) -> Self {
        let id = ChildId::new();
        Self {
            id,
            launcher,
            link: None,
            exchange: Exchange::one_shot(id),
            logger,
        }
    }

    /// Whether the worker has been started and not torn down.
    pub fn is_started(&self) -> bool {
        self.link.is_some()
    }

    fn start(&mut self, request: Request) -> Result<()> {
        self.exchange.begin()?;
        if self.link.is_none() {
            mlog!("Starting {} worker for child {}", self.launcher.kind(), self.id);
            match self.launcher.launch(self.id, &self.logger) {
                Ok(link) => self.link = Some(link),
                Err(err) => return Err(self.exchange.fail(err)),
            }
        }
        let sent = match &self.link {
            Some(link) => link.requests.send(request).is_ok(),
            None => false,
        };
        if !sent {
            let err = Error::Transport(format!("worker for child {} is not accepting requests", self.id));
            return Err(self.exchange.fail(err));
        }
        Ok(())
    }

    /// Wait for the next result of the request in flight. `None` after `Done`.
    async fn next_output(&mut self) -> Result<Option<ExecutionResult>> {
        loop {
            let event = match self.link.as_mut() {
                Some(link) => link.inbound.recv().await,
                None => return Err(Error::ChildDestroyed { id: self.id }),
            };
            match event {
                Some(Inbound::Response(response)) => match self.exchange.receive(response) {
                    Ok(Step::Output(result)) => return Ok(Some(result)),
                    Ok(Step::Done) => return Ok(None),
                    Ok(Step::Log { level, message }) => self.logger.log(level, &message),
                    Err(err) => return Err(self.exchange.fail(err)),
                },
                Some(Inbound::Invalid(line)) => {
                    return Err(self.exchange.fail(Error::Protocol(line)));
                }
                Some(Inbound::Closed(cause)) => {
                    let err = Error::Transport(format!(
                        "{} worker for child {} {} before finishing the request",
                        self.launcher.kind(),
                        self.id,
                        cause
                    ));
                    return Err(self.exchange.fail(err));
                }
                None => {
                    let err = Error::Transport(format!("lost connection to child {}", self.id));
                    return Err(self.exchange.fail(err));
                }
            }
        }
    }

    fn request(&mut self, request: Request) -> ResultStream<'_> {
        if let Err(err) = self.start(request) {
            return stream::once(async move { Err(err) }).boxed();
        }
        stream::try_unfold(self, |this| async move {
            Ok(this.next_output().await?.map(|result| (result, this)))
        })
        .boxed()
    }
}

impl<L: Launcher> Child for RemoteChild<L> {
    fn id(&self) -> ChildId {
        self.id
    }

    fn execute_target(&mut self, spec: TargetSpec, extra: Options) -> ResultStream<'_> {
        let extra_options = if extra.is_empty() { None } else { Some(extra) };
        self.request(Request::ScheduleTarget {
            target: spec,
            extra_options,
        })
    }

    fn execute_builder(
        &mut self,
        project: String,
        builder: String,
        options: Options,
        target: Option<String>,
    ) -> ResultStream<'_> {
        self.request(Request::ScheduleBuilder {
            project,
            builder,
            options,
            target,
        })
    }

    fn destroy(&mut self) {
        if self.exchange.close() {
            let started = self.link.take().is_some();
            mlog_debug!(
                "Destroyed {} child {} (worker started: {})",
                self.launcher.kind(),
                self.id,
                started
            );
        }
    }
}

impl<L: Launcher> Drop for RemoteChild<L> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Replay `Logging` responses and forward everything else as [`Inbound`].
pub(crate) fn route(response: Response, logger: &Logger, inbound: &mpsc::UnboundedSender<Inbound>) {
    match response {
        Response::Logging { level, message } => logger.log(level, &message),
        other => {
            let _ = inbound.send(Inbound::Response(other));
        }
    }
}
