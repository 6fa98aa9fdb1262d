//! The worker side of the protocol.
//!
//! A worker owns a [`TargetRunner`] built from the workspace root it was
//! started with and serves requests one at a time. The same loop backs
//! worker threads (over channels) and the `marshal-worker` binary (over
//! stdin/stdout).

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{ExecutionResult, Options};
use crate::ipc::{wire, Request, Response};
use crate::log::{LogLevel, Logger};
use crate::runner::{RunnerFactory, TargetRunner};
use crate::{Error, Result};

/// A logger whose lines travel back to the orchestrator as `Logging`.
pub fn port_logger(responses: mpsc::UnboundedSender<Response>) -> Logger {
    Logger::from_fn(move |level, message| {
        let _ = responses.send(Response::Logging {
            level,
            message: message.to_string(),
        });
    })
}

/// Serve requests until the request port closes or `cancel` fires.
///
/// Each request produces its `Output`s followed by exactly one `Done`. A
/// runner error becomes a failed `Output`, since the protocol has no error
/// message of its own.
pub async fn serve(
    runner: Arc<dyn TargetRunner>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = handle(runner.as_ref(), request, &responses) => {}
        }
        if responses.send(Response::Done).is_err() {
            break;
        }
    }
}

async fn handle(runner: &dyn TargetRunner, request: Request, responses: &mpsc::UnboundedSender<Response>) {
    let logger = port_logger(responses.clone());
    let mut results = match request {
        Request::ScheduleTarget {
            target,
            extra_options,
        } => runner.run(target, extra_options.unwrap_or_else(Options::new), logger),
        Request::ScheduleBuilder {
            project,
            builder,
            options,
            target,
        } => runner.run_builder(project, builder, options, target, logger),
    };
    while let Some(item) = results.next().await {
        let (result, stop) = match item {
            Ok(result) => (result, false),
            Err(e) => (ExecutionResult::failure(e.to_string()), true),
        };
        if responses.send(Response::Output { result }).is_err() || stop {
            break;
        }
    }
}

/// Body of a worker thread: build a runtime and a runner, then serve.
pub fn run_thread(
    workspace_root: PathBuf,
    factory: Arc<dyn RunnerFactory>,
    requests: mpsc::UnboundedReceiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
    cancel: CancellationToken,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let runner = factory.create(&workspace_root)?;
    runtime.block_on(serve(runner, requests, responses, cancel));
    Ok(())
}

/// Serve over stdin/stdout until stdin closes.
pub async fn serve_stdio(runner: Arc<dyn TargetRunner>) -> Result<()> {
    serve_io(runner, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve requests read from `input`, writing responses to `output`.
///
/// A line that is not a request is reported back as an error log, then the
/// worker stops reading and fails with [`Error::Protocol`] once the requests
/// already accepted are answered. The orchestrator sees the worker exit and
/// treats it as a transport failure.
pub async fn serve_io<R, W>(runner: Arc<dyn TargetRunner>, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Response>();

    let log_port = response_tx.clone();
    let reader = tokio::spawn(async move {
        let mut input = BufReader::new(input);
        loop {
            match wire::read_message::<_, Request>(&mut input).await {
                Ok(Some(request)) => {
                    if request_tx.send(request).is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => return Ok(()),
                Err(Error::Protocol(line)) => {
                    let _ = log_port.send(Response::Logging {
                        level: LogLevel::Error,
                        message: line.clone(),
                    });
                    return Err(Error::Protocol(line));
                }
                Err(e) => return Err(e),
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(response) = response_rx.recv().await {
            wire::write_message(&mut output, &response).await?;
        }
        Ok::<_, Error>(())
    });

    // The request port closes only once the reader has stopped.
    serve(runner, request_rx, response_tx, CancellationToken::new()).await;
    let read = reader.await.map_err(|e| Error::TaskJoin(e.to_string()))?;
    writer.await.map_err(|e| Error::TaskJoin(e.to_string()))??;
    read
}
