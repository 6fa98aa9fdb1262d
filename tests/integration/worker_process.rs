//! Tests against real workers.
//!
//! Targets are shell commands declared in a temporary `marshal.toml`. The
//! spawn and respawn schedulers talk to the `marshal-worker` binary built for
//! this test run; the worker scheduler uses threads. These tests verify:
//! - Every isolated scheduler kind runs a tree to completion
//! - Exit codes surface as failures and stop the run
//! - A worker that dies is reported as a transport failure
//! - Worker output is forwarded to the orchestrator's logger

use std::sync::Arc;

use futures::TryStreamExt;
use serde_json::json;

use marshal::child::ProcessChildFactory;
use marshal::core::{Options, TargetNode};
use marshal::log::Logger;
use marshal::{ExecutionResult, Scheduler, SchedulerKind, Workspace};

use crate::fixtures::{capture_logger, leaf, leaves, worker_binary, TestWorkspace};

const TARGETS: &[(&str, &str)] = &[
    ("ok", "true"),
    ("bad", "exit 4"),
    ("echo", "echo hello"),
    ("flags", "printf '%s\\n'"),
];

fn scheduler_for(kind: SchedulerKind, workspace: &TestWorkspace) -> Scheduler {
    let workspace = Workspace::open(workspace.path()).expect("Failed to open workspace");
    Scheduler::for_kind(kind, &workspace, Logger::discard()).expect("Failed to build scheduler")
}

async fn run_ok(kind: SchedulerKind) {
    let workspace = TestWorkspace::new(TARGETS);
    let scheduler = scheduler_for(kind, &workspace);

    let tree = TargetNode::serial(vec![
        leaf("ok"),
        TargetNode::bounded(leaves(&["echo", "ok", "echo"]), 2usize),
    ]);
    let results: Vec<_> = scheduler.run(tree).try_collect().await.unwrap();

    assert_eq!(results, vec![ExecutionResult::success(); 4], "{kind} run");
}

/// Given a workspace with shell targets
/// When a tree runs on reusable worker subprocesses
/// Then every leaf succeeds
#[tokio::test]
async fn test_spawn_runs_tree() {
    run_ok(SchedulerKind::Spawn).await;
}

/// Given a workspace with shell targets
/// When a tree runs with one worker subprocess per leaf
/// Then every leaf succeeds
#[tokio::test]
async fn test_respawn_runs_tree() {
    run_ok(SchedulerKind::Respawn).await;
}

/// Given a workspace with shell targets
/// When a tree runs on worker threads
/// Then every leaf succeeds
#[tokio::test]
async fn test_worker_threads_run_tree() {
    run_ok(SchedulerKind::Worker).await;
}

/// Given a target that exits with code 4
/// When it runs inside a worker subprocess
/// Then the run fails with the exit code and later leaves never run
#[tokio::test]
async fn test_exit_code_fails_the_run() {
    let workspace = TestWorkspace::new(TARGETS);
    let scheduler = scheduler_for(SchedulerKind::Spawn, &workspace);

    let mut stream = scheduler.run(TargetNode::serial(leaves(&["ok", "bad", "ok"])));
    let mut results = Vec::new();
    let err = loop {
        match stream.try_next().await {
            Ok(Some(result)) => results.push(result),
            Ok(None) => panic!("run should fail"),
            Err(e) => break e,
        }
    };

    assert_eq!(results.len(), 1);
    assert!(err.to_string().contains("exited with code 4"), "got: {err}");
    assert!(!err.is_transport());
    assert_eq!(stream.completed(), 2);
}

/// Given a worker program that exits immediately
/// When a leaf is sent to it
/// Then the run fails with a transport error
#[tokio::test]
async fn test_dead_worker_is_a_transport_failure() {
    let workspace = TestWorkspace::new(TARGETS);
    let mut opened = Workspace::open(workspace.path()).unwrap();
    opened.config.worker_program = Some("false".to_string());
    let scheduler = Scheduler::for_kind(SchedulerKind::Spawn, &opened, Logger::discard()).unwrap();

    let err = scheduler
        .run(leaf("ok"))
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();

    assert!(err.is_transport(), "expected transport error, got: {err}");
}

/// Given a target that prints to stdout
/// When it runs inside a worker subprocess
/// Then its output arrives at the orchestrator's logger
#[tokio::test]
async fn test_worker_output_is_forwarded() {
    let workspace = TestWorkspace::new(TARGETS);
    let (logger, lines) = capture_logger();
    let factory = ProcessChildFactory::new(worker_binary(), workspace.path(), logger);
    let scheduler = Scheduler::child_pool(Arc::new(factory)).with_logger(Logger::discard());

    let results: Vec<_> = scheduler.run(leaf("echo")).try_collect().await.unwrap();
    assert_eq!(results.len(), 1);

    let lines = lines.lock().unwrap();
    assert!(
        lines.iter().any(|line| line.ends_with("hello")),
        "missing forwarded output in {lines:?}"
    );
}

/// Given a scheduler built for a worker kind with a capturing logger
/// When a printing target runs on a subprocess and on a thread
/// Then the worker's output reaches that logger
#[tokio::test]
async fn test_for_kind_logger_reaches_children() {
    for kind in [SchedulerKind::Spawn, SchedulerKind::Worker] {
        let workspace = TestWorkspace::new(TARGETS);
        let opened = Workspace::open(workspace.path()).unwrap();
        let (logger, lines) = capture_logger();
        let scheduler = Scheduler::for_kind(kind, &opened, logger).unwrap();

        let results: Vec<_> = scheduler.run(leaf("echo")).try_collect().await.unwrap();
        assert_eq!(results.len(), 1);

        let lines = lines.lock().unwrap();
        assert!(
            lines.iter().any(|line| line.ends_with("hello")),
            "{kind}: missing forwarded output in {lines:?}"
        );
    }
}

/// Given extra options on the scheduler
/// When a target runs inside a worker subprocess
/// Then the options reach the command as flags
#[tokio::test]
async fn test_extra_options_cross_the_process_boundary() {
    let workspace = TestWorkspace::new(TARGETS);
    let (logger, lines) = capture_logger();
    let factory = ProcessChildFactory::new(worker_binary(), workspace.path(), logger);
    let mut extra = Options::new();
    extra.insert("release".into(), json!(true));
    let scheduler = Scheduler::child_pool(Arc::new(factory))
        .with_logger(Logger::discard())
        .with_extra_options(extra);

    let results: Vec<_> = scheduler.run(leaf("flags")).try_collect().await.unwrap();
    assert_eq!(results.len(), 1);

    let lines = lines.lock().unwrap();
    assert!(
        lines.iter().any(|line| line.ends_with("--release")),
        "missing flag in {lines:?}"
    );
}

/// Given a running worker whose stdin stays open
/// When it receives a request type it does not know
/// Then it reports the line as an error log and exits non-zero on its own
#[tokio::test]
async fn test_worker_exits_on_unknown_request() {
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let workspace = TestWorkspace::new(TARGETS);
    let mut worker = tokio::process::Command::new(worker_binary())
        .arg(workspace.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to start worker");
    let mut stdin = worker.stdin.take().unwrap();
    let mut stdout = worker.stdout.take().unwrap();

    stdin
        .write_all(b"{\"type\":\"ScheduleSomething\",\"target\":\"x\"}\n")
        .await
        .unwrap();
    stdin.flush().await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), worker.wait())
        .await
        .expect("worker should exit without waiting for stdin to close")
        .unwrap();
    assert_eq!(status.code(), Some(1));

    let mut output = String::new();
    stdout.read_to_string(&mut output).await.unwrap();
    assert!(output.contains("\"type\":\"Logging\""), "got: {output}");
    assert!(output.contains("ScheduleSomething"), "got: {output}");
    drop(stdin);
}
