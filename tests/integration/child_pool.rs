//! Child lifecycle tests.
//!
//! Children come from a tracking factory over the scripted runner, so every
//! creation, destruction and leaf assignment is visible. These tests verify:
//! - Serial work reuses one child
//! - A bounded parallel node never uses more children than its bound
//! - Sibling branches get distinct children
//! - Every child created is destroyed, whether the run succeeds, fails or
//!   is dropped mid-flight

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};

use marshal::core::TargetNode;
use marshal::log::Logger;
use marshal::Scheduler;

use crate::fixtures::{leaves, ScriptedRunner, TrackedFactory};

fn pool() -> (Scheduler, TrackedFactory, ScriptedRunner) {
    let runner = ScriptedRunner::new();
    let factory = TrackedFactory::new(runner.clone());
    let scheduler = Scheduler::child_pool(Arc::new(factory.clone())).with_logger(Logger::discard());
    (scheduler, factory, runner)
}

/// Given a serial node of three leaves
/// When it runs on a child pool
/// Then a single child runs all three and is destroyed at the end
#[tokio::test]
async fn test_serial_reuses_one_child() {
    let (scheduler, factory, _) = pool();

    let results: Vec<_> = scheduler
        .run(TargetNode::serial(leaves(&["a", "b", "c"])))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.destroyed(), 1);
    assert_eq!(factory.distinct_children(), 1);
}

/// Given a parallel node of five leaves bounded to two
/// When it runs on a child pool
/// Then at most two children serve all five leaves
#[tokio::test]
async fn test_bounded_parallel_caps_children() {
    let (scheduler, factory, runner) = pool();

    let results: Vec<_> = scheduler
        .run(TargetNode::bounded(leaves(&["a", "b", "c", "d", "e"]), 2usize))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(runner.peak(), 2);
    assert!(factory.distinct_children() <= 2);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.destroyed(), factory.created());
}

/// Given two serial branches under an unbounded parallel node
/// When it runs on a child pool
/// Then each branch keeps its own child
#[tokio::test]
async fn test_sibling_branches_get_distinct_children() {
    let (scheduler, factory, _) = pool();

    let tree = TargetNode::parallel(vec![
        TargetNode::serial(leaves(&["a1", "a2"])),
        TargetNode::serial(leaves(&["b1", "b2"])),
    ]);
    let results: Vec<_> = scheduler.run(tree).try_collect().await.unwrap();
    assert_eq!(results.len(), 4);

    assert_eq!(factory.child_of("a1"), factory.child_of("a2"));
    assert_eq!(factory.child_of("b1"), factory.child_of("b2"));
    assert_ne!(factory.child_of("a1"), factory.child_of("b1"));
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.destroyed(), 2);
}

/// Given a parallel node bounded to one
/// When it runs on a child pool
/// Then no extra child is created
#[tokio::test]
async fn test_bound_of_one_stays_on_current_child() {
    let (scheduler, factory, runner) = pool();

    let results: Vec<_> = scheduler
        .run(TargetNode::bounded(leaves(&["a", "b", "c"]), 1usize))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(runner.peak(), 1);
    assert_eq!(factory.created(), 1);
}

/// Given a parallel run of leaves that never finish
/// When the consumer gives up and drops the stream
/// Then every child that was created gets destroyed
#[tokio::test]
async fn test_dropping_run_destroys_children() {
    let (scheduler, factory, runner) = pool();

    let mut stream = scheduler.run(TargetNode::parallel(leaves(&["hang-a", "hang-b", "hang-c"])));
    let first = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
    assert!(first.is_err(), "hanging leaves should not produce results");
    assert_eq!(runner.started().len(), 3);
    assert_eq!(factory.created(), 3);
    assert_eq!(factory.destroyed(), 0);

    drop(stream);

    assert_eq!(factory.destroyed(), 3);
    assert!(runner.finished().is_empty());
}

/// Given a parallel node where one leaf fails and the rest hang
/// When the failure ends the run
/// Then every child is destroyed before the stream finishes
#[tokio::test]
async fn test_failure_destroys_all_children() {
    let (scheduler, factory, _) = pool();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        scheduler
            .run(TargetNode::parallel(leaves(&["hang-a", "fail-b", "hang-c"])))
            .try_collect::<Vec<_>>(),
    )
    .await
    .expect("run should end once a leaf fails")
    .unwrap_err();

    assert_eq!(err.to_string(), "fail-b failed");
    assert_eq!(factory.created(), 3);
    assert_eq!(factory.destroyed(), 3);
}

/// Given a respawn scheduler
/// When it runs three serial leaves
/// Then each leaf gets a fresh child that is destroyed right after
#[tokio::test]
async fn test_respawn_uses_one_child_per_leaf() {
    let runner = ScriptedRunner::new();
    let factory = TrackedFactory::new(runner.clone());
    let scheduler = Scheduler::respawn(Arc::new(factory.clone())).with_logger(Logger::discard());

    let results: Vec<_> = scheduler
        .run(TargetNode::serial(leaves(&["a", "b", "c"])))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(factory.created(), 3);
    assert_eq!(factory.destroyed(), 3);
    assert_eq!(factory.distinct_children(), 3);
}

/// Given a parallel node of two leaves with a bound far above its size
/// When it runs on a child pool
/// Then the pool is sized by the children and both leaves still run at once
#[tokio::test]
async fn test_huge_bound_is_capped_by_children() {
    let (scheduler, factory, runner) = pool();

    let results: Vec<_> = scheduler
        .run(TargetNode::bounded(leaves(&["a", "b"]), "100000000000000000000"))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(runner.peak(), 2);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.destroyed(), 2);
}
