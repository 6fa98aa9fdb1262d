//! Child-pool strategy: reuse a bounded set of children across leaves.
//!
//! The walk carries one "current" child. Serial children and leaves reuse it.
//! A parallel node builds a pool of `max_parallel` members: the current child
//! plus up to `max_parallel - 1` new ones. Members pull children of the node
//! from a shared queue. A new member creates its child when it takes its
//! first item and destroys it once the queue is empty; the current child
//! belongs to the caller and is never destroyed here.

use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture, FutureExt};

use super::scheduler::{drive_leaf, RunContext};
use super::slots::WorkQueue;
use crate::child::{execute_leaf, Child, ChildFactory, ChildGuard};
use crate::core::TargetNode;
use crate::{mlog_debug, Result};

#[derive(Clone)]
pub struct ChildPoolStrategy {
    factory: Arc<dyn ChildFactory>,
}

impl ChildPoolStrategy {
    pub fn new(factory: Arc<dyn ChildFactory>) -> Self {
        Self { factory }
    }

    fn create_child(&self) -> ChildGuard {
        let guard = ChildGuard::new(self.factory.create());
        mlog_debug!("Pool created child {}", guard.id());
        guard
    }

    /// Run a whole tree, on `child` if given, else on a child created and
    /// destroyed for this call.
    pub async fn run(&self, node: &TargetNode, child: Option<&mut dyn Child>, ctx: &RunContext) -> Result<()> {
        match child {
            Some(child) => self.walk(node, child, ctx).await,
            None => {
                let mut guard = self.create_child();
                let outcome = self.walk(node, guard.child_mut(), ctx).await;
                outcome
            }
        }
    }

    pub fn walk<'a>(
        &'a self,
        node: &'a TargetNode,
        child: &'a mut dyn Child,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            match node {
                TargetNode::Leaf(spec) => {
                    let results = execute_leaf(child, spec, ctx.extra_options());
                    drive_leaf(ctx, spec, results).await
                }
                TargetNode::Serial(children) => {
                    for node in children {
                        self.walk(node, &mut *child, ctx).await?;
                    }
                    Ok(())
                }
                TargetNode::Parallel {
                    children,
                    max_parallel,
                } => {
                    let pool_size = match max_parallel {
                        Some(bound) => bound.resolve()?,
                        None => children.len(),
                    };
                    self.run_pool(children, pool_size, child, ctx).await
                }
            }
        }
        .boxed()
    }

    async fn run_pool(
        &self,
        children: &[TargetNode],
        pool_size: usize,
        child: &mut dyn Child,
        ctx: &RunContext,
    ) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }
        // Members beyond the number of children would never take an item.
        let pool_size = pool_size.min(children.len());
        let queue = WorkQueue::new(children);
        let queue = &queue;
        mlog_debug!(
            "Parallel node: {} children, pool of {} around child {}",
            children.len(),
            pool_size,
            child.id()
        );

        let mut members: Vec<BoxFuture<'_, Result<()>>> = Vec::with_capacity(pool_size);
        members.push(
            async move {
                while let Some(node) = queue.pop() {
                    self.walk(node, &mut *child, ctx).await?;
                }
                Ok(())
            }
            .boxed(),
        );
        for _ in 1..pool_size {
            members.push(
                async move {
                    let mut own: Option<ChildGuard> = None;
                    while let Some(node) = queue.pop() {
                        let guard = own.get_or_insert_with(|| self.create_child());
                        self.walk(node, guard.child_mut(), ctx).await?;
                    }
                    Ok(())
                }
                .boxed(),
            );
        }

        try_join_all(members).await?;
        Ok(())
    }
}
