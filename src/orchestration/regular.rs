//! Regular strategy: walk the tree and run each leaf on its own.
//!
//! Leaves either go straight to the in-process runner or to a fresh one-shot
//! child that is destroyed as soon as the leaf finishes.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::scheduler::{drive_leaf, RunContext};
use super::slots::run_slots;
use crate::child::{execute_leaf, ChildFactory, ChildGuard};
use crate::core::{TargetNode, TargetSpec};
use crate::runner::TargetRunner;
use crate::{mlog_debug, Result};

/// Where a regular strategy sends its leaves.
#[derive(Clone)]
pub enum LeafBackend {
    InProcess(Arc<dyn TargetRunner>),
    /// A fresh child per leaf.
    Respawn(Arc<dyn ChildFactory>),
}

#[derive(Clone)]
pub struct RegularStrategy {
    backend: LeafBackend,
}

impl RegularStrategy {
    pub fn new(backend: LeafBackend) -> Self {
        Self { backend }
    }

    pub fn walk<'a>(&'a self, node: &'a TargetNode, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        async move {
            match node {
                TargetNode::Leaf(spec) => self.run_single_target(spec, ctx).await,
                TargetNode::Serial(children) => {
                    for child in children {
                        self.walk(child, ctx).await?;
                    }
                    Ok(())
                }
                TargetNode::Parallel {
                    children,
                    max_parallel,
                } => {
                    let slots = match max_parallel {
                        Some(bound) => bound.resolve()?,
                        None => children.len(),
                    };
                    mlog_debug!("Parallel node: {} children, {} slots", children.len(), slots);
                    run_slots(children, slots, |child| self.walk(child, ctx)).await
                }
            }
        }
        .boxed()
    }

    async fn run_single_target(&self, spec: &TargetSpec, ctx: &RunContext) -> Result<()> {
        match &self.backend {
            LeafBackend::InProcess(runner) => {
                let results = runner.run(spec.clone(), ctx.extra_options().clone(), ctx.logger().clone());
                drive_leaf(ctx, spec, results).await
            }
            LeafBackend::Respawn(factory) => {
                let mut guard = ChildGuard::new(factory.create());
                mlog_debug!("Leaf {} runs on one-shot child {}", spec, guard.id());
                let results = execute_leaf(guard.child_mut(), spec, ctx.extra_options());
                // The guard must outlive the stream borrowing its child.
                let outcome = drive_leaf(ctx, spec, results).await;
                outcome
            }
        }
    }
}
