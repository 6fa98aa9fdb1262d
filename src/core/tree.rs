//! Target tree data model.
//!
//! A run is described by a tree of [`TargetNode`]s: leaves are single target
//! invocations, `Serial` nodes run their children one after another and
//! `Parallel` nodes run them together, optionally bounded by a
//! [`MaxParallel`] expression. Trees are built once from configuration and
//! never mutated while they are scheduled.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::expr;
use crate::error::{Error, Result};

/// Free-form options passed through to a target invocation.
pub type Options = serde_json::Map<String, serde_json::Value>;

/// What a leaf runs.
///
/// Serialized untagged: a bare string is a specifier, a table with a
/// `builder` key is a transient invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetSpec {
    /// An opaque specifier such as `app:build`, resolved by the target runner.
    StringSpecifier(String),
    /// A self-described invocation that is not backed by stored configuration.
    Transient {
        /// The builder (program) to invoke.
        builder: String,
        /// Project the builder runs for, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project: Option<String>,
        /// Options handed to the builder.
        #[serde(default)]
        options: Options,
    },
}

impl TargetSpec {
    /// Create a specifier leaf spec.
    pub fn specifier(spec: impl Into<String>) -> Self {
        Self::StringSpecifier(spec.into())
    }

    /// Create a transient spec with no project and no options.
    pub fn transient(builder: impl Into<String>) -> Self {
        Self::Transient {
            builder: builder.into(),
            project: None,
            options: Options::new(),
        }
    }

    /// Set the project of a transient spec. No-op for specifiers.
    pub fn with_project(mut self, name: impl Into<String>) -> Self {
        if let Self::Transient { project, .. } = &mut self {
            *project = Some(name.into());
        }
        self
    }

    /// Add an option to a transient spec. No-op for specifiers.
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if let Self::Transient { options, .. } = &mut self {
            options.insert(key.into(), value);
        }
        self
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSpec::StringSpecifier(spec) => write!(f, "{}", spec),
            TargetSpec::Transient {
                builder,
                project: Some(project),
                ..
            } => write!(f, "{}:{}", project, builder),
            TargetSpec::Transient { builder, .. } => write!(f, "{}", builder),
        }
    }
}

impl From<&str> for TargetSpec {
    fn from(spec: &str) -> Self {
        Self::specifier(spec)
    }
}

/// Upper bound on concurrently running children of a parallel node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxParallel {
    /// A literal bound.
    Count(f64),
    /// An expression such as `cpuCount / 2`, evaluated when the node starts.
    Expr(String),
}

impl MaxParallel {
    /// Evaluate the bound to a slot count.
    ///
    /// Fractional results are floored. Anything that is not finite or ends
    /// up below one is rejected.
    pub fn resolve(&self) -> Result<usize> {
        let (value, source_text) = match self {
            MaxParallel::Count(n) => (*n, n.to_string()),
            MaxParallel::Expr(text) => (expr::evaluate(text)?, text.clone()),
        };
        let floored = value.floor();
        if !floored.is_finite() || floored < 1.0 {
            return Err(Error::InvalidBound { value, source_text });
        }
        Ok(floored as usize)
    }
}

impl From<&str> for MaxParallel {
    fn from(text: &str) -> Self {
        Self::Expr(text.to_string())
    }
}

impl From<String> for MaxParallel {
    fn from(text: String) -> Self {
        Self::Expr(text)
    }
}

impl From<usize> for MaxParallel {
    fn from(n: usize) -> Self {
        Self::Count(n as f64)
    }
}

/// A node of the target tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetNode {
    /// A single target invocation.
    Leaf(TargetSpec),
    /// Children run one after another; the first failure stops the chain.
    Serial(Vec<TargetNode>),
    /// Children run together, at most `max_parallel` at a time when set.
    Parallel {
        children: Vec<TargetNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_parallel: Option<MaxParallel>,
    },
}

impl TargetNode {
    pub fn leaf(spec: impl Into<TargetSpec>) -> Self {
        Self::Leaf(spec.into())
    }

    pub fn serial(children: Vec<TargetNode>) -> Self {
        Self::Serial(children)
    }

    /// An unbounded parallel node.
    pub fn parallel(children: Vec<TargetNode>) -> Self {
        Self::Parallel {
            children,
            max_parallel: None,
        }
    }

    /// A parallel node with a concurrency bound.
    pub fn bounded(children: Vec<TargetNode>, max_parallel: impl Into<MaxParallel>) -> Self {
        Self::Parallel {
            children,
            max_parallel: Some(max_parallel.into()),
        }
    }

    /// Number of leaves under this node, used to size progress reporting.
    pub fn count_leaves(&self) -> usize {
        count_leaves(self)
    }
}

/// Count the leaves of a tree: 1 per leaf, summed through every composite.
pub fn count_leaves(node: &TargetNode) -> usize {
    match node {
        TargetNode::Leaf(_) => 1,
        TargetNode::Serial(children) | TargetNode::Parallel { children, .. } => {
            children.iter().map(count_leaves).sum()
        }
    }
}
