//! Leaf outcomes and scheduler selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Outcome of one leaf invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    /// Turn a failed result into an execution error.
    ///
    /// `label` names the leaf and is used when the result carries no message.
    pub fn into_result(self, label: &str) -> crate::Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(Error::Execution(
            self.error
                .unwrap_or_else(|| format!("Target {} failed", label)),
        ))
    }
}

/// Isolation strategy for a run. Chosen once and fixed for its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// Leaves run inside the orchestrator process.
    #[default]
    InProcess,
    /// Reusable subprocess pool.
    Spawn,
    /// Reusable worker-thread pool.
    Worker,
    /// A fresh subprocess per leaf.
    Respawn,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::InProcess => "in-process",
            SchedulerKind::Spawn => "spawn",
            SchedulerKind::Worker => "worker",
            SchedulerKind::Respawn => "respawn",
        }
    }

    /// Whether this kind schedules through a pool of reusable children.
    pub fn uses_child_pool(&self) -> bool {
        matches!(self, SchedulerKind::Spawn | SchedulerKind::Worker)
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SchedulerKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in-process" | "inprocess" => Ok(SchedulerKind::InProcess),
            "spawn" => Ok(SchedulerKind::Spawn),
            "worker" => Ok(SchedulerKind::Worker),
            "respawn" => Ok(SchedulerKind::Respawn),
            other => Err(Error::Validation(format!(
                "Unknown scheduler '{}': expected in-process, spawn, worker or respawn",
                other
            ))),
        }
    }
}
