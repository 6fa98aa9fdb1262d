//! Messages exchanged between the orchestrator and a worker.
//!
//! Every message carries a `type` discriminator. The orchestrator sends one
//! [`Request`] at a time; the worker answers with any number of `Logging`
//! and `Output` responses followed by exactly one `Done`.

use serde::{Deserialize, Serialize};

use crate::core::{ExecutionResult, Options, TargetSpec};
use crate::log::LogLevel;

/// Orchestrator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Run a target through the worker's runner.
    #[serde(rename_all = "camelCase")]
    ScheduleTarget {
        target: TargetSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra_options: Option<Options>,
    },
    /// Run a builder for a project as a transient target.
    #[serde(rename_all = "camelCase")]
    ScheduleBuilder {
        project: String,
        builder: String,
        #[serde(default)]
        options: Options,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
}

/// Worker to orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// A log line to replay verbatim on the orchestrator side.
    Logging { level: LogLevel, message: String },
    /// One item of the invocation's result stream.
    Output { result: ExecutionResult },
    /// The current request is finished.
    Done,
}
