//! Runs targets as shell commands described in `marshal.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::{ResultStream, RunnerFactory, TargetRunner};
use crate::config::Config;
use crate::core::{ExecutionResult, Options, TargetSpec};
use crate::log::{LogLevel, Logger};
use crate::util::describe_exit;
use crate::{Error, Result};

/// A resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub label: String,
}

impl Invocation {
    fn shell(command: String, cwd: PathBuf, label: String) -> Self {
        Self {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), command],
            cwd,
            label,
        }
    }
}

pub struct CommandRunner {
    root: PathBuf,
    targets: BTreeMap<String, String>,
}

impl CommandRunner {
    pub fn new(root: impl Into<PathBuf>, targets: BTreeMap<String, String>) -> Self {
        Self {
            root: root.into(),
            targets,
        }
    }

    /// Build a runner from the workspace's `marshal.toml`.
    pub fn load(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        Ok(Self::new(root, config.targets))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a spec to the command that runs it.
    ///
    /// A specifier is looked up in the targets table. `project:target` falls
    /// back to `target` run inside `<root>/<project>`. A transient spec runs
    /// its builder with options rendered as `--key=value` flags.
    pub fn invocation(&self, spec: &TargetSpec, extra: &Options) -> Result<Invocation> {
        match spec {
            TargetSpec::StringSpecifier(name) => {
                let flags = shell_flags(extra);
                if let Some(command) = self.targets.get(name) {
                    return Ok(Invocation::shell(
                        with_flags(command, &flags),
                        self.root.clone(),
                        name.clone(),
                    ));
                }
                if let Some((project, target)) = name.split_once(':') {
                    if let Some(command) = self.targets.get(target) {
                        return Ok(Invocation::shell(
                            with_flags(command, &flags),
                            self.root.join(project),
                            name.clone(),
                        ));
                    }
                }
                Err(Error::UnknownTarget(name.clone()))
            }
            TargetSpec::Transient {
                builder,
                project,
                options,
            } => {
                let program = which::which_in(builder, std::env::var_os("PATH"), &self.root)
                    .map_err(|e| Error::Validation(format!("Builder '{builder}' not found: {e}")))?;
                let mut args = option_args(options);
                args.extend(option_args(extra));
                let cwd = match project {
                    Some(project) => self.root.join(project),
                    None => self.root.clone(),
                };
                Ok(Invocation {
                    program,
                    args,
                    cwd,
                    label: spec.to_string(),
                })
            }
        }
    }

    async fn execute(&self, spec: TargetSpec, extra: Options, logger: Logger) -> Result<ExecutionResult> {
        let invocation = match self.invocation(&spec, &extra) {
            Ok(invocation) => invocation,
            Err(e) => return Ok(ExecutionResult::failure(e.to_string())),
        };
        logger.debug(&format!(
            "Running {}: {} {:?} in {}",
            invocation.label,
            invocation.program.display(),
            invocation.args,
            invocation.cwd.display()
        ));

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let label = invocation.label.as_str();
        let (status, _, _) = tokio::join!(
            child.wait(),
            forward_lines(stdout, &logger, LogLevel::Info, label),
            forward_lines(stderr, &logger, LogLevel::Warn, label),
        );
        let status = status?;

        if status.success() {
            logger.info(&format!("{label} succeeded"));
            Ok(ExecutionResult::success())
        } else {
            Ok(ExecutionResult::failure(format!(
                "{label} {}",
                describe_exit(&status)
            )))
        }
    }
}

impl TargetRunner for CommandRunner {
    fn run(&self, spec: TargetSpec, extra: Options, logger: Logger) -> ResultStream<'_> {
        futures::stream::once(self.execute(spec, extra, logger)).boxed()
    }
}

/// Builds a [`CommandRunner`] from the workspace's `marshal.toml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunnerFactory;

impl RunnerFactory for CommandRunnerFactory {
    fn create(&self, workspace_root: &Path) -> Result<Arc<dyn TargetRunner>> {
        Ok(Arc::new(CommandRunner::load(workspace_root)?))
    }
}

async fn forward_lines<R>(reader: Option<R>, logger: &Logger, level: LogLevel, label: &str)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        logger.log(level, &format!("[{label}] {line}"));
    }
}

/// Render options as command-line flags.
///
/// `true` becomes a bare `--key`, arrays repeat the flag per element and
/// nulls are dropped.
pub fn option_args(options: &Options) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in options {
        match value {
            Value::Null => {}
            Value::Bool(true) => args.push(format!("--{key}")),
            Value::Array(items) => {
                for item in items {
                    args.push(format!("--{key}={}", scalar(item)));
                }
            }
            other => args.push(format!("--{key}={}", scalar(other))),
        }
    }
    args
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn shell_flags(options: &Options) -> Vec<String> {
    option_args(options).iter().map(|a| shell_quote(a)).collect()
}

fn with_flags(command: &str, flags: &[String]) -> String {
    if flags.is_empty() {
        command.to_string()
    } else {
        format!("{command} {}", flags.join(" "))
    }
}

fn shell_quote(arg: &str) -> String {
    if arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
