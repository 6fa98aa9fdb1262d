use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::SchedulerKind;
use crate::{mlog_debug, Error, Result};

pub const CONFIG_FILE: &str = "marshal.toml";
pub const WORKER_BINARY: &str = "marshal-worker";

/// Workspace configuration, read from `marshal.toml` at the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Default scheduler when `--scheduler` is not given.
    pub scheduler: Option<SchedulerKind>,
    /// Path to the worker executable for `spawn` and `respawn`.
    pub worker_program: Option<String>,
    /// Named targets: specifier -> shell command.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

impl Config {
    pub fn marshal_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".marshal"))
    }

    pub fn config_path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(CONFIG_FILE)
    }

    pub fn effective_scheduler(&self) -> SchedulerKind {
        self.scheduler.unwrap_or_default()
    }

    /// Locate the worker executable.
    ///
    /// Tries the configured path, then a `marshal-worker` next to the running
    /// executable, then `PATH`.
    pub fn worker_program(&self) -> Result<PathBuf> {
        if let Some(program) = &self.worker_program {
            return Ok(expand_tilde(program));
        }
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let sibling = dir.join(WORKER_BINARY);
                if sibling.is_file() {
                    return Ok(sibling);
                }
            }
        }
        which::which(WORKER_BINARY).map_err(|e| Error::WorkerNotFound(format!("{WORKER_BINARY}: {e}")))
    }

    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = Self::config_path(workspace_root);
        mlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        mlog_debug!(
            "Config loaded: scheduler={:?}, worker_program={:?}, targets={}",
            config.scheduler,
            config.worker_program,
            config.targets.len()
        );
        Ok(config)
    }

    pub fn save(&self, workspace_root: &Path) -> Result<()> {
        if !workspace_root.exists() {
            mlog_debug!("Creating workspace directory: {}", workspace_root.display());
            fs::create_dir_all(workspace_root)?;
        }
        let path = Self::config_path(workspace_root);
        fs::write(&path, toml::to_string_pretty(self)?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
