use thiserror::Error;

use crate::child::ChildId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    /// A leaf ran and reported failure.
    #[error("{0}")]
    Execution(String),

    /// The worker process or thread went away before finishing a request.
    #[error("Worker transport failure: {0}")]
    Transport(String),

    /// The worker sent something that is not a protocol message.
    #[error("Worker protocol failure: {0}")]
    Protocol(String),

    #[error("Child {id} is busy: a request is already in flight")]
    ChildBusy { id: ChildId },

    #[error("Child {id} has been destroyed")]
    ChildDestroyed { id: ChildId },

    #[error("Child {id} is one-shot and has already run a request")]
    OneShotReused { id: ChildId },

    #[error("{message} at offset {offset}: {rendered}")]
    Expression {
        message: String,
        offset: usize,
        rendered: String,
    },

    #[error("Invalid parallel bound {value} from {source_text:?}")]
    InvalidBound { value: f64, source_text: String },

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Worker executable not found: {0}")]
    WorkerNotFound(String),
}

impl Error {
    /// Whether the error came from the worker boundary rather than the target.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
