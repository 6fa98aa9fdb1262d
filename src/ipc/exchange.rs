//! Request/response bookkeeping for one child.
//!
//! A child accepts one request at a time. The [`Exchange`] tracks where the
//! conversation is and turns out-of-order traffic into errors:
//!
//! ```text
//! Idle --begin--> Busy --Done--> Idle
//!                  |
//!                  +--transport/protocol failure--> Poisoned
//! any --close--> Closed
//! ```
//!
//! `Logging` is accepted in every state because logs may keep arriving after
//! the orchestrator stopped caring about a request.

use crate::child::ChildId;
use crate::core::ExecutionResult;
use crate::error::{Error, Result};
use crate::ipc::Response;
use crate::log::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Busy,
    Poisoned,
    Closed,
}

/// What a response means for the request in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Log { level: LogLevel, message: String },
    Output(ExecutionResult),
    Done,
}

#[derive(Debug)]
pub struct Exchange {
    id: ChildId,
    state: ExchangeState,
    one_shot: bool,
    served: usize,
}

impl Exchange {
    pub fn new(id: ChildId) -> Self {
        Self {
            id,
            state: ExchangeState::Idle,
            one_shot: false,
            served: 0,
        }
    }

    /// An exchange that accepts a single request in its lifetime.
    pub fn one_shot(id: ChildId) -> Self {
        Self {
            one_shot: true,
            ..Self::new(id)
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Number of requests started so far.
    pub fn served(&self) -> usize {
        self.served
    }

    /// Start a request.
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            ExchangeState::Idle if self.one_shot && self.served > 0 => {
                Err(Error::OneShotReused { id: self.id })
            }
            ExchangeState::Idle => {
                self.state = ExchangeState::Busy;
                self.served += 1;
                Ok(())
            }
            ExchangeState::Busy => Err(Error::ChildBusy { id: self.id }),
            ExchangeState::Poisoned => Err(Error::Transport(format!(
                "child {} is unusable after an earlier failure",
                self.id
            ))),
            ExchangeState::Closed => Err(Error::ChildDestroyed { id: self.id }),
        }
    }

    /// Interpret a response from the worker.
    pub fn receive(&mut self, response: Response) -> Result<Step> {
        match response {
            Response::Logging { level, message } => Ok(Step::Log { level, message }),
            Response::Output { result } => {
                self.expect_busy("Output")?;
                Ok(Step::Output(result))
            }
            Response::Done => {
                self.expect_busy("Done")?;
                self.finish();
                Ok(Step::Done)
            }
        }
    }

    /// Mark the request in flight as finished.
    pub fn finish(&mut self) {
        if self.state == ExchangeState::Busy {
            self.state = ExchangeState::Idle;
        }
    }

    /// Record a failure of the request in flight and hand the error back.
    pub fn fail(&mut self, err: Error) -> Error {
        if self.state != ExchangeState::Closed {
            self.state = ExchangeState::Poisoned;
        }
        err
    }

    /// Close for good. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        let was_open = self.state != ExchangeState::Closed;
        self.state = ExchangeState::Closed;
        was_open
    }

    fn expect_busy(&self, what: &str) -> Result<()> {
        if self.state == ExchangeState::Busy {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "child {} sent {} with no request in flight",
                self.id, what
            )))
        }
    }
}
