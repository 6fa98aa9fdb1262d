//! Orchestrator/worker message protocol.

pub mod exchange;
pub mod message;
pub mod wire;

pub use exchange::{Exchange, ExchangeState, Step};
pub use message::{Request, Response};
