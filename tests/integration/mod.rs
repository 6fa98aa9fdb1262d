//! Integration test suite for marshal.
//!
//! These tests drive whole target trees through the public scheduler and
//! check ordering, concurrency bounds, fail-fast and child lifecycle.
//!
//! # Test Categories
//!
//! - `scheduling`: Regular strategy ordering, bounds and fail-fast
//! - `child_pool`: Child reuse, pool sizing and cleanup on cancellation
//! - `worker_process`: Real `marshal-worker` subprocesses and worker threads
//!
//! # CI Compatibility
//!
//! Targets are scripted in process or are plain `sh` commands, so the suite
//! needs nothing beyond a POSIX shell.

mod fixtures;

mod child_pool;
mod worker_process;
