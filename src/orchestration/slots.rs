//! Bounded concurrency over a shared work queue.
//!
//! `k` slot futures pop from one queue until it is empty. Items start in
//! queue order and a slot that frees up takes the next item right away. The
//! slots run under `try_join_all`, so the first failure drops every other
//! slot along with whatever it was running.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use futures::future::try_join_all;

use crate::Result;

/// FIFO queue shared by the slots of one parallel node.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run `items` through `run` with at most `slots` in flight.
pub async fn run_slots<T, F, Fut>(items: impl IntoIterator<Item = T>, slots: usize, run: F) -> Result<()>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let queue = WorkQueue::new(items);
    let slots = slots.min(queue.len());
    let queue = &queue;
    let run = &run;
    let workers = (0..slots).map(|_| async move {
        while let Some(item) = queue.pop() {
            run(item).await?;
        }
        Ok::<_, crate::Error>(())
    });
    try_join_all(workers).await?;
    Ok(())
}
