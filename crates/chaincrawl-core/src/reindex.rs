//! Reindex queue: LIFO stack of ad-hoc re-processing requests.
//!
//! The supervisor side pushes while the crawl loop pops, so the stack sits
//! behind a mutex and the handle is cheap to clone. Tasks live only in
//! memory and are lost when the crawler stops.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::ReindexTask;

#[derive(Debug, Clone, Default)]
pub struct ReindexQueue {
    stack: Arc<Mutex<Vec<ReindexTask>>>,
}

impl ReindexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ReindexTask>> {
        self.stack.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push a task on top of the stack.
    pub fn enqueue(&self, task: ReindexTask) {
        self.lock().push(task);
    }

    /// Pop the most recently enqueued task.
    pub fn pop(&self) -> Option<ReindexTask> {
        self.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
