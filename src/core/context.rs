use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::core::error::{Error, ErrorKind, Result};

/// Per-query liveness state. Searchers poll `checkpoint` whenever they
/// touch a new trie/tree/graph node or cross a posting-block boundary:
/// cancellation drains the query to a clean empty stream, an elapsed
/// deadline is a typed error.
#[derive(Clone)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancel: Arc<AtomicBool>,
}

impl QueryContext {
    pub fn unbounded() -> Self {
        QueryContext {
            deadline: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        QueryContext {
            deadline: Some(deadline),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle the host can flip from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Returns false on cancellation (caller emits an empty stream) and a
    /// `QueryTimeout` error past the deadline.
    pub fn checkpoint(&self) -> Result<bool> {
        if self.cancel.load(Ordering::Relaxed) {
            return Ok(false);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::new(ErrorKind::QueryTimeout, "query deadline exceeded"));
            }
        }
        Ok(true)
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        QueryContext::unbounded()
    }
}
