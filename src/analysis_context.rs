//! Per-run analysis context: cooperative cancellation, deadline and the
//! composition id allocator.

use crate::errors::{AnalysisError, Result};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation token shared between the caller and in-flight work
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Allocates composition ids for derived edges.
///
/// Created once per analysis run and passed to every pass that records
/// compositions. Ids are unique within the run.
#[derive(Debug, Default)]
pub struct CompositionCounter {
    next: AtomicI64,
}

impl CompositionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id, starting at 1
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of ids handed out so far
    pub fn allocated(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Carried through traversals and passes; checked between expansion steps
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl AnalysisContext {
    /// A context that never cancels
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns an error once the token is cancelled or the deadline has passed
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(AnalysisError::Cancelled(operation.to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(AnalysisError::DeadlineExceeded(operation.to_string()));
            }
        }
        Ok(())
    }
}
