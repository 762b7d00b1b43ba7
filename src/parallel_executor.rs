//! Bounded worker pool for post-processing units
//! Runs independent per-domain or per-batch work concurrently with progress tracking

use crate::errors::{AnalysisError, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::info;

/// Progress update for long-running passes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub operation: String,
    pub current: u32,
    pub total: u32,
    pub percentage: f32,
    pub message: String,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: Option<u64>,
}

pub type ProgressSender = mpsc::Sender<ProgressUpdate>;
pub type ProgressReceiver = mpsc::Receiver<ProgressUpdate>;

/// Create a progress channel
pub fn progress_channel(buffer: usize) -> (ProgressSender, ProgressReceiver) {
    mpsc::channel(buffer)
}

/// Execution statistics for performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionStats {
    pub total_operations: u32,
    pub successful: u32,
    pub failed: u32,
    pub total_duration_ms: u64,
    pub avg_operation_ms: f64,
    pub parallel_efficiency: f64,
    pub last_execution: Option<String>,
}

/// Configuration for parallel execution
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Maximum concurrent units
    pub max_concurrency: usize,
    /// Timeout per unit
    pub operation_timeout: Duration,
    /// Nodes per unit for passes that batch their input
    pub batch_size: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            operation_timeout: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

pub struct ParallelExecutor {
    config: ParallelConfig,
    semaphore: Arc<Semaphore>,
    stats: RwLock<ExecutionStats>,
    progress: Option<ProgressSender>,
}

impl ParallelExecutor {
    pub fn new(config: ParallelConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            config,
            semaphore,
            stats: RwLock::new(ExecutionStats::default()),
            progress: None,
        }
    }

    /// Reports one update per finished unit on `sender`
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Execute async units with bounded concurrency; one result per unit, in input order
    pub async fn execute_parallel<F, T, Fut>(
        &self,
        operations: Vec<F>,
        operation_name: &str,
    ) -> Vec<Result<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: Send,
    {
        let total = operations.len() as u32;
        let start = Instant::now();
        let completed = Arc::new(AtomicU32::new(0));

        let semaphore = self.semaphore.clone();
        let timeout = self.config.operation_timeout;

        let futures: Vec<_> = operations
            .into_iter()
            .map(|op| {
                let sem = semaphore.clone();
                let completed = completed.clone();
                let progress_tx = self.progress.clone();
                let op_name = operation_name.to_string();
                let start_time = start;

                async move {
                    let _permit = sem
                        .acquire()
                        .await
                        .map_err(|e| AnalysisError::InternalError(format!("Semaphore error: {}", e)))?;

                    let result = tokio::time::timeout(timeout, op()).await;

                    let current = completed.fetch_add(1, Ordering::SeqCst) + 1;

                    if let Some(tx) = progress_tx {
                        let elapsed = start_time.elapsed();
                        let percentage = (current as f32 / total as f32) * 100.0;
                        let avg_time = elapsed.as_millis() as f64 / current as f64;
                        let remaining = ((total - current) as f64 * avg_time).min(u64::MAX as f64) as u64;

                        let _ = tx
                            .send(ProgressUpdate {
                                operation: op_name.clone(),
                                current,
                                total,
                                percentage,
                                message: format!("Processing {} of {}", current, total),
                                elapsed_ms: elapsed.as_millis() as u64,
                                estimated_remaining_ms: Some(remaining),
                            })
                            .await;
                    }

                    match result {
                        Ok(r) => r,
                        Err(_) => Err(AnalysisError::DeadlineExceeded(format!(
                            "{} unit exceeded {:?}",
                            op_name, timeout
                        ))),
                    }
                }
            })
            .collect();

        let results = join_all(futures).await;

        let elapsed = start.elapsed();
        let successful = results.iter().filter(|r| r.is_ok()).count() as u32;
        let failed = total - successful;

        let mut stats = self.stats.write().await;
        stats.total_operations += total;
        stats.successful += successful;
        stats.failed += failed;
        stats.total_duration_ms += elapsed.as_millis() as u64;
        if stats.total_operations > 0 {
            stats.avg_operation_ms = stats.total_duration_ms as f64 / stats.total_operations as f64;
        }
        stats.last_execution = Some(chrono::Utc::now().to_rfc3339());

        // Sequential estimate over wall time
        let elapsed_ms = elapsed.as_millis() as f64;
        if elapsed_ms > 0.0 && stats.avg_operation_ms > 0.0 {
            let sequential_estimate = stats.avg_operation_ms * total as f64;
            stats.parallel_efficiency = sequential_estimate / elapsed_ms;
        } else {
            stats.parallel_efficiency = 1.0;
        }

        info!(
            "{}: {}/{} units successful in {:?} (efficiency: {:.2}x)",
            operation_name, successful, total, elapsed, stats.parallel_efficiency
        );

        results
    }

    pub async fn stats(&self) -> ExecutionStats {
        self.stats.read().await.clone()
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }
}
