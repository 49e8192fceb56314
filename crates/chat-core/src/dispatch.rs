//! Tool Dispatcher
//!
//! Runs all tool calls of one assistant turn inside a bounded concurrency
//! scope and hands the results back in call order.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};
use crate::tool::{ToolCall, ToolRegistry, ToolResult};

/// Default number of tool calls allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 4;

/// Concurrent executor over a shared registry
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    permits: Arc<Semaphore>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, max_concurrent: usize) -> Self {
        Self {
            registry,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute every call and return one result per call, in call order.
    ///
    /// Calls are independent and may complete in any order. Nothing is
    /// retried. On cancellation no partial results are returned.
    pub async fn dispatch_all(
        &self,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolResult>> {
        let started = Instant::now();
        let count = calls.len();
        let runs = calls.into_iter().map(|call| self.run_one(call));

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(calls = count, "Tool execution cancelled");
                return Err(ChatError::Cancelled);
            }
            results = join_all(runs) => results,
        };

        let failed = results.iter().filter(|r| r.is_error).count();
        tracing::debug!(
            calls = count,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool calls joined"
        );
        Ok(results)
    }

    async fn run_one(&self, call: ToolCall) -> ToolResult {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return ToolResult::failure(&call.id, "tool dispatcher is shut down"),
        };

        let cancellable = self
            .registry
            .get(&call.name)
            .map_or(true, |handler| handler.cancellable());

        if cancellable {
            let result = self.registry.dispatch(&call).await;
            drop(permit);
            return result;
        }

        // Detached so a cancelled turn doesn't interrupt it; the permit is
        // held until the tool really finishes.
        let registry = Arc::clone(&self.registry);
        let call_id = call.id.clone();
        let task = tokio::spawn(async move {
            let result = registry.dispatch(&call).await;
            drop(permit);
            result
        });
        match task.await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(call_id, format!("tool task failed: {}", e)),
        }
    }
}
