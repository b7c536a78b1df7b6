//! Warm sandbox pool.
//!
//! Idle sandboxes are kept ready so an invocation does not pay the
//! startup cost of a worker. A sandbox comes back to the pool only after
//! a clean `done`; faulted or timed-out sandboxes are discarded by the
//! caller. Sandboxes are recycled after a configured number of runs.

use super::config::PoolConfig;
use super::traits::{Sandbox, SandboxFactory};
use crate::tools::error::ToolError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Pool counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolMetrics {
    /// Idle sandboxes ready for use
    pub available: usize,
    /// Sandboxes handed out and not yet returned
    pub in_use: usize,
    /// Total sandboxes created
    pub total_created: u64,
    /// Acquisitions served from the idle set
    pub pool_hits: u64,
    /// Acquisitions that had to create a sandbox
    pub pool_misses: u64,
    /// Sandboxes retired after reaching the execution limit
    pub recycled: u64,
    /// Sandboxes torn down for any reason
    pub destroyed: u64,
    /// Average creation time in milliseconds
    pub avg_creation_ms: f64,
    total_creation_time_ms: f64,
}

impl PoolMetrics {
    /// Records a new sandbox creation with the given duration.
    pub fn record_creation(&mut self, duration_ms: f64) {
        self.total_created += 1;
        self.total_creation_time_ms += duration_ms;
        self.avg_creation_ms = self.total_creation_time_ms / self.total_created as f64;
    }
}

/// A bounded set of idle sandboxes over a [`SandboxFactory`].
#[derive(Debug)]
pub struct SandboxPool {
    factory: Arc<dyn SandboxFactory>,
    config: PoolConfig,
    idle: Mutex<VecDeque<Sandbox>>,
    metrics: Mutex<PoolMetrics>,
}

impl SandboxPool {
    /// Creates an empty pool.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(factory: Arc<dyn SandboxFactory>, config: PoolConfig) -> Result<Self, ToolError> {
        config.validate()?;
        Ok(Self {
            factory,
            config,
            idle: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(PoolMetrics::default()),
        })
    }

    /// The factory backing this pool.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn SandboxFactory> {
        &self.factory
    }

    /// Creates sandboxes until `warm_count` are idle.
    ///
    /// Returns the number created.
    ///
    /// # Errors
    ///
    /// Returns the first creation failure.
    pub async fn warm(&self) -> Result<usize, ToolError> {
        let mut created = 0;
        while self.idle_len() < self.config.warm_count {
            let sandbox = self.create().await?;
            self.push_idle(sandbox);
            created += 1;
        }
        if created > 0 {
            tracing::info!(
                factory = self.factory.name(),
                created,
                "Sandbox pool warmed"
            );
        }
        Ok(created)
    }

    /// Takes an idle sandbox, or creates one.
    ///
    /// Idle sandboxes whose context has died are dropped on the way.
    ///
    /// # Errors
    ///
    /// Returns a sandbox fault if a new sandbox cannot be created.
    pub async fn acquire(&self) -> Result<Sandbox, ToolError> {
        loop {
            let Some(mut sandbox) = self.lock_idle().pop_front() else {
                break;
            };
            if sandbox.is_alive() {
                let mut metrics = self.lock_metrics();
                metrics.pool_hits += 1;
                metrics.in_use += 1;
                metrics.available = metrics.available.saturating_sub(1);
                return Ok(sandbox);
            }
            tracing::debug!(sandbox_id = %sandbox.id(), "Dropping dead idle sandbox");
            {
                let mut metrics = self.lock_metrics();
                metrics.available = metrics.available.saturating_sub(1);
                metrics.destroyed += 1;
            }
            sandbox.destroy().await;
        }

        let sandbox = self.create().await?;
        let mut metrics = self.lock_metrics();
        metrics.pool_misses += 1;
        metrics.in_use += 1;
        Ok(sandbox)
    }

    /// Returns a sandbox after a completed run.
    ///
    /// The sandbox is kept only if it finished cleanly, is still alive,
    /// is under the execution limit and the idle set has room.
    pub async fn release(&self, mut sandbox: Sandbox) {
        self.mark_returned();

        if !sandbox.reset() || !sandbox.is_alive() {
            self.destroy(sandbox).await;
            return;
        }
        if sandbox.executions() >= self.config.max_executions_before_recycle {
            tracing::debug!(
                sandbox_id = %sandbox.id(),
                executions = sandbox.executions(),
                "Recycling sandbox"
            );
            self.lock_metrics().recycled += 1;
            self.destroy(sandbox).await;
            return;
        }
        if self.idle_len() >= self.config.max_idle {
            self.destroy(sandbox).await;
            return;
        }
        self.push_idle(sandbox);
    }

    /// Tears down a sandbox that must not be reused.
    pub async fn discard(&self, sandbox: Sandbox) {
        self.mark_returned();
        self.destroy(sandbox).await;
    }

    /// Current counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.lock_metrics().clone()
    }

    /// Destroys every idle sandbox.
    pub async fn shutdown(&self) {
        let drained: Vec<Sandbox> = self.lock_idle().drain(..).collect();
        let count = drained.len();
        self.lock_metrics().available = 0;
        for sandbox in drained {
            self.destroy(sandbox).await;
        }
        tracing::info!(destroyed = count, "Sandbox pool shut down");
    }

    async fn create(&self) -> Result<Sandbox, ToolError> {
        let started = Instant::now();
        let sandbox = self.factory.create().await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.lock_metrics().record_creation(elapsed_ms);
        tracing::debug!(
            sandbox_id = %sandbox.id(),
            factory = self.factory.name(),
            elapsed_ms,
            "Sandbox created"
        );
        Ok(sandbox)
    }

    async fn destroy(&self, sandbox: Sandbox) {
        self.lock_metrics().destroyed += 1;
        sandbox.destroy().await;
    }

    fn mark_returned(&self) {
        let mut metrics = self.lock_metrics();
        metrics.in_use = metrics.in_use.saturating_sub(1);
    }

    fn push_idle(&self, sandbox: Sandbox) {
        self.lock_idle().push_back(sandbox);
        self.lock_metrics().available += 1;
    }

    fn idle_len(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<Sandbox>> {
        self.idle.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_metrics(&self) -> MutexGuard<'_, PoolMetrics> {
        self.metrics.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
