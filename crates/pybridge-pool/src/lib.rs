// SPDX-License-Identifier: MIT OR Apache-2.0
//! pybridge-pool
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Fixed-capacity pool of warm Python workers.
//!
//! The pool hands out [`Executor`]s to callers with a bounded FIFO wait,
//! replaces poisoned ones, runs a periodic health sweep over its roster,
//! and supports live resizing within the 1–20 capacity bounds. Parallelism
//! is exactly `min(caller concurrency, pool size)`; a single worker never
//! sees interleaved requests.

use pybridge_config::{BridgeConfig, MAX_POOL_SIZE, MIN_POOL_SIZE};
use pybridge_error::BridgeError;
use pybridge_exec::Executor;
use pybridge_protocol::{Completion, SecurityMode, SyntaxFinding};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, info, warn};

/// Point-in-time pool statistics. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Number of workers in the roster, idle or lent.
    pub total_size: usize,
    /// Number of idle workers ready to borrow.
    pub available: usize,
    /// Number of workers currently lent to callers.
    pub in_use: usize,
    /// Number of roster workers whose pipe is still trustworthy.
    pub healthy: usize,
}

#[derive(Debug)]
struct PoolInner {
    config: BridgeConfig,
    /// Every worker the pool owns, idle or lent. Structural mutations only
    /// under this lock; never held across an await.
    roster: Mutex<Vec<Arc<Executor>>>,
    /// Idle workers in borrow order. `slots` holds exactly one permit per
    /// queued worker, and its FIFO waiter order is what makes borrowing fair.
    idle: Mutex<VecDeque<Arc<Executor>>>,
    slots: Semaphore,
    /// Capacity recorded by the last resize, even when a shrink stopped early.
    desired_size: AtomicUsize,
    shut_down: AtomicBool,
    /// Serializes replacement so concurrent failures cannot over-spawn.
    replace_lock: tokio::sync::Mutex<()>,
}

/// Bounded set of warm Python workers with fair FIFO borrowing.
#[derive(Debug)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    sweep: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool of `config.pool_size` workers.
    ///
    /// Spawning is all-or-nothing: if any worker fails to come up, the ones
    /// already created are torn down and the error is returned.
    pub async fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config
            .validate()
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        let mut spawned: Vec<Arc<Executor>> = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            match Executor::spawn(&config).await {
                Ok(exec) => spawned.push(Arc::new(exec)),
                Err(e) => {
                    for exec in &spawned {
                        exec.shutdown().await;
                    }
                    return Err(BridgeError::NotReady(format!(
                        "failed to initialize pool: {e}"
                    )));
                }
            }
        }

        let size = spawned.len();
        let inner = Arc::new(PoolInner {
            desired_size: AtomicUsize::new(config.pool_size),
            config,
            roster: Mutex::new(spawned.clone()),
            idle: Mutex::new(spawned.into_iter().collect()),
            slots: Semaphore::new(size),
            shut_down: AtomicBool::new(false),
            replace_lock: tokio::sync::Mutex::new(()),
        });

        let sweep = spawn_sweep(&inner);
        info!(target: "pybridge.pool", size, "pool ready");

        Ok(Self {
            inner,
            sweep: Mutex::new(Some(sweep)),
        })
    }

    /// Wait up to `deadline` for an idle, healthy worker.
    ///
    /// Waiters are served in arrival order. A poisoned worker polled from
    /// the queue is replaced and the wait continues against the same
    /// deadline; expiry fails with `TIMEOUT_BORROW`.
    pub async fn borrow(&self, deadline: Duration) -> Result<Arc<Executor>, BridgeError> {
        if self.inner.is_shut_down() {
            return Err(BridgeError::PoolShutdown);
        }

        let inner = Arc::clone(&self.inner);
        let wait = async {
            loop {
                let permit = inner
                    .slots
                    .acquire()
                    .await
                    .map_err(|_| BridgeError::PoolShutdown)?;
                permit.forget();
                let exec = inner
                    .idle
                    .lock()
                    .expect("pool lock poisoned")
                    .pop_front()
                    .expect("permit without queued worker");
                if exec.is_healthy() {
                    return Ok(exec);
                }
                // Replace in a detached task: the caller's deadline may lapse
                // mid-replacement, and a cancelled replacement would leak the
                // pool slot.
                let pool = Arc::clone(&inner);
                tokio::spawn(async move { pool.replace(exec).await });
            }
        };

        match timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::TimeoutBorrow {
                millis: deadline.as_millis() as u64,
            }),
        }
    }

    /// Return a borrowed worker to the pool.
    ///
    /// Poisoned workers are replaced instead of requeued; on a shut-down
    /// pool the worker is simply terminated.
    pub async fn give_back(&self, exec: Arc<Executor>) {
        self.inner.give_back(exec).await;
    }

    /// Borrow, run `execute`, return.
    pub async fn execute(
        &self,
        code: &str,
        variables: Map<String, Value>,
        mode: SecurityMode,
    ) -> Result<Value, BridgeError> {
        let exec = self.borrow(self.inner.config.borrow_timeout).await?;
        let out = exec.execute(code, variables, mode).await;
        self.give_back(exec).await;
        out
    }

    /// Borrow, run `evaluate`, return.
    pub async fn evaluate(
        &self,
        expression: &str,
        variables: Map<String, Value>,
        mode: SecurityMode,
    ) -> Result<Value, BridgeError> {
        let exec = self.borrow(self.inner.config.borrow_timeout).await?;
        let out = exec.evaluate(expression, variables, mode).await;
        self.give_back(exec).await;
        out
    }

    /// Borrow, run `call_module`, return.
    pub async fn call_module(
        &self,
        module: &str,
        function: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        mode: SecurityMode,
    ) -> Result<Value, BridgeError> {
        let exec = self.borrow(self.inner.config.borrow_timeout).await?;
        let out = exec.call_module(module, function, args, kwargs, mode).await;
        self.give_back(exec).await;
        out
    }

    /// Borrow, run `check_syntax`, return.
    pub async fn check_syntax(&self, code: &str) -> Result<Vec<SyntaxFinding>, BridgeError> {
        let exec = self.borrow(self.inner.config.borrow_timeout).await?;
        let out = exec.check_syntax(code).await;
        self.give_back(exec).await;
        out
    }

    /// Borrow, run `get_completions`, return.
    pub async fn get_completions(
        &self,
        code: &str,
        line: u32,
        column: u32,
    ) -> Result<Vec<Completion>, BridgeError> {
        let exec = self.borrow(self.inner.config.borrow_timeout).await?;
        let out = exec.get_completions(code, line, column).await;
        self.give_back(exec).await;
        out
    }

    /// Borrow, ask the worker for its Python version, return.
    pub async fn version(&self) -> Result<String, BridgeError> {
        let exec = self.borrow(self.inner.config.borrow_timeout).await?;
        let out = exec.version().await;
        self.give_back(exec).await;
        out
    }

    /// Grow or shrink the pool to `new_size` workers (1–20).
    ///
    /// Growing spawns workers immediately. Shrinking retires idle workers
    /// only; lent workers are never preempted, and when fewer idle workers
    /// exist than the shrink needs, the pass stops early. The desired size
    /// is recorded either way.
    pub async fn resize(&self, new_size: usize) -> Result<(), BridgeError> {
        if self.inner.is_shut_down() {
            return Err(BridgeError::PoolShutdown);
        }
        if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&new_size) {
            return Err(BridgeError::Config(format!(
                "pool size must be between {MIN_POOL_SIZE} and {MAX_POOL_SIZE}, got {new_size}"
            )));
        }

        let inner = &self.inner;
        let _guard = inner.replace_lock.lock().await;
        let current = inner.roster.lock().expect("pool lock poisoned").len();
        inner.desired_size.store(new_size, Ordering::Release);

        if new_size > current {
            for _ in current..new_size {
                match Executor::spawn(&inner.config).await {
                    Ok(exec) => inner.adopt(Arc::new(exec)),
                    Err(e) => {
                        warn!(target: "pybridge.pool", "resize grow stopped early: {e}");
                        break;
                    }
                }
            }
        } else {
            for _ in new_size..current {
                match inner.slots.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        let exec = inner
                            .idle
                            .lock()
                            .expect("pool lock poisoned")
                            .pop_front()
                            .expect("permit without queued worker");
                        inner.discard(&exec);
                        exec.shutdown().await;
                    }
                    Err(_) => {
                        info!(
                            target: "pybridge.pool",
                            "shrink stopped early: remaining workers are in flight"
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Shut the pool down: no further borrows, every worker terminated.
    ///
    /// Idempotent; the second call returns immediately.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.sweep.lock().expect("pool lock poisoned").take() {
            handle.abort();
        }
        self.inner.slots.close();
        self.inner.idle.lock().expect("pool lock poisoned").clear();

        let roster: Vec<Arc<Executor>> = self
            .inner
            .roster
            .lock()
            .expect("pool lock poisoned")
            .drain(..)
            .collect();
        for exec in roster {
            exec.shutdown().await;
        }
        info!(target: "pybridge.pool", "pool shut down");
    }

    /// Derived statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// The capacity recorded by the last successful resize (or creation).
    pub fn desired_size(&self) -> usize {
        self.inner.desired_size.load(Ordering::Acquire)
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }
}

impl PoolInner {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn stats(&self) -> PoolStats {
        let roster = self.roster.lock().expect("pool lock poisoned");
        let total_size = roster.len();
        let healthy = roster.iter().filter(|e| e.is_healthy()).count();
        drop(roster);
        let available = self.idle.lock().expect("pool lock poisoned").len();
        PoolStats {
            total_size,
            available,
            in_use: total_size.saturating_sub(available),
            healthy,
        }
    }

    /// Add a fresh worker to the roster and the idle queue.
    fn adopt(&self, exec: Arc<Executor>) {
        self.roster
            .lock()
            .expect("pool lock poisoned")
            .push(exec.clone());
        self.idle
            .lock()
            .expect("pool lock poisoned")
            .push_back(exec);
        self.slots.add_permits(1);
    }

    /// Drop a worker from the roster.
    fn discard(&self, exec: &Arc<Executor>) {
        self.roster
            .lock()
            .expect("pool lock poisoned")
            .retain(|e| e.id() != exec.id());
    }

    async fn give_back(&self, exec: Arc<Executor>) {
        if self.is_shut_down() {
            self.discard(&exec);
            exec.shutdown().await;
            return;
        }
        if exec.is_healthy() {
            self.idle
                .lock()
                .expect("pool lock poisoned")
                .push_back(exec);
            self.slots.add_permits(1);
        } else {
            self.replace(exec).await;
        }
    }

    /// Retire `old` and spawn a replacement onto the idle queue.
    ///
    /// Serialized per pool. A failed replacement shrinks the effective size
    /// and is logged; it never fails the calling operation.
    async fn replace(&self, old: Arc<Executor>) {
        let _guard = self.replace_lock.lock().await;
        self.discard(&old);
        old.shutdown().await;

        if self.is_shut_down() {
            return;
        }
        let roster_len = self.roster.lock().expect("pool lock poisoned").len();
        if roster_len >= self.desired_size.load(Ordering::Acquire) {
            // A shrink already landed; nothing to backfill.
            return;
        }

        match Executor::spawn(&self.config).await {
            Ok(fresh) => {
                debug!(target: "pybridge.pool", old = %old.id(), new = %fresh.id(), "worker replaced");
                self.adopt(Arc::new(fresh));
            }
            Err(e) => {
                warn!(target: "pybridge.pool", "replacement failed, pool runs smaller: {e}");
            }
        }
    }

    /// One health-sweep pass: replace unhealthy workers that are idle.
    /// Lent workers are left alone; they are replaced on return.
    async fn sweep(&self) {
        let unhealthy: Vec<Arc<Executor>> = self
            .roster
            .lock()
            .expect("pool lock poisoned")
            .iter()
            .filter(|e| !e.is_healthy())
            .cloned()
            .collect();

        for exec in unhealthy {
            let Ok(permit) = self.slots.try_acquire() else {
                break;
            };
            let pulled = {
                let mut idle = self.idle.lock().expect("pool lock poisoned");
                idle.iter()
                    .position(|e| e.id() == exec.id())
                    .and_then(|i| idle.remove(i))
            };
            match pulled {
                Some(exec) => {
                    permit.forget();
                    self.replace(exec).await;
                }
                // In flight; give_back will handle it.
                None => drop(permit),
            }
        }
    }
}

fn spawn_sweep(inner: &Arc<PoolInner>) -> tokio::task::JoinHandle<()> {
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    let period = inner.config.health_sweep_period;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the immediate first tick
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            if inner.is_shut_down() {
                break;
            }
            inner.sweep().await;
        }
    })
}
