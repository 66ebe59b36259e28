//! The worker pool handle
//!
//! A [`Pool`] owns a fixed set of execution units, the registry of operations
//! they export, and one dispatcher task. `run` and `map` hand a batch to the
//! dispatcher; at most one batch is active at a time.

mod bootstrap;
mod collector;
mod dispatcher;

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, Instrument};
use uuid::Uuid;

use crate::core::config::PoolConfig;
use crate::core::errors::{PoolError, Result};
use crate::core::metrics::{PoolMetrics, PoolStats};
use crate::registry::OperationRegistry;
use crate::unit::{ExecutionUnit, UnitRuntime};

use bootstrap::{bootstrap, Bootstrapped};
use dispatcher::{Dispatcher, Invocation, InvocationEvent};

pub use collector::ResultCollector;

/// Lifecycle of a pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    /// Dispatching a batch of the named operation
    Busy(String),
    /// Terminal; every later call fails with `PoolError::Closed`
    Destroyed,
}

/// Handle to a running pool. Clones share the same units.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: Uuid,
    units: Vec<Arc<dyn ExecutionUnit>>,
    registry: OperationRegistry,
    state: Arc<Mutex<PoolState>>,
    commands: mpsc::UnboundedSender<Invocation>,
    shutdown: watch::Sender<bool>,
    metrics: Arc<PoolMetrics>,
}

impl Pool {
    /// Spawn `config.units` units from `runtime` and wait until all are ready
    #[instrument(skip(runtime, config), fields(units = config.units))]
    pub async fn create<R: UnitRuntime>(runtime: R, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let registry = OperationRegistry::from_names(runtime.operations())?;
        let Bootstrapped { units, inbox } = bootstrap(&runtime, &config).await?;

        let id = Uuid::new_v4();
        let metrics = Arc::new(PoolMetrics::new(units.len()));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(PoolState::Idle));

        let dispatcher = Dispatcher::new(
            units.clone(),
            inbox,
            command_rx,
            shutdown_rx,
            state.clone(),
            metrics.clone(),
        );
        tokio::spawn(
            dispatcher
                .run()
                .instrument(tracing::info_span!("dispatcher", pool_id = %id)),
        );

        info!(pool_id = %id, units = units.len(), operations = ?registry.list(), "Worker pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                units,
                registry,
                state,
                commands,
                shutdown,
                metrics,
            }),
        })
    }

    /// Create a pool with one unit per available CPU
    pub async fn with_defaults<R: UnitRuntime>(runtime: R) -> Result<Self> {
        Self::create(runtime, PoolConfig::default()).await
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Number of execution units
    pub fn size(&self) -> usize {
        self.inner.units.len()
    }

    /// Names of the operations this pool can run
    pub fn operations(&self) -> Vec<String> {
        self.inner.registry.list()
    }

    pub fn state(&self) -> PoolState {
        self.inner.state.lock().clone()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.metrics.snapshot()
    }

    /// Entry point bound to one operation
    pub fn operation(&self, name: &str) -> Result<OperationHandle<'_>> {
        self.inner.registry.ensure(name)?;
        Ok(OperationHandle {
            pool: self,
            name: name.to_string(),
        })
    }

    /// Run `operation` over every input, calling `callback(output, index)` as
    /// each result arrives
    ///
    /// Callbacks fire in completion order, exactly once per index. Fails with
    /// `Busy` if another batch is active, and with the first task failure if
    /// any input fails. Dropping the returned future stops further dispatch;
    /// the pool stays `Busy` until the units already working have replied.
    #[instrument(skip(self, inputs, callback), fields(pool_id = %self.inner.id, inputs = inputs.len()))]
    pub async fn run<F>(&self, operation: &str, inputs: Vec<Value>, mut callback: F) -> Result<()>
    where
        F: FnMut(Value, usize),
    {
        if inputs.is_empty() {
            self.inner.check_available()?;
            return self.inner.registry.ensure(operation);
        }

        let busy = BusyGuard::acquire(&self.inner, operation)?;

        let (events, mut event_rx) = mpsc::unbounded_channel();
        self.inner
            .commands
            .send(Invocation {
                operation: operation.to_string(),
                inputs,
                events,
            })
            .map_err(|_| PoolError::Closed)?;
        // the dispatcher returns the pool to Idle once the batch has drained
        busy.hand_off();

        while let Some(event) = event_rx.recv().await {
            match event {
                InvocationEvent::Output { index, output } => callback(output, index),
                InvocationEvent::Finished(result) => return result,
            }
        }
        Err(PoolError::Closed)
    }

    /// Terminate every unit and reject any active batch
    ///
    /// The pool is unusable afterward; a second call fails with `Closed`.
    #[instrument(skip(self), fields(pool_id = %self.inner.id))]
    pub fn destroy(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), PoolState::Destroyed);
        if previous == PoolState::Destroyed {
            return Err(PoolError::Closed);
        }
        self.inner.shut_down();
        info!(pool_id = %self.inner.id, "Worker pool destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("units", &self.inner.units.len())
            .field("operations", &self.inner.registry.list())
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl PoolInner {
    fn check_available(&self) -> Result<()> {
        match &*self.state.lock() {
            PoolState::Idle => Ok(()),
            PoolState::Busy(operation) => Err(PoolError::Busy {
                operation: operation.clone(),
            }),
            PoolState::Destroyed => Err(PoolError::Closed),
        }
    }

    fn shut_down(&self) {
        for unit in &self.units {
            unit.terminate();
        }
        // the dispatcher may already be gone
        let _ = self.shutdown.send(true);
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if *self.state.lock() != PoolState::Destroyed {
            self.shut_down();
        }
    }
}

/// Marks the pool busy until the batch reaches the dispatcher
struct BusyGuard<'a> {
    inner: &'a PoolInner,
    armed: bool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(inner: &'a PoolInner, operation: &str) -> Result<Self> {
        let mut state = inner.state.lock();
        match &*state {
            PoolState::Idle => {}
            PoolState::Busy(current) => {
                return Err(PoolError::Busy {
                    operation: current.clone(),
                })
            }
            PoolState::Destroyed => return Err(PoolError::Closed),
        }
        inner.registry.ensure(operation)?;
        *state = PoolState::Busy(operation.to_string());
        Ok(Self { inner, armed: true })
    }

    fn hand_off(mut self) {
        self.armed = false;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.lock();
        if matches!(*state, PoolState::Busy(_)) {
            *state = PoolState::Idle;
        }
    }
}

/// `run`/`map` bound to one operation name
#[derive(Clone, Debug)]
pub struct OperationHandle<'a> {
    pool: &'a Pool,
    name: String,
}

impl OperationHandle<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run<F>(&self, inputs: Vec<Value>, callback: F) -> Result<()>
    where
        F: FnMut(Value, usize),
    {
        self.pool.run(&self.name, inputs, callback).await
    }
}
