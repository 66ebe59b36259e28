//! Execution unit runtimes
//!
//! The pool never creates units itself. A [`UnitRuntime`] spawns them and
//! wires every unit to a shared outbox, tagging each event with the unit id.
//! The pool only ever sends dispatch messages and terminates units.

pub mod process;
pub mod thread;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::errors::Result;
use crate::protocol::{DispatchMessage, Envelope};

pub use process::{serve_stdio, ProcessRuntime};
pub use thread::ThreadRuntime;

/// Sender a unit uses to report frames back to the pool
pub type Outbox = mpsc::UnboundedSender<Envelope>;

/// A spawned, isolated worker reachable only by messages
pub trait ExecutionUnit: Send + Sync {
    fn id(&self) -> usize;

    /// Queue a dispatch message for the unit
    fn send(&self, message: &DispatchMessage) -> Result<()>;

    /// Stop the unit. Messages not yet processed are discarded and no further
    /// frames are reported. Idempotent.
    fn terminate(&self);
}

/// Spawns execution units loaded with one module
#[async_trait]
pub trait UnitRuntime: Send + Sync + 'static {
    /// Operation names the loaded module exports
    fn operations(&self) -> Vec<String>;

    /// Spawn unit `id`. The unit must report `"ready"` through `outbox` once
    /// loaded, and `Exited` if its transport closes.
    async fn spawn(&self, id: usize, name: String, outbox: Outbox)
        -> Result<Arc<dyn ExecutionUnit>>;
}
