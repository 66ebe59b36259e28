//! # wool: a message-passing worker pool
//!
//! Distributes a batch of homogeneous calls across a fixed set of isolated
//! execution units. Units share no memory with the host; they receive
//! `{operation, input, index}` frames and answer `{output, index}`. The pool
//! hands each unit the next unassigned input as soon as it replies, and
//! reassembles outputs in input order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wool::{Module, Pool, PoolConfig, ThreadRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let module = Module::builder()
//!         .typed("square", |x: i64| Ok(x * x))
//!         .build()?;
//!
//!     let pool = Pool::create(
//!         ThreadRuntime::from_module(module),
//!         PoolConfig::builder().units(4).build()?,
//!     )
//!     .await?;
//!
//!     let squares: Vec<i64> = pool.map_as("square", &[1, 2, 3, 4, 5]).await?;
//!     assert_eq!(squares, vec![1, 4, 9, 16, 25]);
//!
//!     pool.destroy()?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod module;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod unit;

pub use crate::core::{PoolConfig, PoolConfigBuilder, PoolError, PoolMetrics, PoolStats, Result};
pub use module::{Module, ModuleBuilder, OperationFn};
pub use pool::{OperationHandle, Pool, PoolState, ResultCollector};
pub use protocol::{DispatchMessage, Envelope, ReplyMessage, UnitEvent, READY_SENTINEL};
pub use registry::OperationRegistry;
pub use unit::{serve_stdio, ExecutionUnit, Outbox, ProcessRuntime, ThreadRuntime, UnitRuntime};
