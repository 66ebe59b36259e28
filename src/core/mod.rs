// Core infrastructure shared by the pool and the unit runtimes

pub mod config;
pub mod errors;
pub mod metrics;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use errors::{PoolError, Result};
pub use metrics::{PoolMetrics, PoolStats};
