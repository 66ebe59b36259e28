//! Demo execution unit for `ProcessRuntime`
//!
//! Serves a small numeric module over stdin/stdout. Logs go to stderr so they
//! never interleave with protocol frames.

use anyhow::Result;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use wool::{serve_stdio, Module};

fn module() -> wool::Result<Module> {
    Module::builder()
        .typed("square", |x: i64| Ok(x * x))
        .typed("double", |x: f64| Ok(x * 2.0))
        .typed("sleep_ms", |ms: u64| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(ms)
        })
        // Fails for the input 13, echoes everything else
        .typed("fail_on", |x: i64| {
            if x == 13 {
                anyhow::bail!("unlucky input {}", x);
            }
            Ok(x)
        })
        .typed("unit_id", |_: serde_json::Value| {
            Ok(std::env::var(wool::unit::process::UNIT_ID_ENV).unwrap_or_default())
        })
        .build()
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let module = module()?;
    tracing::debug!(operations = ?module.names(), "Unit starting");

    serve_stdio(module)
}
