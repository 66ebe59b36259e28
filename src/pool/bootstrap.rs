//! Pool bootstrap: spawn every unit and wait for its ready handshake

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::config::PoolConfig;
use crate::core::errors::{PoolError, Result};
use crate::protocol::{is_ready_frame, Envelope, UnitEvent, READY_SENTINEL};
use crate::unit::{ExecutionUnit, UnitRuntime};

/// Units that completed the handshake, plus the inbox they report to
pub(crate) struct Bootstrapped {
    pub units: Vec<Arc<dyn ExecutionUnit>>,
    pub inbox: mpsc::UnboundedReceiver<Envelope>,
}

/// Spawn `config.units` units and wait until each has sent `"ready"`
///
/// On any failure every unit spawned so far is terminated; a partial pool is
/// never returned.
pub(crate) async fn bootstrap(runtime: &dyn UnitRuntime, config: &PoolConfig) -> Result<Bootstrapped> {
    let count = config.units;
    let (outbox, mut inbox) = mpsc::unbounded_channel();

    let spawned = join_all((0..count).map(|id| {
        let name = format!("{}-{}", config.unit_name_prefix, id);
        runtime.spawn(id, name, outbox.clone())
    }))
    .await;
    // Only units hold senders now, so a closed inbox means they are all gone
    drop(outbox);

    let mut units = Vec::with_capacity(count);
    let mut spawn_error = None;
    for result in spawned {
        match result {
            Ok(unit) => units.push(unit),
            Err(e) => {
                spawn_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = spawn_error {
        terminate_all(&units);
        return Err(e);
    }

    let mut ready = vec![false; count];
    let handshake = match config.startup_timeout {
        Some(limit) => {
            let outcome = tokio::time::timeout(limit, await_ready(&mut inbox, &mut ready)).await;
            match outcome {
                Ok(result) => result,
                Err(_) => Err(PoolError::startup(
                    first_pending(&ready),
                    format!("not ready after {:?}", limit),
                )),
            }
        }
        None => await_ready(&mut inbox, &mut ready).await,
    };

    if let Err(e) = handshake {
        terminate_all(&units);
        return Err(e);
    }

    Ok(Bootstrapped { units, inbox })
}

async fn await_ready(
    inbox: &mut mpsc::UnboundedReceiver<Envelope>,
    ready: &mut [bool],
) -> Result<()> {
    let mut pending = ready.len();

    while pending > 0 {
        let Some(Envelope { unit, event }) = inbox.recv().await else {
            return Err(PoolError::startup(
                first_pending(ready),
                "unit disconnected before becoming ready",
            ));
        };
        if unit >= ready.len() {
            warn!(unit, "Ignoring startup frame from unknown unit");
            continue;
        }

        match event {
            UnitEvent::Frame(frame) if !ready[unit] => {
                if !is_ready_frame(&frame) {
                    let got = frame
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| frame.to_string());
                    return Err(PoolError::startup(
                        unit,
                        format!("expected '{}', got '{}'", READY_SENTINEL, got),
                    ));
                }
                ready[unit] = true;
                pending -= 1;
                debug!(unit, pending, "Unit ready");
            }
            UnitEvent::Frame(frame) => {
                warn!(unit, %frame, "Ignoring unsolicited frame during startup");
            }
            UnitEvent::Exited => {
                return Err(PoolError::startup(unit, "unit exited during startup"));
            }
        }
    }

    Ok(())
}

fn first_pending(ready: &[bool]) -> usize {
    ready.iter().position(|r| !r).unwrap_or(0)
}

fn terminate_all(units: &[Arc<dyn ExecutionUnit>]) {
    for unit in units {
        unit.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_await_ready_accepts_any_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for unit in [2, 0, 1] {
            tx.send(Envelope::frame(unit, json!("ready"))).unwrap();
        }
        let mut ready = vec![false; 3];
        await_ready(&mut rx, &mut ready).await.unwrap();
        assert_eq!(ready, vec![true, true, true]);
    }

    #[tokio::test]
    async fn test_await_ready_rejects_wrong_first_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Envelope::frame(0, json!("ready"))).unwrap();
        tx.send(Envelope::frame(1, json!("hello"))).unwrap();

        let mut ready = vec![false; 2];
        let err = await_ready(&mut rx, &mut ready).await.unwrap_err();
        match err {
            PoolError::Startup { unit, message } => {
                assert_eq!(unit, 1);
                assert_eq!(message, "expected 'ready', got 'hello'");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_await_ready_reports_disconnect() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Envelope::frame(0, json!("ready"))).unwrap();
        drop(tx);

        let mut ready = vec![false; 2];
        let err = await_ready(&mut rx, &mut ready).await.unwrap_err();
        assert!(matches!(err, PoolError::Startup { unit: 1, .. }));
    }

    #[tokio::test]
    async fn test_await_ready_rejects_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Envelope::exited(0)).unwrap();

        let mut ready = vec![false; 1];
        assert!(await_ready(&mut rx, &mut ready).await.is_err());
    }
}
