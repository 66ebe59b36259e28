//! Dispatcher - greedy distribution of one invocation at a time
//!
//! A single long-lived task per pool owns the shared inbox. Every inbound
//! frame is handled to completion before the next one is read, so the
//! invocation cursor needs no locking. The pool stays `Busy` until the
//! dispatcher has drained an invocation, even if its caller went away.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::core::errors::{PoolError, Result};
use crate::core::metrics::PoolMetrics;
use crate::pool::PoolState;
use crate::protocol::{DispatchMessage, Envelope, ReplyMessage, UnitEvent};
use crate::unit::ExecutionUnit;

/// One `run` call handed to the dispatcher
pub(crate) struct Invocation {
    pub operation: String,
    pub inputs: Vec<Value>,
    pub events: mpsc::UnboundedSender<InvocationEvent>,
}

/// Progress reported back to the caller of `run`
#[derive(Debug)]
pub(crate) enum InvocationEvent {
    Output { index: usize, output: Value },
    Finished(Result<()>),
}

pub(crate) struct Dispatcher {
    units: Vec<Arc<dyn ExecutionUnit>>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    commands: mpsc::UnboundedReceiver<Invocation>,
    shutdown: watch::Receiver<bool>,
    state: Arc<Mutex<PoolState>>,
    metrics: Arc<PoolMetrics>,
}

impl Dispatcher {
    pub fn new(
        units: Vec<Arc<dyn ExecutionUnit>>,
        inbox: mpsc::UnboundedReceiver<Envelope>,
        commands: mpsc::UnboundedReceiver<Invocation>,
        shutdown: watch::Receiver<bool>,
        state: Arc<Mutex<PoolState>>,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        Self {
            units,
            inbox,
            commands,
            shutdown,
            state,
            metrics,
        }
    }

    /// Serve invocations until the pool is destroyed or dropped
    pub async fn run(mut self) {
        let mut inbox_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => break,

                command = self.commands.recv() => match command {
                    Some(invocation) => {
                        if !self.dispatch(invocation).await {
                            break;
                        }
                    }
                    None => break,
                },

                envelope = self.inbox.recv(), if inbox_open => match envelope {
                    Some(envelope) => {
                        warn!(unit = envelope.unit, event = ?envelope.event, "Ignoring unit event while idle");
                    }
                    None => {
                        warn!("All units disconnected");
                        inbox_open = false;
                    }
                },
            }
        }

        debug!("Dispatcher stopped");
    }

    /// Drive one invocation to completion. Returns false on shutdown.
    async fn dispatch(&mut self, invocation: Invocation) -> bool {
        let Invocation {
            operation,
            inputs,
            events,
        } = invocation;
        let total = inputs.len();
        let mut pending: Vec<Option<Value>> = inputs.into_iter().map(Some).collect();

        // index in flight on each unit
        let mut in_flight: Vec<Option<usize>> = vec![None; self.units.len()];
        let mut next_index = 0;
        let mut remaining = 0;
        let mut failure: Option<PoolError> = None;
        let mut abandoned = false;

        self.metrics.record_invocation_started();
        debug!(%operation, inputs = total, units = self.units.len(), "Starting invocation");

        // Inputs 0..M go to units 0..M
        for unit in 0..total.min(self.units.len()) {
            match self.send(unit, &operation, next_index, &mut pending) {
                Ok(()) => {
                    in_flight[unit] = Some(next_index);
                    next_index += 1;
                    remaining += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        while remaining > 0 {
            let envelope = tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    self.metrics.record_invocation_finished(false);
                    let _ = events.send(InvocationEvent::Finished(Err(PoolError::Closed)));
                    return false;
                }

                envelope = self.inbox.recv() => envelope,
            };

            let Some(Envelope { unit, event }) = envelope else {
                failure.get_or_insert(PoolError::internal("all units disconnected"));
                break;
            };
            let Some(index) = in_flight.get(unit).copied().flatten() else {
                warn!(unit, event = ?event, "Ignoring event from a unit with nothing in flight");
                continue;
            };
            in_flight[unit] = None;

            match event {
                UnitEvent::Exited => {
                    error!(unit, index, %operation, "Unit exited mid-task");
                    failure.get_or_insert(PoolError::UnitExited { unit, index });
                }
                UnitEvent::Frame(frame) => match serde_json::from_value::<ReplyMessage>(frame) {
                    Ok(ReplyMessage::Done { output, index: got }) if got == index => {
                        self.metrics.record_task_completed();
                        // once failed, remaining replies are drained silently
                        if failure.is_none() {
                            let _ = events.send(InvocationEvent::Output { index, output });
                        }
                    }
                    Ok(ReplyMessage::Failed { error, index: got }) if got == index => {
                        self.metrics.record_task_failed();
                        error!(unit, index, %operation, %error, "Task failed");
                        failure.get_or_insert(PoolError::TaskFailed {
                            operation: operation.clone(),
                            index,
                            message: error,
                        });
                    }
                    Ok(reply) => {
                        failure.get_or_insert(PoolError::protocol(
                            unit,
                            format!("expected reply for index {}, got index {}", index, reply.index()),
                        ));
                    }
                    Err(e) => {
                        failure.get_or_insert(PoolError::protocol(
                            unit,
                            format!("undecodable reply: {}", e),
                        ));
                    }
                },
            }

            if !abandoned && events.is_closed() {
                warn!(%operation, dispatched = next_index, inputs = total, "Caller went away, draining in-flight work");
                abandoned = true;
            }

            // Greedy reassignment: the unit that just replied takes the next input
            if failure.is_none() && !abandoned && next_index < total {
                match self.send(unit, &operation, next_index, &mut pending) {
                    Ok(()) => {
                        in_flight[unit] = Some(next_index);
                        next_index += 1;
                        continue;
                    }
                    Err(e) => {
                        failure = Some(e);
                    }
                }
            }

            remaining -= 1;
        }

        let result = match failure {
            None => Ok(()),
            Some(e) => Err(e),
        };
        self.metrics
            .record_invocation_finished(result.is_ok() && !abandoned);
        match &result {
            Ok(()) if abandoned => {
                info!(%operation, dispatched = next_index, inputs = total, "Abandoned invocation drained")
            }
            Ok(()) => info!(%operation, inputs = total, "Invocation complete"),
            Err(e) => warn!(%operation, error = %e, "Invocation failed"),
        }

        {
            let mut state = self.state.lock();
            if matches!(*state, PoolState::Busy(_)) {
                *state = PoolState::Idle;
            }
        }
        let _ = events.send(InvocationEvent::Finished(result));
        true
    }

    fn send(
        &self,
        unit: usize,
        operation: &str,
        index: usize,
        pending: &mut [Option<Value>],
    ) -> Result<()> {
        let input = pending
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| PoolError::internal(format!("input {} already dispatched", index)))?;
        let message = DispatchMessage {
            operation: operation.to_string(),
            input,
            index,
        };
        self.units[unit].send(&message)?;
        self.metrics.record_dispatch(unit);
        debug!(unit, index, %operation, "Dispatched");
        Ok(())
    }
}
