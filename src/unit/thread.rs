//! Thread-backed execution units
//!
//! Each unit is a dedicated OS thread that loads its own [`Module`] from the
//! runtime's factory. Messages cross the boundary as owned JSON frames.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::core::errors::{PoolError, Result};
use crate::module::Module;
use crate::protocol::{ready_frame, DispatchMessage, Envelope};
use crate::unit::{ExecutionUnit, Outbox, UnitRuntime};

/// Builds the module a unit loads
pub type ModuleFactory = Arc<dyn Fn() -> Result<Module> + Send + Sync>;

/// Runtime that runs every unit on its own thread
pub struct ThreadRuntime {
    factory: ModuleFactory,
    operations: Vec<String>,
    stack_size: Option<usize>,
}

impl ThreadRuntime {
    /// Create a runtime whose units each load a fresh module from `factory`
    ///
    /// The factory is called once here to learn the module's operations.
    pub fn new<F>(factory: F) -> Result<Self>
    where
        F: Fn() -> Result<Module> + Send + Sync + 'static,
    {
        let operations = factory()?.names();
        Ok(Self {
            factory: Arc::new(factory),
            operations,
            stack_size: None,
        })
    }

    /// Create a runtime whose units load copies of `module`
    pub fn from_module(module: Module) -> Self {
        let operations = module.names();
        Self {
            factory: Arc::new(move || Ok(module.clone())),
            operations,
            stack_size: None,
        }
    }

    /// Stack size for unit threads
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

#[async_trait]
impl UnitRuntime for ThreadRuntime {
    fn operations(&self) -> Vec<String> {
        self.operations.clone()
    }

    async fn spawn(
        &self,
        id: usize,
        name: String,
        outbox: Outbox,
    ) -> Result<Arc<dyn ExecutionUnit>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));

        let mut builder = std::thread::Builder::new().name(name);
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let factory = self.factory.clone();
        let flag = terminated.clone();
        builder
            .spawn(move || unit_main(id, factory, rx, outbox, flag))
            .map_err(|e| PoolError::startup(id, format!("failed to spawn thread: {}", e)))?;

        Ok(Arc::new(ThreadUnit {
            id,
            inbox: Mutex::new(Some(tx)),
            terminated,
        }))
    }
}

fn unit_main(
    id: usize,
    factory: ModuleFactory,
    mut inbox: mpsc::UnboundedReceiver<Value>,
    outbox: Outbox,
    terminated: Arc<AtomicBool>,
) {
    let module = match factory() {
        Ok(module) => module,
        Err(e) => {
            error!(unit = id, error = %e, "Unit failed to load module");
            // Anything but the sentinel fails the handshake
            let _ = outbox.send(Envelope::frame(
                id,
                Value::String(format!("failed to load module: {}", e)),
            ));
            return;
        }
    };

    if outbox.send(Envelope::frame(id, ready_frame())).is_err() {
        return;
    }

    while let Some(frame) = inbox.blocking_recv() {
        if terminated.load(Ordering::Acquire) {
            break;
        }
        let reply = module.handle_frame(frame);
        if terminated.load(Ordering::Acquire) {
            break;
        }
        if outbox.send(Envelope::frame(id, reply)).is_err() {
            break;
        }
    }

    if !terminated.load(Ordering::Acquire) {
        let _ = outbox.send(Envelope::exited(id));
    }
    debug!(unit = id, "Unit thread stopped");
}

struct ThreadUnit {
    id: usize,
    inbox: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    terminated: Arc<AtomicBool>,
}

impl ExecutionUnit for ThreadUnit {
    fn id(&self) -> usize {
        self.id
    }

    fn send(&self, message: &DispatchMessage) -> Result<()> {
        let frame = serde_json::to_value(message)?;
        let inbox = self.inbox.lock();
        let tx = inbox
            .as_ref()
            .ok_or_else(|| PoolError::transport(self.id, "unit has been terminated"))?;
        tx.send(frame)
            .map_err(|_| PoolError::transport(self.id, "unit thread has stopped"))
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        // closing the inbox wakes the thread so it can exit
        self.inbox.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UnitEvent;
    use serde_json::json;

    fn squares() -> Module {
        Module::builder()
            .typed("square", |x: i64| Ok(x * x))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unit_handshake_and_reply() {
        let runtime = ThreadRuntime::from_module(squares());
        assert_eq!(runtime.operations(), vec!["square"]);

        let (outbox, mut events) = mpsc::unbounded_channel();
        let unit = runtime.spawn(0, "test-unit-0".into(), outbox).await.unwrap();

        let ready = events.recv().await.unwrap();
        assert_eq!(ready, Envelope::frame(0, json!("ready")));

        unit.send(&DispatchMessage {
            operation: "square".into(),
            input: json!(12),
            index: 5,
        })
        .unwrap();
        let reply = events.recv().await.unwrap();
        assert_eq!(reply.unit, 0);
        assert_eq!(reply.event, UnitEvent::Frame(json!({"output": 144, "index": 5})));

        unit.terminate();
        assert!(unit
            .send(&DispatchMessage {
                operation: "square".into(),
                input: json!(1),
                index: 6,
            })
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_load_breaks_handshake() {
        let runtime = ThreadRuntime::new({
            let calls = std::sync::atomic::AtomicUsize::new(0);
            move || {
                // the probe call succeeds, every unit load fails
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    squares_result()
                } else {
                    Err(PoolError::internal("no gpu"))
                }
            }
        })
        .unwrap();

        let (outbox, mut events) = mpsc::unbounded_channel();
        let _unit = runtime.spawn(3, "test-unit-3".into(), outbox).await.unwrap();

        let first = events.recv().await.unwrap();
        match first.event {
            UnitEvent::Frame(Value::String(s)) => assert!(s.contains("no gpu")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn squares_result() -> Result<Module> {
        Ok(squares())
    }
}
