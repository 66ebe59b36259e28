//! Process-backed execution units
//!
//! Each unit is a child process exchanging newline-delimited JSON frames over
//! stdin/stdout. The child side is [`serve_stdio`]; stderr is inherited so
//! unit logs reach the host terminal.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::errors::{PoolError, Result};
use crate::module::Module;
use crate::protocol::{ready_frame, DispatchMessage, Envelope};
use crate::unit::{ExecutionUnit, Outbox, UnitRuntime};

/// Environment variable carrying the unit id into the child
pub const UNIT_ID_ENV: &str = "WOOL_UNIT_ID";
/// Environment variable carrying the unit name into the child
pub const UNIT_NAME_ENV: &str = "WOOL_UNIT_NAME";

/// Runtime that runs every unit as a child process
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    program: PathBuf,
    args: Vec<OsString>,
    operations: Vec<String>,
}

impl ProcessRuntime {
    /// `operations` declares what the unit program exports
    pub fn new<I, S>(program: impl Into<PathBuf>, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: Vec::new(),
            operations: operations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[async_trait]
impl UnitRuntime for ProcessRuntime {
    fn operations(&self) -> Vec<String> {
        self.operations.clone()
    }

    async fn spawn(
        &self,
        id: usize,
        name: String,
        outbox: Outbox,
    ) -> Result<Arc<dyn ExecutionUnit>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(UNIT_ID_ENV, id.to_string())
            .env(UNIT_NAME_ENV, &name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PoolError::startup(
                    id,
                    format!("failed to start {}: {}", self.program.display(), e),
                )
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::startup(id, "child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::startup(id, "child stdout was not captured"))?;

        let terminated = Arc::new(AtomicBool::new(false));
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // Writer: dispatch frames -> child stdin
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // Reader: child stdout -> shared outbox
        let flag = terminated.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if flag.load(Ordering::Acquire) {
                            return;
                        }
                        if line.trim().is_empty() {
                            continue;
                        }
                        // Non-JSON output is forwarded verbatim and fails decoding upstream
                        let frame = serde_json::from_str(&line).unwrap_or(Value::String(line));
                        if outbox.send(Envelope::frame(id, frame)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(unit = id, error = %e, "Failed reading unit stdout");
                        break;
                    }
                }
            }
            if !flag.load(Ordering::Acquire) {
                let _ = outbox.send(Envelope::exited(id));
            }
        });

        // Lifecycle: reap the child, or kill it on terminate
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    debug!(unit = id, ?status, "Unit process exited");
                }
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(unit = id, error = %e, "Failed to kill unit process");
                    }
                }
            }
        });

        Ok(Arc::new(ProcessUnit {
            id,
            lines: Mutex::new(Some(line_tx)),
            kill: Mutex::new(Some(kill_tx)),
            terminated,
        }))
    }
}

struct ProcessUnit {
    id: usize,
    lines: Mutex<Option<mpsc::UnboundedSender<String>>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    terminated: Arc<AtomicBool>,
}

impl ExecutionUnit for ProcessUnit {
    fn id(&self) -> usize {
        self.id
    }

    fn send(&self, message: &DispatchMessage) -> Result<()> {
        let line = serde_json::to_string(message)?;
        let lines = self.lines.lock();
        let tx = lines
            .as_ref()
            .ok_or_else(|| PoolError::transport(self.id, "unit has been terminated"))?;
        tx.send(line)
            .map_err(|_| PoolError::transport(self.id, "unit stdin is closed"))
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.lines.lock().take();
        if let Some(kill) = self.kill.lock().take() {
            let _ = kill.send(());
        }
    }
}

/// Serve `module` over stdin/stdout until stdin closes
///
/// This is the body of a unit program: it announces readiness, then answers
/// one dispatch frame per input line.
pub fn serve_stdio(module: Module) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(module, stdin.lock(), stdout.lock())
}

fn serve<R: BufRead, W: Write>(module: Module, input: R, mut output: W) -> anyhow::Result<()> {
    writeln!(output, "{}", ready_frame())?;
    output.flush()?;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Value>(&line) {
            Ok(frame) => module.handle_frame(frame),
            Err(e) => json!({ "error": format!("invalid JSON frame: {}", e) }),
        };
        writeln!(output, "{}", reply)?;
        output.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_answers_each_line() {
        let module = Module::builder()
            .typed("double", |x: i64| Ok(x * 2))
            .build()
            .unwrap();
        let input = concat!(
            r#"{"operation":"double","input":21,"index":0}"#,
            "\n\n",
            r#"{"operation":"double","input":"x","index":1}"#,
            "\nnot json\n"
        );

        let mut output = Vec::new();
        serve(module, input.as_bytes(), &mut output).unwrap();

        let frames: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], json!("ready"));
        assert_eq!(frames[1], json!({"output": 42, "index": 0}));
        assert_eq!(frames[2]["index"], json!(1));
        assert!(frames[2]["error"].is_string());
        assert!(frames[3].get("index").is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_startup_error() {
        let runtime = ProcessRuntime::new("/nonexistent/wool-unit", ["square"]);
        let (outbox, _events) = mpsc::unbounded_channel();
        let err = match runtime.spawn(2, "missing".into(), outbox).await {
            Ok(_) => panic!("spawn should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, PoolError::Startup { unit: 2, .. }));
    }
}
