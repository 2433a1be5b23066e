//! Supervisor-side handle to one worker process.
//!
//! The worker is a child process speaking the line protocol on its
//! stdin/stdout. A dedicated thread reads stdout into a channel so requests
//! can wait with a timeout; another thread drains stderr into the log and
//! keeps a short tail for crash reports.

use std::collections::VecDeque;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use local_translate_protocol::{ops, CodecError, LineReader, LineWriter, Request, Response};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;

use crate::models::ModelFamily;

const STDERR_TAIL_LINES: usize = 20;
const STDERR_DRAIN_WAIT: Duration = Duration::from_millis(200);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How to start a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    /// This executable running its built-in `worker` subcommand.
    pub fn builtin(family: ModelFamily) -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec!["worker".into(), "--family".into(), family.as_str().into()],
            env: Vec::new(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The worker answered `status: error`. The worker is still usable.
    #[error("{0}")]
    Application(String),
    #[error("Worker reported a fatal error: {0}")]
    Fatal(String),
    #[error("{0}")]
    Protocol(String),
    #[error("worker process exited unexpectedly{0}")]
    Exited(String),
    #[error("Worker did not respond within {0:?}")]
    Timeout(Duration),
}

/// Called from the stdout reader thread when the worker is lost: its stdout
/// closed ([`WorkerError::Exited`]) or it wrote a line that breaks the
/// protocol ([`WorkerError::Protocol`]). Receives the handle's generation.
pub type ExitHook = Box<dyn FnOnce(u64, WorkerError) + Send + 'static>;

enum ReaderEvent {
    Response(Response),
    Violation(String),
    Closed,
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

fn tail_excerpt(tail: &StderrTail) -> String {
    let tail = tail.lock();
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail.iter().cloned().collect::<Vec<_>>().join(" | "))
    }
}

/// A live worker process serving one model.
pub struct WorkerHandle {
    child: Child,
    pid: u32,
    writer: LineWriter<ChildStdin>,
    responses: Receiver<ReaderEvent>,
    stderr_tail: StderrTail,
    model_id: String,
    generation: u64,
    next_id: u64,
    healthy: bool,
    /// Set by the stdout reader once the worker broke the protocol.
    violated: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Spawn a worker process for `model_id`.
    pub fn spawn(
        command: &WorkerCommand,
        model_id: &str,
        generation: u64,
        on_exit: ExitHook,
    ) -> Result<Self, WorkerError> {
        let spawn_err = |source| WorkerError::Spawn {
            program: command.program.display().to_string(),
            source,
        };

        info!(
            "Spawning worker: {} {} (model '{}', generation {})",
            command.program.display(),
            command.args.join(" "),
            model_id,
            generation
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        let pid = child.id();
        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (stdin, stdout, stderr) = match pipes {
            (Some(i), Some(o), Some(e)) => (i, o, e),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_err(std::io::Error::other("worker pipes unavailable")));
            }
        };

        let stderr_tail: StderrTail = Arc::new(Mutex::new(VecDeque::new()));
        let (stderr_done_tx, stderr_done_rx) = crossbeam_channel::bounded::<()>(0);

        // Thread: stderr -> log + tail
        {
            let tail = stderr_tail.clone();
            thread::Builder::new()
                .name(format!("worker-{}-stderr", pid))
                .spawn(move || {
                    use std::io::BufRead;
                    let _done = stderr_done_tx;
                    for line in BufReader::new(stderr).lines() {
                        let Ok(line) = line else { break };
                        info!(target: "worker", "[{}] {}", pid, line);
                        let mut tail = tail.lock();
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                })
                .map_err(spawn_err)?;
        }

        // Thread: stdout -> response channel
        let (tx, rx): (Sender<ReaderEvent>, Receiver<ReaderEvent>) = crossbeam_channel::unbounded();
        let violated = Arc::new(AtomicBool::new(false));
        {
            let tail = stderr_tail.clone();
            let violated = violated.clone();
            thread::Builder::new()
                .name(format!("worker-{}-stdout", pid))
                .spawn(move || {
                    let mut reader = LineReader::new(BufReader::new(stdout));
                    loop {
                        match reader.next::<Response>() {
                            Ok(Some(response)) => {
                                if tx.send(ReaderEvent::Response(response)).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {
                                debug!("Worker {} closed stdout", pid);
                                let _ = tx.send(ReaderEvent::Closed);
                                // Let stderr finish so the excerpt includes the last words.
                                let _ = stderr_done_rx.recv_timeout(STDERR_DRAIN_WAIT);
                                on_exit(generation, WorkerError::Exited(tail_excerpt(&tail)));
                                break;
                            }
                            Err(e) if e.is_violation() => {
                                warn!("Worker {} broke the protocol: {}", pid, e);
                                violated.store(true, Ordering::SeqCst);
                                let _ = tx.send(ReaderEvent::Violation(e.to_string()));
                                on_exit(generation, WorkerError::Protocol(e.to_string()));
                                // Keep the pipe drained until the supervisor kills the worker.
                                let _ = std::io::copy(reader.get_mut(), &mut std::io::sink());
                                break;
                            }
                            Err(e) => {
                                debug!("Worker {} stdout failed: {}", pid, e);
                                let _ = tx.send(ReaderEvent::Closed);
                                on_exit(generation, WorkerError::Exited(tail_excerpt(&tail)));
                                break;
                            }
                        }
                    }
                })
                .map_err(spawn_err)?;
        }

        Ok(Self {
            child,
            pid,
            writer: LineWriter::new(stdin),
            responses: rx,
            stderr_tail,
            model_id: model_id.to_string(),
            generation,
            next_id: 0,
            healthy: true,
            violated,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The process is running and has not broken the protocol.
    pub fn is_alive(&mut self) -> bool {
        self.healthy
            && !self.violated.load(Ordering::SeqCst)
            && matches!(self.child.try_wait(), Ok(None))
    }

    pub fn stderr_excerpt(&self) -> String {
        tail_excerpt(&self.stderr_tail)
    }

    /// Send one request and wait for its response.
    ///
    /// Any error other than [`WorkerError::Application`] leaves the handle
    /// unhealthy; the caller must tear it down.
    pub fn request(
        &mut self,
        op: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, WorkerError> {
        let result = self.exchange(op, params, timeout);
        if let Err(e) = &result {
            if !matches!(e, WorkerError::Application(_)) {
                self.healthy = false;
            }
        }
        result
    }

    fn exchange(
        &mut self,
        op: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, WorkerError> {
        self.next_id += 1;
        let id = self.next_id;
        let request = Request::new(op, params).with_id(id);

        debug!("-> worker {} #{} {}", self.pid, id, op);
        if let Err(e) = self.writer.send(&request) {
            return Err(match e {
                CodecError::Io(_) => self.exited(),
                other => WorkerError::Protocol(other.to_string()),
            });
        }

        let event = match self.responses.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                error!("Worker {} did not answer '{}' within {:?}", self.pid, op, timeout);
                return Err(WorkerError::Timeout(timeout));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(self.exited()),
        };

        let response = match event {
            ReaderEvent::Response(response) => response,
            ReaderEvent::Violation(message) => return Err(WorkerError::Protocol(message)),
            ReaderEvent::Closed => return Err(self.exited()),
        };

        if response.id() != Some(id) {
            return Err(WorkerError::Protocol(format!(
                "response id {:?} does not match request id {}",
                response.id(),
                id
            )));
        }

        debug!("<- worker {} #{}", self.pid, id);
        match response {
            Response::Ok { result, .. } => Ok(result),
            Response::Error { message, .. } => Err(WorkerError::Application(message)),
            Response::Fatal { message, .. } => Err(WorkerError::Fatal(message)),
        }
    }

    fn exited(&mut self) -> WorkerError {
        // Give the stderr thread a moment to capture the last lines.
        let deadline = Instant::now() + STDERR_DRAIN_WAIT;
        while Instant::now() < deadline && matches!(self.child.try_wait(), Ok(None)) {
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        WorkerError::Exited(self.stderr_excerpt())
    }

    /// Ask the worker to quit, wait up to `grace`, then kill it.
    pub fn shutdown(mut self, grace: Duration) {
        info!("Stopping worker {} (model '{}')", self.pid, self.model_id);
        let _ = self.writer.send(&Request::new(ops::QUIT, serde_json::json!({})));

        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Worker {} exited with {}", self.pid, status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                _ => break,
            }
        }

        warn!("Worker {} ignored quit, killing", self.pid);
        self.kill();
    }

    /// Kill the worker process immediately. OS reclaims all memory.
    pub fn kill(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            debug!("Killing worker process {}", self.pid);
            let _ = self.child.kill();
        }
        let _ = self.child.wait(); // Reap
        self.healthy = false;
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_keeps_subsecond_precision() {
        let err = WorkerError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Worker did not respond within 250ms");
    }
}
