//! Worker process entry point.
//!
//! Runs as a child process spawned by a model manager. Reads one request per
//! line from stdin, runs it on an [`Engine`], and writes one response per
//! line to the protocol stream. All log output goes to stderr.

use std::io::{self, BufRead, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use local_translate_protocol::{ops, LineReader, LineWriter, Request, Response};
use log::{debug, error, info, warn};
use serde_json::{json, Value};

/// Inference backend hosted by a worker process.
pub trait Engine {
    /// Load weights from a model directory.
    fn load(&mut self, model_path: &std::path::Path) -> Result<(), String>;

    /// Handle any op other than `load`, `ping` and `quit`.
    fn handle(&mut self, op: &str, params: &Value) -> Result<Value, String>;
}

/// Why the worker loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `quit` received
    Quit,
    /// stdin closed (supervisor gone)
    EndOfInput,
    /// A fatal response was sent; exit non-zero
    Fatal,
}

/// Serve requests until `quit`, end of input, or a fatal error.
pub fn run<E, R, W>(mut engine: E, input: R, output: W) -> RunOutcome
where
    E: Engine,
    R: BufRead,
    W: Write,
{
    let mut reader = LineReader::new(input);
    let mut writer = LineWriter::new(output);
    let mut loaded: Option<PathBuf> = None;

    info!("Worker ready (pid={})", std::process::id());

    loop {
        let request: Request = match reader.next() {
            Ok(Some(request)) => request,
            Ok(None) => {
                info!("Input closed, exiting");
                return RunOutcome::EndOfInput;
            }
            Err(e) if e.is_violation() => {
                error!("Unreadable request: {}", e);
                send(&mut writer, &Response::fatal(None, format!("Invalid request: {}", e)));
                return RunOutcome::Fatal;
            }
            Err(e) => {
                error!("Failed to read request: {}", e);
                return RunOutcome::EndOfInput;
            }
        };

        let id = request.id;
        debug!("Request #{:?} {}", id, request.op);

        let response = match request.op.as_str() {
            ops::QUIT => {
                info!("Quit requested");
                return RunOutcome::Quit;
            }
            ops::PING => Response::ok(id, json!({ "loaded": loaded.is_some() })),
            ops::LOAD => match load(&mut engine, &request.params) {
                Ok(path) => {
                    info!("Model loaded from {:?}", path);
                    loaded = Some(path);
                    Response::ok(id, Value::Null)
                }
                Err(message) => {
                    warn!("Load failed: {}", message);
                    Response::error(id, message)
                }
            },
            op if loaded.is_none() => {
                debug!("'{}' before load", op);
                Response::error(id, "No model loaded")
            }
            op => match catch_unwind(AssertUnwindSafe(|| engine.handle(op, &request.params))) {
                Ok(Ok(result)) => Response::ok(id, result),
                Ok(Err(message)) => Response::error(id, message),
                Err(panic) => {
                    let message = panic_message(&panic);
                    error!("Engine panicked during '{}': {}", op, message);
                    send(&mut writer, &Response::fatal(id, message));
                    return RunOutcome::Fatal;
                }
            },
        };

        if !send(&mut writer, &response) {
            return RunOutcome::EndOfInput;
        }
    }
}

fn load<E: Engine>(engine: &mut E, params: &Value) -> Result<PathBuf, String> {
    let path = params
        .get("modelPath")
        .and_then(Value::as_str)
        .ok_or_else(|| "Missing 'modelPath' parameter".to_string())?;
    let path = PathBuf::from(path);
    if !path.is_dir() {
        return Err(format!("Model path not found: {}", path.display()));
    }

    match catch_unwind(AssertUnwindSafe(|| engine.load(&path))) {
        Ok(result) => result.map(|()| path),
        Err(panic) => Err(format!("Model load panicked: {}", panic_message(&panic))),
    }
}

fn send<W: Write>(writer: &mut LineWriter<W>, response: &Response) -> bool {
    match writer.send(response) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to write response: {}", e);
            false
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "engine panicked".to_string()
    }
}

/// Detach the protocol stream from fd 1.
///
/// Returns a writer on a duplicate of the original stdout and points fd 1 at
/// `/dev/null`, so stray prints from native libraries cannot corrupt framing.
#[cfg(unix)]
pub fn protocol_output() -> io::Result<Box<dyn Write + Send>> {
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::{AsRawFd, FromRawFd};

    io::stdout().flush()?;

    // SAFETY: dup on a valid descriptor; the result is owned by the File below.
    let fd = unsafe { libc::dup(libc::STDOUT_FILENO) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by dup and is not owned elsewhere.
    let protocol = unsafe { File::from_raw_fd(fd) };

    let devnull = OpenOptions::new().write(true).open("/dev/null")?;
    // SAFETY: both descriptors are valid for the duration of the call.
    if unsafe { libc::dup2(devnull.as_raw_fd(), libc::STDOUT_FILENO) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(Box::new(protocol))
}

#[cfg(not(unix))]
pub fn protocol_output() -> io::Result<Box<dyn Write + Send>> {
    Ok(Box::new(io::stdout()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Echo {
        loads: usize,
    }

    impl Engine for Echo {
        fn load(&mut self, _model_path: &std::path::Path) -> Result<(), String> {
            self.loads += 1;
            Ok(())
        }

        fn handle(&mut self, op: &str, params: &Value) -> Result<Value, String> {
            match op {
                "echo" => Ok(params.clone()),
                "boom" => panic!("kaboom"),
                other => Err(format!("Unknown op: {}", other)),
            }
        }
    }

    fn run_lines(lines: &[String]) -> (RunOutcome, Vec<Response>) {
        let input = lines.join("\n") + "\n";
        let mut output = Vec::new();
        let outcome = run(Echo::default(), Cursor::new(input.into_bytes()), &mut output);

        let mut reader = LineReader::new(Cursor::new(output));
        let mut responses = Vec::new();
        while let Some(r) = reader.next::<Response>().unwrap() {
            responses.push(r);
        }
        (outcome, responses)
    }

    fn load_line(id: u64, dir: &std::path::Path) -> String {
        json!({"id": id, "op": "load", "params": {"modelPath": dir}}).to_string()
    }

    #[test]
    fn serves_until_quit() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec![
            r#"{"id":1,"op":"ping","params":{}}"#.to_string(),
            r#"{"id":2,"op":"echo","params":{"a":1}}"#.to_string(),
            load_line(3, dir.path()),
            String::new(),
            r#"{"id":4,"op":"echo","params":{"a":1}}"#.to_string(),
            r#"{"id":5,"op":"nope","params":{}}"#.to_string(),
            r#"{"id":6,"op":"quit","params":{}}"#.to_string(),
            r#"{"id":7,"op":"ping","params":{}}"#.to_string(),
        ];

        let (outcome, responses) = run_lines(&lines);

        assert_eq!(outcome, RunOutcome::Quit);
        assert_eq!(
            responses,
            vec![
                Response::ok(Some(1), json!({"loaded": false})),
                Response::error(Some(2), "No model loaded"),
                Response::ok(Some(3), Value::Null),
                Response::ok(Some(4), json!({"a": 1})),
                Response::error(Some(5), "Unknown op: nope"),
            ]
        );
    }

    #[test]
    fn missing_model_dir_is_an_application_error() {
        let lines = vec![
            r#"{"id":1,"op":"load","params":{"modelPath":"/definitely/not/here"}}"#.to_string(),
            r#"{"id":2,"op":"load","params":{}}"#.to_string(),
        ];

        let (outcome, responses) = run_lines(&lines);

        assert_eq!(outcome, RunOutcome::EndOfInput);
        assert!(matches!(&responses[0], Response::Error { id: Some(1), message } if message.contains("not found")));
        assert!(matches!(&responses[1], Response::Error { id: Some(2), .. }));
    }

    #[test]
    fn malformed_input_is_fatal() {
        let lines = vec![
            r#"{"id":1,"op":"ping","params":{}}"#.to_string(),
            "this is not json".to_string(),
            r#"{"id":2,"op":"ping","params":{}}"#.to_string(),
        ];

        let (outcome, responses) = run_lines(&lines);

        assert_eq!(outcome, RunOutcome::Fatal);
        assert_eq!(responses.len(), 2);
        assert!(responses[1].is_fatal());
    }

    #[test]
    fn engine_panic_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec![
            load_line(1, dir.path()),
            r#"{"id":2,"op":"boom","params":{}}"#.to_string(),
        ];

        let (outcome, responses) = run_lines(&lines);

        assert_eq!(outcome, RunOutcome::Fatal);
        assert_eq!(responses.last(), Some(&Response::fatal(Some(2), "kaboom")));
    }
}
