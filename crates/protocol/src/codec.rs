use std::io::{BufRead, Read, Write};

use log::trace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Upper bound for a single protocol line. Synthesized audio travels as base64
/// inside one line, so this is generous.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("I/O error on protocol stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed protocol line: {source} (line: {snippet:?})")]
    Malformed {
        #[source]
        source: serde_json::Error,
        snippet: String,
    },

    #[error("protocol line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },

    #[error("protocol stream ended in the middle of a line")]
    Truncated,

    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// Whether the peer broke framing or wrote something that is not an envelope.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::Malformed { .. } | Self::LineTooLong { .. } | Self::Truncated
        )
    }

    /// Whether the stream itself is gone (closed pipe, peer exited).
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

/// Serialize `value` into one line: compact JSON followed by exactly one `\n`.
///
/// Compact JSON escapes control characters inside strings, so the only raw
/// newline in the buffer is the terminator.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = serde_json::to_vec(value).map_err(CodecError::Encode)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Writes envelopes as newline-terminated JSON.
pub struct LineWriter<W: Write> {
    inner: W,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one envelope with a single `write_all` and flush it.
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        let buf = encode_line(value)?;
        self.inner.write_all(&buf)?;
        self.inner.flush()?;
        trace!("sent protocol line ({} bytes)", buf.len());
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads newline-terminated JSON envelopes.
pub struct LineReader<R: BufRead> {
    inner: R,
    max_line: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_line(inner, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line(inner: R, max_line: usize) -> Self {
        Self {
            inner,
            max_line,
            buf: Vec::new(),
        }
    }

    /// Read the next envelope.
    ///
    /// Returns `Ok(None)` on a clean end of stream. Blank lines are skipped.
    pub fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        loop {
            self.buf.clear();
            let limit = self.max_line as u64 + 1;
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)?;

            if read == 0 {
                return Ok(None);
            }

            if self.buf.last() != Some(&b'\n') {
                if read > self.max_line {
                    return Err(CodecError::LineTooLong {
                        limit: self.max_line,
                    });
                }
                return Err(CodecError::Truncated);
            }

            let line = trim_line(&self.buf);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return serde_json::from_slice(line)
                .map(Some)
                .map_err(|source| CodecError::Malformed {
                    source,
                    snippet: snippet(line),
                });
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &buf[..end]
}

fn snippet(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .chars()
        .take(SNIPPET_CHARS)
        .collect()
}
