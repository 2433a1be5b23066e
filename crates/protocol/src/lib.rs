//! Line-delimited JSON protocol spoken between the supervisor and its model
//! workers.
//!
//! Every message is one compact JSON object followed by a single `\n`. The
//! supervisor writes [`Request`]s to the worker's stdin and reads one
//! [`Response`] per request from its stdout.
//!
//! # Example
//!
//! ```
//! use local_translate_protocol::{LineReader, LineWriter, Request, Response};
//! use serde_json::json;
//!
//! let mut wire = Vec::new();
//! LineWriter::new(&mut wire)
//!     .send(&Response::ok(Some(1), json!("hola")))
//!     .unwrap();
//!
//! let mut reader = LineReader::new(wire.as_slice());
//! let response: Response = reader.next().unwrap().unwrap();
//! assert_eq!(response.id(), Some(1));
//!
//! let request = Request::new("ping", json!({})).with_id(2);
//! assert_eq!(request.op, "ping");
//! ```

mod codec;
mod envelope;

pub use codec::{encode_line, CodecError, LineReader, LineWriter, DEFAULT_MAX_LINE_BYTES};
pub use envelope::{Request, Response};

/// Operation names understood by the built-in workers.
pub mod ops {
    pub const LOAD: &str = "load";
    pub const TRANSLATE: &str = "translate";
    pub const SYNTHESIZE: &str = "synthesize";
    pub const PING: &str = "ping";
    pub const QUIT: &str = "quit";
}
