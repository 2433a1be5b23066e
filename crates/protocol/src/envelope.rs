//! Envelope types for protocol requests and responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn empty_params() -> Value {
    Value::Object(Map::new())
}

/// A request written by the supervisor to a worker's input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id. When present the worker must echo it in its response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Operation name (`load`, `translate`, `synthesize`, `ping`, `quit`, ...).
    pub op: String,

    /// Operation parameters. Always a JSON object on the wire.
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl Request {
    /// Create a request without a correlation id.
    pub fn new(op: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            op: op.into(),
            params,
        }
    }

    /// Attach a correlation id.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }
}

/// A response written by a worker to its output stream.
///
/// `Fatal` means the worker cannot serve further requests and must be torn
/// down by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        #[serde(default)]
        result: Value,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        message: String,
    },
    Fatal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        message: String,
    },
}

impl Response {
    pub fn ok(id: Option<u64>, result: Value) -> Self {
        Self::Ok { id, result }
    }

    pub fn error(id: Option<u64>, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            message: message.into(),
        }
    }

    pub fn fatal(id: Option<u64>, message: impl Into<String>) -> Self {
        Self::Fatal {
            id,
            message: message.into(),
        }
    }

    /// The correlation id carried by this response, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Ok { id, .. } | Self::Error { id, .. } | Self::Fatal { id, .. } => *id,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
