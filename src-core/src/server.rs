//! JSON-lines transport for the command gateway (`local-translate serve`).
//!
//! Each input line is `{"id", "command", "args"}`. Every request runs as its
//! own task, so a long download never holds up a status query. A single
//! writer task owns the output stream; responses and progress events are
//! written whole, one per line.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::commands::{dispatch, Commands};
use crate::error::{CommandError, ErrorPayload};
use crate::models::{ChannelSink, DownloadProgress, ProgressSink};
use local_translate_protocol::encode_line;

#[derive(Debug, Deserialize)]
struct IncomingRequest {
    #[serde(default)]
    id: Value,
    command: String,
    #[serde(default)]
    args: Value,
}

/// One line written to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Progress {
        id: Value,
        event: String,
        payload: DownloadProgress,
    },
    Reply {
        id: Value,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
}

impl Outbound {
    fn progress(id: Value, payload: DownloadProgress) -> Self {
        Outbound::Progress {
            id,
            event: "progress".to_string(),
            payload,
        }
    }

    fn reply(id: Value, result: Result<Value, CommandError>) -> Self {
        match result {
            Ok(value) => Outbound::Reply {
                id,
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Outbound::Reply {
                id,
                ok: false,
                result: None,
                error: Some(ErrorPayload::from(&e)),
            },
        }
    }
}

/// Serve commands from `input` until it closes, then wait for in-flight
/// requests and stop both workers.
pub async fn serve<R, W>(commands: Commands, input: R, output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let writer = tokio::spawn(write_loop(rx, output));

    let mut tasks = JoinSet::new();
    let mut lines = input.lines();
    info!("Serving {} commands", crate::commands::COMMANDS.len());

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: IncomingRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting unreadable request: {}", e);
                let err = CommandError::InvalidArguments(format!("unreadable request: {}", e));
                let _ = tx.send(Outbound::reply(Value::Null, Err(err)));
                continue;
            }
        };

        debug!("Command #{} {}", request.id, request.command);
        let commands = commands.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let progress_id = request.id.clone();
            let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink::new(tx.clone(), move |p| {
                Outbound::progress(progress_id.clone(), p)
            }));
            let result = dispatch(&commands, &request.command, request.args, sink).await;
            if let Err(e) = &result {
                debug!("Command #{} {} failed: {}", request.id, request.command, e);
            }
            let _ = tx.send(Outbound::reply(request.id, result));
        });

        // Reap finished requests as we go.
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Command task failed: {}", e);
            }
        }
    }

    info!("Input closed, waiting for {} pending commands", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Command task failed: {}", e);
        }
    }

    drop(tx);
    match writer.await {
        Ok(result) => result?,
        Err(e) => error!("Writer task failed: {}", e),
    }

    commands.shutdown().await;
    Ok(())
}

async fn write_loop<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut output: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode reply: {}", e);
                continue;
            }
        };
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(())
}
