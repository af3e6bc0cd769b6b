// server.rs — Interception socket: newline-delimited JSON over a Unix socket.
//
// One request per line, one response line per request. A line that does not
// parse gets an error response; the connection stays open.

use std::path::Path;
use std::sync::Arc;

use ag_gateway::Gateway;
use ag_monitor::{CheckMode, HealthCheckReport};
use ag_policy::ValidationResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Intercept { operation: String, target: String },
    InterceptBatch { requests: Vec<Operation> },
    Health {
        #[serde(default)]
        mode: Option<CheckMode>,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation: String,
    pub target: String,
}

/// One entry of a batch response, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchEntry {
    Decided(ValidationResult),
    Invalid { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Decision(ValidationResult),
    Decisions { results: Vec<BatchEntry> },
    Health(HealthCheckReport),
    Pong,
    Error { message: String },
}

/// Bind the socket, replacing a stale one left by a previous run.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict {}", path.display()))?;
    }
    tracing::info!(socket = %path.display(), "listening");
    Ok(listener)
}

/// Accept connections until the listener fails.
pub async fn serve(listener: UnixListener, gateway: Arc<Gateway>) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await.context("Failed to accept connection")?;
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, gateway).await {
                tracing::warn!(error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, gateway: Arc<Gateway>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(request, &gateway).await,
            Err(e) => Response::Error {
                message: format!("invalid request: {}", e),
            },
        };
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write response")?;
    Ok(())
}

pub async fn handle_request(request: Request, gateway: &Arc<Gateway>) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::Intercept { operation, target } => {
            match gateway.intercept(&operation, &target) {
                Ok(result) => Response::Decision(result),
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }
        Request::InterceptBatch { requests } => {
            let pairs: Vec<(String, String)> = requests
                .into_iter()
                .map(|r| (r.operation, r.target))
                .collect();
            let results = gateway
                .intercept_batch(&pairs)
                .into_iter()
                .map(|r| match r {
                    Ok(result) => BatchEntry::Decided(result),
                    Err(e) => BatchEntry::Invalid {
                        message: e.to_string(),
                    },
                })
                .collect();
            Response::Decisions { results }
        }
        Request::Health { mode } => {
            let mode = mode.unwrap_or(CheckMode::Quick);
            let monitor = Arc::clone(gateway.monitor());
            match tokio::task::spawn_blocking(move || monitor.run_cycle(mode)).await {
                Ok(report) => Response::Health(report),
                Err(e) => Response::Error {
                    message: format!("health check aborted: {}", e),
                },
            }
        }
    }
}
