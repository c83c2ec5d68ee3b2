//! MCP server: line-delimited JSON-RPC 2.0 over stdio.
//!
//! One session per child process. The handshake is `initialize` /
//! `notifications/initialized`, then `tools/list` and `tools/call`.
//! Logging goes to stderr; stdout carries only protocol frames.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::protocol::{Request, Response, RpcError, JSONRPC_VERSION};
use crate::tools::{all_tools, ToolResult};

const SERVER_NAME: &str = "guardiand";
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Implemented by whatever executes tool calls.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, name: &str, arguments: Value) -> ToolResult;
}

pub struct McpServer<H: ToolHandler> {
    handler: Arc<H>,
}

impl<H: ToolHandler> McpServer<H> {
    pub fn new(handler: H) -> Self {
        McpServer {
            handler: Arc::new(handler),
        }
    }

    /// Serve stdio until EOF.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("MCP server listening on stdio");
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);

        let mut line = String::new();
        loop {
            line.clear();
            let bytes = reader.read_line(&mut line).await?;
            if bytes == 0 {
                info!("stdin closed, shutting down");
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: Request = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Unparseable frame");
                    let resp = Response::failure(None, RpcError::parse_error(e.to_string()));
                    write_frame(&mut stdout, &resp).await?;
                    continue;
                }
            };

            if request.is_notification() {
                debug!(method = %request.method, "Notification");
                continue;
            }

            let response = self.dispatch(request).await;
            write_frame(&mut stdout, &response).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, request: Request) -> Response {
        let id = request.id.clone();
        debug!(method = %request.method, "Request");
        match request.method.as_str() {
            "initialize" => Response::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ),
            "ping" => Response::success(id, json!({})),
            "tools/list" => Response::success(id, json!({ "tools": all_tools() })),
            "tools/call" => {
                let params = request.params.unwrap_or(Value::Null);
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return Response::failure(
                        id,
                        RpcError::invalid_params("tools/call requires a tool name"),
                    );
                };
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let result = self.handler.call(name, arguments).await;
                match serde_json::to_value(&result) {
                    Ok(value) => Response::success(id, value),
                    Err(e) => Response::failure(id, RpcError::internal(e.to_string())),
                }
            }
            other => Response::failure(id, RpcError::method_not_found(other)),
        }
    }
}

async fn write_frame(
    stdout: &mut tokio::io::Stdout,
    response: &Response,
) -> anyhow::Result<()> {
    debug_assert_eq!(response.jsonrpc, JSONRPC_VERSION);
    let mut frame = serde_json::to_string(response)?;
    frame.push('\n');
    stdout.write_all(frame.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
