//! MCP server for guardiand self-monitoring.
//!
//! A self-contained JSON-RPC 2.0 implementation over stdio plus the
//! eight guardian tools:
//!
//! - `status`: persisted (or degraded live) snapshot
//! - `preflight_fix`: log tree scan + fix with before/after banners
//! - `doctor`: diagnostic bundle capture
//! - `nudge`: deterministic safe remediation
//! - `budget_get` / `budget_acquire` / `budget_release`: concurrency leases
//! - `recovery_plan`: ordered, tool-naming step list
//!
//! Handlers talk to the polling daemon only through the files in the
//! guardian data directory.

pub mod handlers;
pub mod protocol;
pub mod server;
pub mod tools;

pub use handlers::GuardianToolHandler;
pub use protocol::{Request, RequestId, Response, RpcError};
pub use server::{McpServer, ToolHandler};
pub use tools::{all_tools, get_tool, ToolContent, ToolDefinition, ToolResult};
