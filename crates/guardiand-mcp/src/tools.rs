//! Tool definitions for the guardiand MCP surface.
//!
//! Exactly eight tools. Every payload is text; structured results are
//! JSON rendered into the text content.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Tool definition following the MCP schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Tool result content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// Result of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Self {
        let text = serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string());
        ToolResult::text(text)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: Some(true),
        }
    }
}

/// All eight guardiand tools.
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "status",
            "Current guardian snapshot: processes, activity, hang risk, incident, budget, attention",
            json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            "preflight_fix",
            "Scan the assistant log tree and fix it: compress old logs, trim oversized files, delete stale sessions",
            json!({
                "type": "object",
                "properties": {
                    "aggressive": {
                        "type": "boolean",
                        "description": "Halve retention windows and tolerated file sizes"
                    }
                },
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            "doctor",
            "Capture a diagnostic bundle (system info, process snapshot, log tails, journal, state)",
            json!({
                "type": "object",
                "properties": {
                    "outputPath": {
                        "type": "string",
                        "description": "Where to write the bundle (default: data dir, timestamped)"
                    }
                },
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            "nudge",
            "Deterministic safe remediation: log hygiene when thresholds are breached, bundle capture when an incident lacks one. Idempotent, never escalates",
            json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            "budget_get",
            "Concurrency budget summary: cap, slots in use, active leases, hysteresis",
            json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            "budget_acquire",
            "Acquire concurrency slots under the current cap; returns a lease id",
            json!({
                "type": "object",
                "properties": {
                    "slots": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "How many slots to lease"
                    },
                    "ttlSeconds": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Lease lifetime; expired leases are collected automatically"
                    },
                    "reason": {
                        "type": "string",
                        "description": "What the slots are for"
                    }
                },
                "required": ["slots", "ttlSeconds", "reason"]
            }),
        ),
        ToolDefinition::new(
            "budget_release",
            "Release a previously acquired lease",
            json!({
                "type": "object",
                "properties": {
                    "leaseId": {
                        "type": "string",
                        "description": "Id returned by budget_acquire"
                    }
                },
                "required": ["leaseId"]
            }),
        ),
        ToolDefinition::new(
            "recovery_plan",
            "Ordered recovery steps for the current state, naming the tools to call",
            json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        ),
    ]
}

/// Look up a tool definition by name.
pub fn get_tool(name: &str) -> Option<ToolDefinition> {
    all_tools().into_iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_eight_tools() {
        let tools = all_tools();
        assert_eq!(tools.len(), 8);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "status",
                "preflight_fix",
                "doctor",
                "nudge",
                "budget_get",
                "budget_acquire",
                "budget_release",
                "recovery_plan",
            ]
        );
    }

    #[test]
    fn get_tool_finds_known_names_only() {
        assert!(get_tool("budget_acquire").is_some());
        assert!(get_tool("restart_everything").is_none());
    }

    #[test]
    fn acquire_schema_requires_all_fields() {
        let tool = get_tool("budget_acquire").unwrap();
        let required = tool.input_schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
    }

    #[test]
    fn tool_result_shapes() {
        let ok = ToolResult::text("fine");
        assert!(ok.is_error.is_none());

        let err = ToolResult::error("broken");
        assert_eq!(err.is_error, Some(true));

        let json = serde_json::to_string(&ToolResult::text("x")).unwrap();
        assert!(json.contains("\"type\":\"text\""));
    }
}
