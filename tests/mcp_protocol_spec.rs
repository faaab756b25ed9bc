//! MCP protocol integration tests.
//!
//! These tests spawn the actual `rpg mcp` process and communicate via
//! JSON-RPC over stdio, testing the complete MCP protocol flow.
//!
//! The rmcp library uses line-delimited JSON (each message is one line):
//! ```
//! {"jsonrpc":"2.0","id":1,"method":"initialize",...}\n
//! {"jsonrpc":"2.0","id":1,"result":{...}}\n
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct JsonRpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

/// MCP test client that spawns and communicates with the server
struct McpTestClient {
    child: Child,
    request_id: u64,
    reader: BufReader<std::process::ChildStdout>,
}

impl McpTestClient {
    /// Spawn a new MCP server process with an isolated test database
    fn spawn() -> Self {
        // Create temp directory for test database
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

        let db_path = temp_dir.path().join("phasegate.db");

        let mut child = Command::new(env!("CARGO_BIN_EXE_rpg"))
            .arg("mcp")
            .env("ROCKET_PHASEGATE_DB", &db_path)
            .env("ROCKET_PHASEGATE_CONFIG", temp_dir.path().join("absent.toml"))
            .env_remove("ROCKET_PHASEGATE_API_KEY")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn rpg mcp");

        let stdout = child.stdout.take().expect("Failed to get stdout");
        let reader = BufReader::new(stdout);

        // Keep temp_dir alive by leaking it (tests are short-lived anyway)
        std::mem::forget(temp_dir);

        Self {
            child,
            request_id: 0,
            reader,
        }
    }

    /// Send a message as line-delimited JSON
    fn send_message(&mut self, content: &str) {
        let stdin = self.child.stdin.as_mut().expect("Failed to get stdin");
        writeln!(stdin, "{}", content).expect("Failed to write message");
        stdin.flush().expect("Failed to flush stdin");
    }

    /// Read a message as line-delimited JSON
    fn read_message(&mut self) -> String {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .expect("Failed to read line");
        line.trim().to_string()
    }

    /// Send a JSON-RPC request and get the response
    fn request(&mut self, method: &str, params: Option<Value>) -> JsonRpcResponse {
        self.request_id += 1;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id,
            method: method.to_string(),
            params,
        };

        let request_json = serde_json::to_string(&request).expect("Failed to serialize request");
        self.send_message(&request_json);

        let response_json = self.read_message();
        serde_json::from_str(&response_json).expect("Failed to parse response")
    }

    /// Send initialize request and initialized notification (required first messages)
    fn initialize(&mut self) -> JsonRpcResponse {
        let response = self.request(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "test-client",
                    "version": "1.0.0"
                }
            })),
        );

        // Send initialized notification (required by MCP protocol)
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        self.send_message(&notification.to_string());

        response
    }

    /// List available tools
    fn list_tools(&mut self) -> JsonRpcResponse {
        self.request("tools/list", None)
    }

    /// Call a tool with parameters
    fn call_tool(&mut self, name: &str, arguments: Value) -> JsonRpcResponse {
        self.request(
            "tools/call",
            Some(json!({
                "name": name,
                "arguments": arguments
            })),
        )
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// ============================================================
// Protocol Tests
// ============================================================

/// Helper to extract text content from MCP tool response
fn extract_text_content(response: &JsonRpcResponse) -> String {
    response
        .result
        .as_ref()
        .and_then(|r| r.get("content"))
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .expect("Expected text content in response")
        .to_string()
}

fn call_json(client: &mut McpTestClient, name: &str, arguments: Value) -> Value {
    let response = client.call_tool(name, arguments);
    assert!(
        response.error.is_none(),
        "{} failed: {:?}",
        name,
        response.error
    );
    serde_json::from_str(&extract_text_content(&response)).expect("Expected JSON in text")
}

mod protocol {
    use super::*;

    #[test]
    fn initialize_returns_server_info() {
        let mut client = McpTestClient::spawn();
        let response = client.initialize();

        assert!(response.error.is_none(), "Expected success, got error");
        let result = response.result.expect("Expected result");

        assert_eq!(result["serverInfo"]["name"].as_str(), Some("rocket-phasegate"));
        assert!(result.get("capabilities").is_some());
        assert!(result.get("instructions").is_some());
    }

    #[test]
    fn tools_list_returns_all_tools() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.list_tools();
        assert!(response.error.is_none(), "Expected success, got error");

        let result = response.result.expect("Expected result");
        let tools_array = result
            .get("tools")
            .and_then(|t| t.as_array())
            .expect("Expected tools array");

        assert_eq!(
            tools_array.len(),
            37,
            "Expected 37 tools, got {}",
            tools_array.len()
        );

        let tool_names: Vec<&str> = tools_array
            .iter()
            .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
            .collect();

        for expected in [
            "create_feature",
            "get_feature",
            "list_features",
            "feature_history",
            "transition_phase",
            "complete_feature",
            "escalate_feature",
            "resume_feature",
            "cancel_feature",
            "record_pull_request",
            "record_gate",
            "open_blocker",
            "list_blockers",
            "resolve_blocker",
            "start_invocation",
            "end_invocation",
            "backfill_invocation",
            "check_coverage",
            "submit_task_list",
            "get_task_list",
            "create_learning",
            "evolve_learning",
            "validate_learning",
            "reference_learning",
            "list_learnings",
            "learning_chain",
            "scan_conflicts",
            "report_conflict",
            "resolve_conflict",
            "compute_targets",
            "propagation_queue",
            "record_propagation",
            "evaluate_feature",
            "evaluate_system",
            "list_alerts",
            "acknowledge_alert",
            "resolve_alert",
        ] {
            assert!(tool_names.contains(&expected), "missing tool {}", expected);
        }
    }

    #[test]
    fn tools_have_descriptions_and_schemas() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.list_tools();
        let result = response.result.expect("Expected result");
        let tools = result
            .get("tools")
            .expect("Expected tools")
            .as_array()
            .expect("Tools should be array");

        for tool in tools {
            let name = tool.get("name").and_then(|n| n.as_str()).unwrap_or("?");
            assert!(
                tool.get("description").is_some(),
                "Tool {} missing description",
                name
            );
            assert!(
                tool.get("inputSchema").is_some(),
                "Tool {} missing inputSchema",
                name
            );
        }
    }
}

// ============================================================
// Tool Call Tests
// ============================================================

mod tool_calls {
    use super::*;

    #[test]
    fn create_feature_and_list_features() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let feature = call_json(
            &mut client,
            "create_feature",
            json!({
                "id": "FEAT-7",
                "name": "Rate limiting",
                "complexity_level": 2,
                "author": "alice"
            }),
        );
        assert_eq!(feature["id"].as_str(), Some("FEAT-7"));
        assert_eq!(feature["current_phase"].as_u64(), Some(0));
        assert_eq!(feature["status"].as_str(), Some("IN_PROGRESS"));

        let list = call_json(&mut client, "list_features", json!({}));
        assert_eq!(list.as_array().map(|a| a.len()), Some(1));
    }

    #[test]
    fn phase_work_with_telemetry() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        call_json(
            &mut client,
            "create_feature",
            json!({ "id": "FEAT-7", "name": "Rate limiting", "complexity_level": 1, "author": "alice" }),
        );
        call_json(
            &mut client,
            "transition_phase",
            json!({ "feature_id": "FEAT-7", "to_phase": 1, "actor": "orchestrator" }),
        );

        let invocation = call_json(
            &mut client,
            "start_invocation",
            json!({
                "feature_id": "FEAT-7",
                "phase": 1,
                "agent_name": "discovery",
                "operation": "map existing middleware"
            }),
        );
        let invocation_id = invocation["id"].as_str().unwrap();
        let ended = call_json(
            &mut client,
            "end_invocation",
            json!({ "invocation_id": invocation_id }),
        );
        assert!(ended["duration_ms"].as_i64().is_some());

        let coverage = call_json(&mut client, "check_coverage", json!({ "feature_id": "FEAT-7" }));
        assert_eq!(coverage["covered"].as_array().map(|a| a.len()), Some(1));
        assert_eq!(coverage["passed"].as_bool(), Some(false));

        let context = call_json(&mut client, "get_feature", json!({ "feature_id": "FEAT-7" }));
        assert_eq!(context["feature"]["current_phase"].as_u64(), Some(1));
    }

    #[test]
    fn learning_round_trip() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let learning = call_json(
            &mut client,
            "create_learning",
            json!({
                "category": "convention",
                "title": "Header names",
                "content": "Use lowercase header names in middleware",
                "confidence": 0.7
            }),
        );
        let learning_id = learning["id"].as_str().unwrap();

        let validated = call_json(
            &mut client,
            "validate_learning",
            json!({ "learning_id": learning_id, "validated_by": "guardian" }),
        );
        assert_eq!(validated["confidence"].as_f64(), Some(0.85));
        assert_eq!(validated["validation_count"].as_u64(), Some(1));
    }
}

// ============================================================
// Error Handling Tests
// ============================================================

mod errors {
    use super::*;

    #[test]
    fn invalid_tool_name_returns_error() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.call_tool("nonexistent_tool", json!({}));

        assert!(response.error.is_some(), "Expected error for invalid tool");
    }

    #[test]
    fn domain_refusal_carries_error_kind() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        call_json(
            &mut client,
            "create_feature",
            json!({ "id": "FEAT-7", "name": "Rate limiting", "complexity_level": 1, "author": "alice" }),
        );
        let response = client.call_tool(
            "transition_phase",
            json!({ "feature_id": "FEAT-7", "to_phase": 4, "actor": "orchestrator" }),
        );

        let error = response.error.expect("Expected error for forward skip");
        assert_eq!(error.code, -32602);
        assert_eq!(
            error.data.as_ref().and_then(|d| d["kind"].as_str()),
            Some("state_error")
        );
    }

    #[test]
    fn missing_required_param_returns_error() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        // create_feature requires 'id', 'name', 'complexity_level' and 'author'
        let response = client.call_tool("create_feature", json!({ "name": "x" }));

        assert!(
            response.error.is_some() || {
                response
                    .result
                    .as_ref()
                    .and_then(|r| r.get("isError"))
                    .and_then(|e| e.as_bool())
                    .unwrap_or(false)
            }
        );
    }
}
