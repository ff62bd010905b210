use pretty_assertions::assert_eq;
use pyrepl::Installer;
use pyrepl_mcp::handler::{ContentBlock, McpHandler};
use serde_json::{Value, json};

fn handler() -> McpHandler {
    McpHandler::new().expect("interpreter should initialize")
}

/// Unwraps the single text content block every tool must return and parses
/// its payload as JSON.
fn json_payload(content: &[ContentBlock]) -> Value {
    assert_eq!(content.len(), 1, "expected exactly one content block");
    assert_eq!(content[0].kind, "text");
    serde_json::from_str(&content[0].text).expect("payload should be a JSON document")
}

// =============================================================================
// Tool listing
// =============================================================================

#[test]
fn tools_list_returns_the_three_tool_definitions() {
    let handler = handler();
    let tools = handler.list_tools();
    let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["execute_python", "list_variables", "install_package"]);
}

#[test]
fn execute_python_schema_requires_code() {
    let handler = handler();
    let tools = handler.list_tools();
    let execute = tools
        .iter()
        .find(|tool| tool.name == "execute_python")
        .expect("execute_python should be listed");
    assert_eq!(execute.input_schema["required"], json!(["code"]));
    assert_eq!(execute.input_schema["properties"]["reset"]["default"], json!(false));
}

// =============================================================================
// execute_python
// =============================================================================

#[test]
fn execute_returns_repr_of_the_trailing_expression() {
    let mut handler = handler();
    let content = handler
        .call_tool("execute_python", json!({"code": "1 + 2"}))
        .unwrap();
    assert_eq!(json_payload(&content), json!({"result": "3"}));
}

#[test]
fn bindings_persist_between_calls() {
    let mut handler = handler();
    let content = handler
        .call_tool("execute_python", json!({"code": "x = 5"}))
        .unwrap();
    // Assignment on the last line: nothing to report.
    assert_eq!(json_payload(&content), json!({}));

    let content = handler
        .call_tool("execute_python", json!({"code": "x + 1"}))
        .unwrap();
    assert_eq!(json_payload(&content), json!({"result": "6"}));
}

#[test]
fn stdout_appears_under_output() {
    let mut handler = handler();
    let content = handler
        .call_tool("execute_python", json!({"code": "print('hi')"}))
        .unwrap();
    assert_eq!(
        json_payload(&content),
        json!({"output": "hi\n", "result": "None"})
    );
}

#[test]
fn list_results_stay_structured() {
    let mut handler = handler();
    let content = handler
        .call_tool("execute_python", json!({"code": "[1, 2, 3]"}))
        .unwrap();
    assert_eq!(json_payload(&content), json!({"result": [1, 2, 3]}));
}

#[test]
fn execution_failures_come_back_as_error_documents() {
    let mut handler = handler();
    let content = handler
        .call_tool("execute_python", json!({"code": "1 / 0"}))
        .unwrap();
    let payload = json_payload(&content);
    let error = payload["error"].as_str().expect("error should be text");
    assert!(error.starts_with("Error executing code:\n"));
    assert!(error.contains("ZeroDivisionError"));
}

#[test]
fn reset_answers_with_plain_prose_and_clears_state() {
    let mut handler = handler();
    handler
        .call_tool("execute_python", json!({"code": "stale = 1"}))
        .unwrap();

    let content = handler
        .call_tool("execute_python", json!({"reset": true}))
        .unwrap();
    assert_eq!(content.len(), 1);
    assert_eq!(content[0].text, "Python session reset. All variables cleared.");
    // The confirmation is prose, not a JSON document.
    assert!(serde_json::from_str::<Value>(&content[0].text).is_err());

    let content = handler
        .call_tool("execute_python", json!({"code": "stale"}))
        .unwrap();
    let payload = json_payload(&content);
    assert!(payload["error"].as_str().unwrap().contains("NameError"));
}

#[test]
fn missing_code_is_a_protocol_error() {
    let mut handler = handler();
    let err = handler.call_tool("execute_python", json!({})).unwrap_err();
    assert!(err.contains("code"), "unexpected message: {err}");

    let err = handler
        .call_tool("execute_python", json!({"code": ""}))
        .unwrap_err();
    assert!(err.contains("code"), "unexpected message: {err}");
}

#[test]
fn dataframe_results_replace_the_generic_envelope() {
    let mut handler = handler();
    let probe = handler
        .call_tool("execute_python", json!({"code": "import pandas"}))
        .unwrap();
    if json_payload(&probe).get("error").is_some() {
        eprintln!("pandas not importable in the host interpreter; skipping");
        return;
    }

    let content = handler
        .call_tool(
            "execute_python",
            json!({"code": "print('ignored')\npandas.DataFrame({'a': [1, 2], 'b': ['x', 'y']})"}),
        )
        .unwrap();
    let payload = json_payload(&content);
    assert_eq!(payload["type"], json!("dataframe"));
    assert_eq!(payload["shape"], json!([2, 2]));
    assert_eq!(payload["columns"], json!(["a", "b"]));
    assert_eq!(
        payload["data"],
        json!([{"a": 1, "b": "x"}, {"a": 2, "b": "y"}])
    );
    // The dataframe shape is the entire payload: no output key.
    assert!(payload.get("output").is_none());
}

// =============================================================================
// list_variables
// =============================================================================

#[test]
fn list_variables_reports_reprs_and_hides_internals() {
    let mut handler = handler();
    handler
        .call_tool("execute_python", json!({"code": "alpha = 1\n_hidden = 2"}))
        .unwrap();

    let content = handler.call_tool("list_variables", json!({})).unwrap();
    let payload = json_payload(&content);
    assert_eq!(payload["variables"]["alpha"], json!("1"));
    assert!(payload["variables"].get("_hidden").is_none());
    assert!(payload["variables"].get("__builtins__").is_none());
}

#[test]
fn list_variables_is_idempotent() {
    let mut handler = handler();
    handler
        .call_tool("execute_python", json!({"code": "n = 42"}))
        .unwrap();

    let first = handler.call_tool("list_variables", json!({})).unwrap();
    let second = handler.call_tool("list_variables", json!({})).unwrap();
    assert_eq!(first[0].text, second[0].text);
}

// =============================================================================
// install_package
// =============================================================================

#[test]
fn invalid_package_names_are_rejected_as_error_documents() {
    // Validation runs before any subprocess, so this is safe without uv.
    let mut handler = handler();
    let content = handler
        .call_tool("install_package", json!({"package": "x; rm -rf"}))
        .unwrap();
    assert_eq!(
        json_payload(&content),
        json!({"error": "Invalid package name: x; rm -rf"})
    );
}

#[test]
fn bootstrap_failures_are_reported_with_their_stage() {
    let mut handler = McpHandler::with_installer(Installer::new("/nonexistent/uv-test-binary"))
        .expect("interpreter should initialize");
    let content = handler
        .call_tool("install_package", json!({"package": "ok-pkg.1"}))
        .unwrap();
    let payload = json_payload(&content);
    let error = payload["error"].as_str().expect("error should be text");
    assert!(
        error.starts_with("Failed to install pip:"),
        "unexpected message: {error}"
    );
}

#[test]
fn missing_package_is_a_protocol_error() {
    let mut handler = handler();
    let err = handler.call_tool("install_package", json!({})).unwrap_err();
    assert!(err.contains("package"), "unexpected message: {err}");
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn unknown_tools_are_protocol_errors() {
    let mut handler = handler();
    let err = handler.call_tool("shell", json!({})).unwrap_err();
    assert_eq!(err, "unknown tool 'shell'");
}
