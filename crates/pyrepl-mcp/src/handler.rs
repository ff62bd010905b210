use pyrepl::{
    ExecuteOutcome, ExecuteOutput, ExecuteRequest, Installer, ReplError, ReplSession, ResultPayload,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Confirmation text returned for a reset request, as plain prose.
const RESET_MESSAGE: &str = "Python session reset. All variables cleared.";

// =============================================================================
// Public types
// =============================================================================

/// Static MCP tool metadata exposed by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name used by `tools/call`.
    pub name: String,
    /// Human-readable description for clients.
    pub description: String,
    /// JSON Schema for the tool arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// One entry of a tool response's content list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ContentBlock {
    fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_owned(),
            text: text.into(),
        }
    }

    fn json(payload: &Value) -> Result<Self, String> {
        serde_json::to_string(payload)
            .map(Self::text)
            .map_err(|err| format!("serialize error: {err}"))
    }
}

// =============================================================================
// McpHandler
// =============================================================================

/// Thin MCP adapter around one [`ReplSession`].
///
/// Each tool method parses JSON arguments, delegates to the session, and
/// renders the outcome as a content list. Two error tiers apply: misuse of
/// the protocol (missing required arguments, unknown tool) comes back as
/// `Err` and becomes a JSON-RPC error upstream, while failures of the
/// submitted code or of package installation are data — they are rendered
/// into an `{"error": ...}` document inside a normal response.
pub struct McpHandler {
    session: ReplSession,
}

impl McpHandler {
    /// Creates a handler with a freshly seeded session and the default
    /// package manager.
    pub fn new() -> Result<Self, String> {
        ReplSession::new()
            .map(|session| Self { session })
            .map_err(|err| err.to_string())
    }

    /// Creates a handler whose session installs packages through `installer`.
    pub fn with_installer(installer: Installer) -> Result<Self, String> {
        ReplSession::with_installer(installer)
            .map(|session| Self { session })
            .map_err(|err| err.to_string())
    }

    /// Returns the tools supported by this handler.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "execute_python".to_owned(),
                description: "Execute Python code and return the output. Variables persist between executions."
                    .to_owned(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "Python code to execute",
                        },
                        "reset": {
                            "type": "boolean",
                            "description": "Reset the Python session (clear all variables)",
                            "default": false,
                        },
                    },
                    "required": ["code"],
                }),
            },
            ToolDefinition {
                name: "list_variables".to_owned(),
                description: "List all variables in the current session".to_owned(),
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                }),
            },
            ToolDefinition {
                name: "install_package".to_owned(),
                description: "Install a Python package using uv".to_owned(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "package": {
                            "type": "string",
                            "description": "Package name to install (e.g., 'pandas')",
                        },
                    },
                    "required": ["package"],
                }),
            },
        ]
    }

    /// Dispatches one tool call by name.
    pub fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Vec<ContentBlock>, String> {
        match tool_name {
            "execute_python" => self.execute_python_tool(arguments),
            "list_variables" => self.list_variables_tool(),
            "install_package" => self.install_package_tool(arguments),
            other => Err(format!("unknown tool '{other}'")),
        }
    }
}

// =============================================================================
// Tool implementations
// =============================================================================

impl McpHandler {
    /// Runs a snippet in the persistent session.
    ///
    /// Accepts `{"code": "...", "reset": bool}`. A reset request answers with
    /// plain prose and runs nothing; otherwise `code` must be non-empty.
    fn execute_python_tool(&mut self, arguments: Value) -> Result<Vec<ContentBlock>, String> {
        let request: ExecuteRequest = serde_json::from_value(arguments)
            .map_err(|err| format!("invalid execute_python args: {err}"))?;
        if !request.reset && request.code.is_empty() {
            return Err("missing required 'code' parameter".to_owned());
        }

        match self.session.execute(&request) {
            Ok(ExecuteOutcome::Reset) => Ok(vec![ContentBlock::text(RESET_MESSAGE)]),
            Ok(ExecuteOutcome::Completed(output)) => {
                let payload = serialize_execute_output(&output);
                Ok(vec![ContentBlock::json(&payload)?])
            }
            Err(ReplError::Python(trace)) => {
                let payload = json!({ "error": format!("Error executing code:\n{trace}") });
                Ok(vec![ContentBlock::json(&payload)?])
            }
            Err(err @ ReplError::Engine(_)) => Err(err.to_string()),
        }
    }

    /// Lists visible session variables as `name -> repr`.
    fn list_variables_tool(&self) -> Result<Vec<ContentBlock>, String> {
        let variables = self.session.list_variables();
        Ok(vec![ContentBlock::json(&json!({ "variables": variables }))?])
    }

    /// Installs a package and imports it into the session namespace.
    ///
    /// Accepts `{"package": "..."}`. Installation failures are data: every
    /// stage reports through an `{"error": ...}` document rather than a
    /// protocol error.
    fn install_package_tool(&mut self, arguments: Value) -> Result<Vec<ContentBlock>, String> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            package: String,
        }

        let args: Args = serde_json::from_value(arguments)
            .map_err(|err| format!("invalid install_package args: {err}"))?;
        if args.package.is_empty() {
            return Err("missing required 'package' parameter".to_owned());
        }

        let payload = match self.session.install_package(&args.package) {
            Ok(message) => json!({ "success": message }),
            Err(err) => json!({ "error": err.to_string() }),
        };
        Ok(vec![ContentBlock::json(&payload)?])
    }
}

// =============================================================================
// JSON serialization helpers
// =============================================================================

/// Renders a completed execution into its envelope document.
///
/// A dataframe value replaces the generic envelope entirely; otherwise the
/// envelope carries `output`/`errors` when non-empty and `result` when the
/// trailing line was a standalone expression.
fn serialize_execute_output(output: &ExecuteOutput) -> Value {
    if let ResultPayload::Dataframe(frame) = &output.value {
        return json!({
            "type": "dataframe",
            "data": frame.data,
            "columns": frame.columns,
            "shape": [frame.shape.0, frame.shape.1],
        });
    }

    let mut envelope = Map::new();
    if !output.stdout.is_empty() {
        envelope.insert("output".to_owned(), json!(output.stdout));
    }
    if !output.stderr.is_empty() {
        envelope.insert("errors".to_owned(), json!(output.stderr));
    }
    match &output.value {
        ResultPayload::Structured(value) => {
            envelope.insert("result".to_owned(), value.clone());
        }
        ResultPayload::Repr(repr) => {
            envelope.insert("result".to_owned(), json!(repr));
        }
        ResultPayload::NoExpression => {}
        ResultPayload::Dataframe(_) => unreachable!(),
    }
    Value::Object(envelope)
}
