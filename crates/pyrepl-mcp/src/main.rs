use std::io::{self, BufRead, BufReader, Write};

use pyrepl::Installer;
use pyrepl_mcp::handler::McpHandler;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

/// JSON-RPC request payload used by this minimal MCP server.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

fn main() -> io::Result<()> {
    // stdout carries protocol frames; diagnostics go to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let mut handler = match parse_uv_bin() {
        Some(uv_bin) => McpHandler::with_installer(Installer::new(uv_bin)),
        None => McpHandler::new(),
    }
    .map_err(io::Error::other)?;
    tracing::info!("session initialized, serving on stdio");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    while let Some(body) = read_framed_message(&mut reader)? {
        let raw_message = match serde_json::from_slice::<Value>(&body) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "unparseable frame");
                let response = error_response(&Value::Null, -32700, &format!("parse error: {err}"));
                write_framed_message(&mut writer, &response)?;
                continue;
            }
        };

        if is_json_rpc_notification(&raw_message) {
            continue;
        }

        let response = match serde_json::from_value::<RpcRequest>(raw_message) {
            Ok(request) => handle_request(&mut handler, request),
            Err(err) => error_response(&Value::Null, -32700, &format!("parse error: {err}")),
        };
        write_framed_message(&mut writer, &response)?;
    }

    Ok(())
}

/// Returns true when the payload is a JSON-RPC 2.0 notification.
///
/// Notifications contain a string `method` and intentionally omit `id`; the
/// server must not produce any response for them.
fn is_json_rpc_notification(payload: &Value) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };

    object.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
        && object.get("method").is_some_and(Value::is_string)
        && !object.contains_key("id")
}

fn handle_request(handler: &mut McpHandler, request: RpcRequest) -> Value {
    match request.method.as_str() {
        "initialize" => success_response(
            &request.id,
            &json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "pyrepl-mcp",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        "notifications/initialized" => success_response(&request.id, &json!({})),
        "tools/list" => success_response(&request.id, &json!({ "tools": handler.list_tools() })),
        "tools/call" => {
            #[derive(Deserialize)]
            struct CallParams {
                name: String,
                #[serde(default)]
                arguments: Value,
            }

            let params: Result<CallParams, _> = serde_json::from_value(request.params);
            match params {
                Ok(params) => match handler.call_tool(&params.name, params.arguments) {
                    Ok(content) => success_response(&request.id, &json!({ "content": content })),
                    Err(err) => error_response(&request.id, -32000, &err),
                },
                Err(err) => error_response(&request.id, -32602, &format!("invalid params: {err}")),
            }
        }
        _ => error_response(&request.id, -32601, "method not found"),
    }
}

fn success_response(id: &Value, result: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn error_response(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// Reads one Content-Length framed message body from stdin.
fn read_framed_message(reader: &mut impl BufRead) -> io::Result<Option<Vec<u8>>> {
    let mut content_length = None;
    loop {
        let mut header_line = String::new();
        let read = reader.read_line(&mut header_line)?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            let length = value.trim().parse::<usize>().map_err(|err| {
                io::Error::new(io::ErrorKind::InvalidData, format!("invalid Content-Length: {err}"))
            })?;
            content_length = Some(length);
        }
    }

    let Some(content_length) = content_length else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing Content-Length header",
        ));
    };

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Writes one Content-Length framed JSON message to stdout.
fn write_framed_message(writer: &mut impl Write, payload: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(payload)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("serialize error: {err}")))?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Resolves the package manager binary override.
///
/// `--uv-bin <path>` wins, then `$PYREPL_UV_BIN`; with neither present the
/// session uses `uv` from `PATH`.
fn parse_uv_bin() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len().saturating_sub(1) {
        if args[i] == "--uv-bin" {
            return Some(args[i + 1].clone());
        }
    }

    std::env::var("PYREPL_UV_BIN").ok()
}
