//! HTTP server for the query surface.
//! Minimal HTTP handling over tokio, no server framework.

use continuum_bi::chart::JsonMap;
use continuum_bi::config::Config;
use continuum_bi::orchestrator::Orchestrator;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    if config.llm_ready() {
        info!("API key found, generative classification enabled");
    } else {
        info!("No API key found, using ranker-based classification");
    }

    let orchestrator = Arc::new(Orchestrator::new(config));

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    info!("Server listening on http://localhost:8080");

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from {}", addr);
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(handle_connection(stream, orchestrator));
    }
}

async fn handle_connection(mut stream: TcpStream, orchestrator: Arc<Orchestrator>) {
    let mut buffer: Vec<u8> = Vec::new();
    let mut temp = [0u8; 4096];

    loop {
        match stream.read(&mut temp).await {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&temp[..n]);
                let text = String::from_utf8_lossy(&buffer);
                if let Some(headers_end) = text.find("\r\n\r\n") {
                    let body_len = extract_content_length(&text).unwrap_or(0);
                    if buffer.len() >= headers_end + 4 + body_len {
                        break;
                    }
                }
                if buffer.len() > 1_000_000 {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read from stream: {}", e);
                return;
            }
        }
    }

    if buffer.is_empty() {
        return;
    }

    let request = String::from_utf8_lossy(&buffer).to_string();
    let response = handle_request(&request, &orchestrator).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to write response: {}", e);
    }
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

async fn handle_request(request: &str, orchestrator: &Orchestrator) -> String {
    let request_line = match request.lines().next() {
        Some(line) => line,
        None => return create_response(400, "Bad Request", "{}"),
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }

    let method = parts[0];
    let mut path = parts[1];
    if let Some(query_start) = path.find('?') {
        path = &path[..query_start];
    }
    let path = {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    };

    info!("Request: {} {}", method, path);

    let body = request
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .unwrap_or("");

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),

        ("GET", "/health") => {
            create_response(200, "OK", r#"{"status":"ok","service":"continuum-bi"}"#)
        }

        ("GET", "/query/tools") => {
            let body = json!({"tools": orchestrator.catalog()});
            create_response(200, "OK", &body.to_string())
        }

        ("GET", "/query/diagnostics") => {
            create_response(200, "OK", &orchestrator.diagnostics().to_string())
        }

        ("POST", "/query/plan") => {
            let Some(payload) = parse_json_body(body) else {
                return bad_request("Invalid JSON body");
            };
            let Some(message) = payload.get("message").and_then(Value::as_str) else {
                return bad_request("Missing 'message'");
            };
            let plan = orchestrator.plan(message).await;
            match serde_json::to_string(&json!({"plan": plan})) {
                Ok(body) => create_response(200, "OK", &body),
                Err(_) => create_response(500, "Internal Server Error", "{}"),
            }
        }

        ("POST", "/query/run") => {
            let Some(payload) = parse_json_body(body) else {
                return bad_request("Invalid JSON body");
            };
            let Some(tool) = payload.get("tool").and_then(Value::as_str) else {
                return bad_request("Missing 'tool'");
            };
            let args = object_field(&payload, "args");
            let filters = object_field(&payload, "filters");
            let response = orchestrator.force_run(tool, &args, &filters);
            respond_with_query_response(&response)
        }

        ("POST", "/query") => {
            let Some(payload) = parse_json_body(body) else {
                return bad_request("Invalid JSON body");
            };
            let Some(message) = payload.get("message").and_then(Value::as_str) else {
                return bad_request("Missing 'message'");
            };
            let filters = object_field(&payload, "filters");
            let response = orchestrator.handle(message, &filters).await;
            respond_with_query_response(&response)
        }

        _ => create_response(404, "Not Found", r#"{"error":"not_found"}"#),
    }
}

fn parse_json_body(body: &str) -> Option<Value> {
    serde_json::from_str(body.trim_end_matches('\0').trim()).ok()
}

fn object_field(payload: &Value, key: &str) -> JsonMap {
    payload
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn respond_with_query_response(response: &continuum_bi::orchestrator::QueryResponse) -> String {
    match serde_json::to_string(response) {
        Ok(body) => create_response(200, "OK", &body),
        Err(_) => create_response(500, "Internal Server Error", "{}"),
    }
}

fn bad_request(message: &str) -> String {
    create_response(400, "Bad Request", &json!({"error": message}).to_string())
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
