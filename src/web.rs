//! HTTP front end.
//!
//! A small hand-rolled HTTP/1.1 server on a tokio `TcpListener`: one request
//! per connection, `httparse` for the request head, JSON for the plain
//! routes and SSE for the chat stream.
//!
//! Routes (GET only):
//! - `/api/chat/stream?message=..&sessionId=..` SSE answer
//! - `/api/chat/history?sessionId=..` stored messages of a session
//! - `/api/stats` throttling, pool and knowledge counters

use std::collections::HashMap;
use std::sync::Arc;

use colored::Colorize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::delivery::{deliver_knowledge, deliver_llm, SseWriter};
use crate::error::{ChatError, Result};
use crate::providers::SYSTEM_PROMPT;
use crate::store::{persist_detached, NewMessage, Role};
use crate::throttle::RequestClass;

/// Largest request head accepted before the connection is dropped.
const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 32;

/// Percent-decoding for URL query parameters. Decoded bytes are collected
/// first so multi-byte UTF-8 sequences survive.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match decoded {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

/// Request line of an incoming request, with the query already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

/// Parse a request head. `Ok(None)` means more bytes are needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<Request>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {
            let method = req.method.unwrap_or("GET").to_string();
            let target = req.path.unwrap_or("/");
            let (path, query) = match target.split_once('?') {
                Some((p, q)) => (p, parse_query(q)),
                None => (target, HashMap::new()),
            };
            Ok(Some(Request { method, path: path.to_string(), query }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(ChatError::InvalidRequest(format!("malformed HTTP request: {e}"))),
    }
}

async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Request>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(request) = parse_request(&buf)? {
            return Ok(Some(request));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ChatError::InvalidRequest("request head too large".into()));
        }
    }
}

async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: &str,
    content_type: &str,
    body: &str,
    extra_headers: &str,
) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\n{extra_headers}Connection: close\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

async fn write_json<S: AsyncWrite + Unpin>(stream: &mut S, status: &str, body: &Value) -> Result<()> {
    write_response(stream, status, "application/json", &body.to_string(), "").await
}

/// Bind the configured address and serve until the listener fails.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    eprintln!("{}", format!("  Qala chat server listening on http://{addr}").bright_green());
    eprintln!("{}", "  SSE endpoint: /api/chat/stream?message=...".bright_cyan());
    if !state.client.is_configured() {
        eprintln!("{}", "  No COHERE_API_KEY: only knowledge-base answers are available".yellow());
    }
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    run(listener, state).await
}

/// Accept loop over an already bound listener.
pub async fn run(listener: TcpListener, state: AppState) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!(error = %e, %addr, "connection error");
            }
        });
    }
}

/// Serve one request on `stream`, then close it.
pub async fn handle_connection<S>(mut stream: S, state: AppState) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match read_request(&mut stream).await {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(()),
        Err(ChatError::InvalidRequest(reason)) => {
            write_json(&mut stream, "400 Bad Request", &json!({ "message": reason })).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    debug!(method = %request.method, path = %request.path, "request");

    if request.method != "GET" {
        write_response(
            &mut stream,
            "405 Method Not Allowed",
            "application/json",
            &json!({ "message": "Method not allowed" }).to_string(),
            "Allow: GET\r\n",
        )
        .await?;
    } else {
        match request.path.as_str() {
            "/api/chat/stream" => handle_chat_stream(&mut stream, &state, &request.query).await?,
            "/api/chat/history" => handle_history(&mut stream, &state, &request.query).await?,
            "/api/stats" => write_json(&mut stream, "200 OK", &state.stats()).await?,
            _ => write_json(&mut stream, "404 Not Found", &json!({ "message": "Not found" })).await?,
        }
    }

    // the client may already be gone
    let _ = stream.shutdown().await;
    Ok(())
}

fn session_from(query: &HashMap<String, String>) -> String {
    query
        .get("sessionId")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

async fn handle_history<S: AsyncWrite + Unpin>(
    stream: &mut S,
    state: &AppState,
    query: &HashMap<String, String>,
) -> Result<()> {
    let session_id = session_from(query);
    let messages = match state.store.ensure_session(&session_id).await {
        Ok(_) => state.store.messages_for_session(&session_id).await,
        Err(e) => Err(e),
    };
    match messages {
        Ok(messages) => {
            write_json(stream, "200 OK", &json!({ "sessionId": session_id, "messages": messages })).await
        }
        Err(e) => {
            warn!(error = %e, session_id, "failed to fetch chat history");
            write_json(
                stream,
                "500 Internal Server Error",
                &json!({ "message": "Failed to fetch chat history" }),
            )
            .await
        }
    }
}

/// `/api/chat/stream`: knowledge base first, upstream model on a miss.
async fn handle_chat_stream<S: AsyncWrite + Unpin>(
    stream: &mut S,
    state: &AppState,
    query: &HashMap<String, String>,
) -> Result<()> {
    let Some(message) = query.get("message").filter(|m| !m.trim().is_empty()).cloned() else {
        return write_json(stream, "400 Bad Request", &json!({ "message": "Message is required" })).await;
    };

    let session_id = session_from(query);
    if let Err(e) = state.store.ensure_session(&session_id).await {
        warn!(error = %e, session_id, "could not create chat session");
    }
    // awaited so history lists the question before the reply
    let question = NewMessage { role: Role::User, content: message.clone(), session_id: session_id.clone() };
    if let Err(e) = state.store.create_message(question).await {
        warn!(error = %e, session_id, "failed to store user message");
    }

    let mut writer = SseWriter::new(stream);
    if !writer.send_headers().await {
        return Ok(());
    }

    let knowledge = Arc::clone(&state.knowledge);
    let hit = state
        .throttler
        .throttled(RequestClass::Knowledge, || async { knowledge.find_match(&message) })
        .await;

    let reply = match hit {
        Some(entry) => {
            info!(session_id, pattern = entry.canonical_pattern().unwrap_or(""), "answering from knowledge base");
            deliver_knowledge(&mut writer, &entry, &state.config.delivery, Arc::clone(&state.delay)).await
        }
        None => {
            info!(session_id, "forwarding to upstream model");
            let upstream = state
                .client
                .stream_chat(&message, SYSTEM_PROMPT, state.client.default_options())
                .await;
            deliver_llm(&mut writer, upstream).await
        }
    };

    if writer.is_closed() {
        info!(session_id, frames = writer.frames_sent(), "client disconnected mid-stream");
    }
    if !reply.is_empty() {
        persist_detached(
            Arc::clone(&state.store),
            NewMessage { role: Role::Assistant, content: reply, session_id },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::delivery::NoDelay;

    // -- url_decode tests --

    #[test]
    fn test_url_decode_basic() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("a%26b"), "a&b");
        assert_eq!(url_decode("plain"), "plain");
    }

    #[test]
    fn test_url_decode_multibyte_utf8() {
        // "قەڵا"
        assert_eq!(url_decode("%D9%82%DB%95%DA%B5%D8%A7"), "قەڵا");
    }

    #[test]
    fn test_url_decode_invalid_escape_kept_literal() {
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
        assert_eq!(url_decode("%+1"), "% 1");
    }

    #[test]
    fn test_parse_query_basic() {
        let q = parse_query("message=hi+there&sessionId=abc");
        assert_eq!(q.get("message").map(String::as_str), Some("hi there"));
        assert_eq!(q.get("sessionId").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_parse_query_empty_and_valueless() {
        assert!(parse_query("").is_empty());
        let q = parse_query("flag&x=1");
        assert_eq!(q.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_query_duplicate_keys_last_wins() {
        let q = parse_query("a=1&a=2");
        assert_eq!(q.get("a").map(String::as_str), Some("2"));
    }

    // -- request parsing --

    #[test]
    fn test_parse_request_complete() {
        let raw = b"GET /api/chat/stream?message=%D8%B3 HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = parse_request(raw).unwrap().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/chat/stream");
        assert_eq!(req.query.get("message").map(String::as_str), Some("س"));
    }

    #[test]
    fn test_parse_request_partial() {
        assert!(parse_request(b"GET /api/stats HTTP/1.1\r\nHost:").unwrap().is_none());
    }

    #[test]
    fn test_parse_request_malformed() {
        assert!(matches!(parse_request(b"\x01\x02 nonsense\r\n\r\n"), Err(ChatError::InvalidRequest(_))));
    }

    // -- routing over an in-memory connection --

    async fn roundtrip(raw: &str) -> String {
        let state = AppState::from_config(Config::default()).unwrap().with_delay(Arc::new(NoDelay));
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_connection(server, state));
        client.write_all(raw.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_missing_message_is_400_json() {
        let resp = roundtrip("GET /api/chat/stream HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(resp.contains("application/json"));
        assert!(resp.ends_with(r#"{"message":"Message is required"}"#));
        assert!(!resp.contains("text/event-stream"));
    }

    #[tokio::test]
    async fn test_knowledge_hit_streams_frames_and_done() {
        // message=پەیوەندی
        let resp = roundtrip(
            "GET /api/chat/stream?message=%D9%BE%DB%95%DB%8C%D9%88%DB%95%D9%86%D8%AF%DB%8C HTTP/1.1\r\n\r\n",
        )
        .await;
        assert!(resp.contains("text/event-stream"));
        assert!(resp.contains("Connection: close\r\n"));
        assert!(!resp.contains("keep-alive"));
        assert!(resp.contains("data: ☎️07705009002\n\n"));
        assert!(resp.ends_with("data: [DONE]\n\n"));
        assert_eq!(resp.matches("data: [DONE]").count(), 1);
    }

    #[tokio::test]
    async fn test_miss_without_api_key_ends_with_error_then_done() {
        let resp = roundtrip("GET /api/chat/stream?message=hello+world HTTP/1.1\r\n\r\n").await;
        assert!(resp.ends_with("data: Error processing your request\n\ndata: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_stats_route() {
        let resp = roundtrip("GET /api/stats HTTP/1.1\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK"));
        assert!(resp.contains("\"knowledge\""));
    }

    #[tokio::test]
    async fn test_history_route_echoes_session() {
        let resp = roundtrip("GET /api/chat/history?sessionId=abc HTTP/1.1\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK"));
        assert!(resp.contains(r#""sessionId":"abc""#));
        assert!(resp.contains(r#""messages":[]"#));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let resp = roundtrip("GET /nope HTTP/1.1\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 404 Not Found"));
    }

    #[tokio::test]
    async fn test_post_is_405() {
        let resp = roundtrip("POST /api/chat/stream HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 405 Method Not Allowed"));
        assert!(resp.contains("Allow: GET"));
    }
}
