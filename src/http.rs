//! Minimal HTTP/1.1 front end: one request per connection, GET only.

use crate::context::{Context, Lookup};
use crate::metrics;
use crate::transport::Transport;
use crate::types::Site;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const INDEX: &str = "Recursive DNS resolver.<br/>\
    GET /get-records?domain=&lt;name&gt;&amp;trace=&lt;bool&gt;<br/>\
    GET /update-cache<br/>\
    GET /metrics";
const NO_RECORDS: &str = "There are not A or AAAA records for this domain.";

#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Response {
    fn html(status: u16, body: impl Into<String>) -> Self {
        Self { status, content_type: "text/html; charset=utf-8".to_string(), body: body.into().into_bytes() }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status, self.reason(), self.content_type, self.body.len()
        );
        let mut out = header.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Parses the request line of a raw HTTP request. Headers and body are ignored.
pub fn parse_request(raw: &str) -> Option<Request> {
    let line = raw.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;

    let (path, query_str) = target.split_once('?').unwrap_or((target, ""));
    let query = query_str
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(k), percent_decode(v))
        })
        .collect();

    Some(Request { method, path: percent_decode(path), query })
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => { out.push(b' '); i += 1; }
            b'%' if i + 2 < bytes.len() => {
                match hex::decode(&bytes[i + 1..i + 3]) {
                    Ok(decoded) => { out.extend_from_slice(&decoded); i += 3; }
                    Err(_) => { out.push(b'%'); i += 1; }
                }
            }
            b => { out.push(b); i += 1; }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Accepts the usual truthy/falsy spellings, case-insensitively.
pub fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        other => anyhow::bail!("invalid truth value '{}'", other),
    }
}

fn join_sites(sites: &[Site]) -> String {
    sites.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("<br/>")
}

pub fn render_lookup(ipv6: bool, lookup: &Lookup, include_trace: bool) -> String {
    let banner = if ipv6 { "Using IPv4 and IPv6 both.<br/><br/>" } else { "Using IPv4 only.<br/><br/>" };
    match lookup {
        Lookup::Cached(records) => format!("{}Using cached record:<br/>{}", banner, join_sites(records)),
        Lookup::Resolved { trace, records } if include_trace => {
            format!("{}Trace:<br/>{}<br/><br/>Answers:<br/>{}", banner, join_sites(trace), join_sites(records))
        }
        Lookup::Unresolvable { trace } if include_trace => {
            format!("{}Trace:<br/>{}<br/><br/>Answers:<br/>", banner, join_sites(trace))
        }
        Lookup::Resolved { records, .. } => format!("{}{}", banner, join_sites(records)),
        Lookup::Unresolvable { .. } => NO_RECORDS.to_string(),
    }
}

pub async fn handle<T: Transport>(ctx: &Context<T>, request: &Request) -> Response {
    if request.method != "GET" {
        return Response::html(405, "Method Not Allowed");
    }

    match request.path.as_str() {
        "/" => Response::html(200, INDEX),
        "/get-records" | "/get-a-records" => {
            let Some(domain) = request.query.get("domain").filter(|d| !d.is_empty()) else {
                tracing::error!("[http] get-records called without a domain");
                return Response::html(400, "Missing 'domain' parameter");
            };
            let include_trace = match request.query.get("trace") {
                None => false,
                Some(raw) => parse_bool(raw).unwrap_or_else(|e| {
                    tracing::error!("[http] Bad trace argument: {}", e);
                    false
                }),
            };

            match ctx.lookup(domain, include_trace).await {
                Ok(lookup) => Response::html(200, render_lookup(ctx.ipv6_supported(), &lookup, include_trace)),
                Err(e) => {
                    tracing::error!("[http] {}", e);
                    Response::html(400, e.to_string())
                }
            }
        }
        "/update-cache" => {
            ctx.refresh_cache();
            Response::html(200, "Cache updated")
        }
        "/metrics" => match metrics::gather_text() {
            Ok(body) => Response { status: 200, content_type: metrics::content_type(), body },
            Err(e) => {
                tracing::error!("[http] Failed to encode metrics: {}", e);
                Response::html(500, "Failed to encode metrics")
            }
        },
        _ => Response::html(404, "Not Found"),
    }
}

/// Reads until the request line is complete, the buffer is full, or the peer stops sending.
async fn read_request_head(stream: &mut TcpStream, buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
        if buf[..filled].windows(2).any(|w| w == b"\r\n") {
            break;
        }
    }
    filled
}

async fn serve_connection<T: Transport>(mut stream: TcpStream, ctx: &Context<T>) {
    let mut buf = [0u8; 8192];
    let n = match tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut stream, &mut buf)).await {
        Ok(n) if n > 0 => n,
        _ => return,
    };

    let raw = String::from_utf8_lossy(&buf[..n]);
    let response = match parse_request(&raw) {
        Some(request) => {
            tracing::debug!("[http] {} {}", request.method, request.path);
            handle(ctx, &request).await
        }
        None => Response::html(400, "Bad Request"),
    };

    let _ = tokio::time::timeout(READ_TIMEOUT, stream.write_all(&response.to_bytes())).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

/// Accepts connections forever, one task per connection.
pub async fn serve<T: Transport + 'static>(listener: TcpListener, ctx: Arc<Context<T>>) -> Result<()> {
    tracing::info!("[http] Listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            tracing::trace!("[http] Connection from {}", peer);
            serve_connection(stream, &ctx).await;
        });
    }
}
