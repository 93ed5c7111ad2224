// ABOUTME: HTTP/1.1 upgrade handshake for the WebSocket engine
// ABOUTME: Accept-token derivation, request/response builders and line-based parsers

use crate::error::Error;
use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing (RFC 6455 §1.3)
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Longest header or status line accepted
const MAX_LINE: usize = 8192;
/// Most header lines accepted in one message
const MAX_HEADERS: usize = 64;
/// Largest reply body accepted unless [`ReplyParser::max_body`] says otherwise
pub const DEFAULT_MAX_REPLY_BODY: usize = 64 * 1024;

/// `base64(SHA1(key + GUID))`
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Fresh random `Sec-WebSocket-Key`
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

/// Build the initiator's upgrade request
pub fn build_request(host: &str, port: u16, path: &str, key: &str, user_agent: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Accept: */*\r\n\
         User-Agent: {user_agent}\r\n\
         \r\n"
    )
}

/// Build the acceptor's `101 Switching Protocols` reply
pub fn build_upgrade_response(key: &str, server_name: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         Server: {server_name}\r\n\
         \r\n",
        accept_key(key)
    )
}

/// Build an HTTP failure reply with an empty body
pub fn build_error_response(status: u16, reason: &str, server_name: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: application/octet-stream\r\n\
         Content-Length: 0\r\n\
         Server: {server_name}\r\n\
         \r\n"
    )
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_version(token: &str) -> Result<(u8, u8)> {
    let rest = token
        .strip_prefix("HTTP/")
        .ok_or_else(|| Error::Protocol(format!("invalid HTTP version '{}'", token)))?;
    let (major, minor) = rest
        .split_once('.')
        .ok_or_else(|| Error::Protocol(format!("invalid HTTP version '{}'", token)))?;
    match (major.parse(), minor.parse()) {
        (Ok(major), Ok(minor)) => Ok((major, minor)),
        _ => Err(Error::Protocol(format!("invalid HTTP version '{}'", token))),
    }
}

fn parse_header(line: &str) -> Result<(String, String)> {
    let (key, value) = line
        .split_once(':')
        .ok_or_else(|| Error::Protocol(format!("invalid header line '{}'", line)))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

/// Accumulates bytes up to and including a newline
#[derive(Debug, Default)]
struct LineBuffer {
    line: Vec<u8>,
}

impl LineBuffer {
    /// Feed one byte; returns the finished line without its line ending
    fn push(&mut self, byte: u8) -> Result<Option<String>> {
        if byte != b'\n' {
            if self.line.len() >= MAX_LINE {
                return Err(Error::Protocol("HTTP line too long".into()));
            }
            self.line.push(byte);
            return Ok(None);
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        let line = String::from_utf8(std::mem::take(&mut self.line))
            .map_err(|_| Error::Protocol("HTTP line is not valid UTF-8".into()))?;
        Ok(Some(line))
    }
}

/// Parsed upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request path
    pub path: String,
    /// HTTP version as (major, minor)
    pub version: (u8, u8),
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The client's `Sec-WebSocket-Key`
    pub fn websocket_key(&self) -> Option<&str> {
        self.header("Sec-WebSocket-Key")
    }
}

#[derive(Debug)]
enum RequestStage {
    RequestLine,
    Headers,
}

/// Byte-at-a-time parser for the acceptor side
#[derive(Debug)]
pub struct RequestParser {
    stage: RequestStage,
    line: LineBuffer,
    path: String,
    version: (u8, u8),
    headers: Vec<(String, String)>,
}

impl RequestParser {
    /// Create a parser waiting for the request line
    pub fn new() -> Self {
        Self {
            stage: RequestStage::RequestLine,
            line: LineBuffer::default(),
            path: String::new(),
            version: (1, 1),
            headers: Vec::new(),
        }
    }

    /// Bytes needed next; requests are consumed one byte at a time
    pub fn wanted(&self) -> usize {
        1
    }

    /// Feed bytes; returns the request once the blank line is seen
    pub fn push(&mut self, data: &[u8]) -> Result<Option<HttpRequest>> {
        for &byte in data {
            let Some(line) = self.line.push(byte)? else {
                continue;
            };
            match self.stage {
                RequestStage::RequestLine => {
                    let mut parts = line.split_whitespace();
                    let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
                        (Some(m), Some(p), Some(v)) => (m, p, v),
                        _ => {
                            return Err(Error::Protocol(format!(
                                "invalid request line '{}'",
                                line
                            )))
                        }
                    };
                    if method != "GET" {
                        return Err(Error::Protocol(format!("unsupported method '{}'", method)));
                    }
                    self.version = parse_version(version)?;
                    self.path = path.to_string();
                    self.stage = RequestStage::Headers;
                }
                RequestStage::Headers if line.is_empty() => {
                    let request = HttpRequest {
                        path: std::mem::take(&mut self.path),
                        version: self.version,
                        headers: std::mem::take(&mut self.headers),
                    };
                    self.stage = RequestStage::RequestLine;
                    return Ok(Some(request));
                }
                RequestStage::Headers => {
                    if self.headers.len() >= MAX_HEADERS {
                        return Err(Error::Protocol("too many headers".into()));
                    }
                    self.headers.push(parse_header(&line)?);
                }
            }
        }
        Ok(None)
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed reply to a request we sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP version as (major, minor)
    pub version: (u8, u8),
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Body, `Content-Length` bytes
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug)]
enum ReplyStage {
    StatusLine,
    Headers,
    Body { remaining: usize },
}

/// Parser for the initiator side
///
/// Status line and headers are consumed a byte at a time, the body in one
/// piece of `Content-Length` bytes. When an expected accept token is given,
/// a `Sec-WebSocket-Accept` header that differs from it is a protocol error.
#[derive(Debug)]
pub struct ReplyParser {
    stage: ReplyStage,
    line: LineBuffer,
    expected_accept: Option<String>,
    reply: HttpReply,
    accept_seen: bool,
    max_body: usize,
}

impl ReplyParser {
    /// Create a parser; `expected_accept` is `accept_key(our_key)`
    pub fn new(expected_accept: Option<String>) -> Self {
        Self {
            stage: ReplyStage::StatusLine,
            line: LineBuffer::default(),
            expected_accept,
            reply: HttpReply {
                version: (1, 1),
                status: 0,
                reason: String::new(),
                headers: Vec::new(),
                body: Vec::new(),
            },
            accept_seen: false,
            max_body: DEFAULT_MAX_REPLY_BODY,
        }
    }

    /// Refuse replies whose `Content-Length` exceeds `max` bytes
    pub fn max_body(mut self, max: usize) -> Self {
        self.max_body = max;
        self
    }

    /// Bytes needed next
    pub fn wanted(&self) -> usize {
        match self.stage {
            ReplyStage::Body { remaining } => remaining,
            _ => 1,
        }
    }

    fn finish(&mut self) -> HttpReply {
        self.stage = ReplyStage::StatusLine;
        self.accept_seen = false;
        std::mem::replace(
            &mut self.reply,
            HttpReply {
                version: (1, 1),
                status: 0,
                reason: String::new(),
                headers: Vec::new(),
                body: Vec::new(),
            },
        )
    }

    /// Feed at most [`wanted`](Self::wanted) bytes; returns the completed reply
    pub fn push(&mut self, data: &[u8]) -> Result<Option<HttpReply>> {
        if let ReplyStage::Body { remaining } = self.stage {
            if data.len() > remaining {
                return Err(Error::Protocol("reply body overrun".into()));
            }
            self.reply.body.extend_from_slice(data);
            let remaining = remaining - data.len();
            if remaining > 0 {
                self.stage = ReplyStage::Body { remaining };
                return Ok(None);
            }
            return Ok(Some(self.finish()));
        }

        for &byte in data {
            let Some(line) = self.line.push(byte)? else {
                continue;
            };
            match self.stage {
                ReplyStage::StatusLine => {
                    let mut parts = line.splitn(3, ' ');
                    let version = parts.next().unwrap_or_default();
                    let status = parts.next().unwrap_or_default();
                    self.reply.version = parse_version(version)?;
                    self.reply.status = status
                        .parse()
                        .map_err(|_| Error::Protocol(format!("invalid status line '{}'", line)))?;
                    self.reply.reason = parts.next().unwrap_or_default().trim().to_string();
                    self.stage = ReplyStage::Headers;
                }
                ReplyStage::Headers if line.is_empty() => {
                    if self.reply.status == 101 && self.expected_accept.is_some() && !self.accept_seen {
                        return Err(Error::Protocol(
                            "upgrade reply without Sec-WebSocket-Accept".into(),
                        ));
                    }
                    let length = match self.reply.header("Content-Length") {
                        Some(v) => v.parse::<usize>().map_err(|_| {
                            Error::Protocol(format!("invalid Content-Length '{}'", v))
                        })?,
                        None => 0,
                    };
                    if length > self.max_body {
                        return Err(Error::Protocol(format!(
                            "reply body of {} bytes exceeds {}",
                            length, self.max_body
                        )));
                    }
                    if length == 0 {
                        return Ok(Some(self.finish()));
                    }
                    self.stage = ReplyStage::Body { remaining: length };
                    return Ok(None);
                }
                ReplyStage::Headers => {
                    if self.reply.headers.len() >= MAX_HEADERS {
                        return Err(Error::Protocol("too many headers".into()));
                    }
                    let (key, value) = parse_header(&line)?;
                    if key.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
                        if let Some(expected) = &self.expected_accept {
                            if *expected != value {
                                return Err(Error::Protocol(format!(
                                    "Sec-WebSocket-Accept mismatch: got '{}', expected '{}'",
                                    value, expected
                                )));
                            }
                        }
                        self.accept_seen = true;
                    }
                    self.reply.headers.push((key, value));
                }
                ReplyStage::Body { .. } => unreachable!("body is consumed above"),
            }
        }
        Ok(None)
    }
}
