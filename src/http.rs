/*!
HTTP/1.1 framing helpers for the proxy: tolerant head parsing and body relaying.

- Heads are read line by line from a BufRead, accepting CRLF and bare LF, with a
  64 KiB cap. Header names keep their original case and order, and the raw head
  bytes are kept so a request can be replayed exactly as received.
- Bodies are either relayed with their original framing (Content-Length, chunked,
  read-until-close) or, for requests that get rewritten, fully de-chunked into memory.
*/

use std::borrow::Cow;
use std::fmt;
use std::io::{self, BufRead, Read, Write};

const HDR_CAP: usize = 64 * 1024;
const CHUNK_LINE_CAP: usize = 4 * 1024;

/// Headers that only describe the current hop and are never relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "proxy-authenticate",
];

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True when any comma-separated token of any `name` header equals `token`
    /// (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.0
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Replace every `name` header with a single value (appended if absent).
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(idx) => {
                self.0[idx].1 = value;
                let mut seen = 0usize;
                self.0.retain(|(k, _)| {
                    if k.eq_ignore_ascii_case(name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Drop hop-by-hop headers, including any header named by `Connection`.
    pub fn strip_hop_by_hop(&mut self) {
        let named: Vec<String> = self
            .0
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("connection"))
            .flat_map(|(_, v)| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.0.retain(|(k, _)| {
            let lk = k.to_ascii_lowercase();
            !HOP_BY_HOP.contains(&lk.as_str()) && !named.contains(&lk)
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    fn is_chunked(&self) -> bool {
        self.has_token("transfer-encoding", "chunked")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Headers(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Parsed request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    /// Head bytes exactly as received (request line through the blank line).
    pub raw: Vec<u8>,
}

impl RequestHead {
    /// Decoded path of the request target (query stripped).
    pub fn path(&self) -> String {
        request_path(&self.target)
    }

    /// Whether the client asked for the connection to end after this exchange.
    pub fn wants_close(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return true;
        }
        self.version.eq_ignore_ascii_case("HTTP/1.0")
            && !self.headers.has_token("connection", "keep-alive")
    }

    pub fn expects_continue(&self) -> bool {
        self.headers
            .get("expect")
            .map(|v| v.trim().eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }

    /// Serialize the (possibly modified) head.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, self.version);
        push_headers(&mut out, &self.headers);
        out.into_bytes()
    }
}

/// Parsed status line and headers.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub raw: Vec<u8>,
}

impl ResponseHead {
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = if self.reason.is_empty() {
            format!("{} {}\r\n", self.version, self.status)
        } else {
            format!("{} {} {}\r\n", self.version, self.status, self.reason)
        };
        push_headers(&mut out, &self.headers);
        out.into_bytes()
    }
}

fn push_headers(out: &mut String, headers: &Headers) {
    for (k, v) in headers.iter() {
        out.push_str(k);
        out.push_str(": ");
        out.push_str(v);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
}

/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(u64),
    Chunked,
    UntilClose,
}

impl BodyFraming {
    pub fn has_body(self) -> bool {
        !matches!(self, BodyFraming::None | BodyFraming::Length(0))
    }
}

/// Requests without Content-Length or chunked encoding carry no body.
pub fn request_body_framing(head: &RequestHead) -> BodyFraming {
    if head.headers.is_chunked() {
        BodyFraming::Chunked
    } else if let Some(n) = head.headers.content_length() {
        BodyFraming::Length(n)
    } else {
        BodyFraming::None
    }
}

pub fn response_body_framing(request_method: &str, resp: &ResponseHead) -> BodyFraming {
    if request_method.eq_ignore_ascii_case("HEAD")
        || resp.is_interim()
        || resp.status == 204
        || resp.status == 304
    {
        BodyFraming::None
    } else if resp.headers.is_chunked() {
        BodyFraming::Chunked
    } else if let Some(n) = resp.headers.content_length() {
        BodyFraming::Length(n)
    } else {
        BodyFraming::UntilClose
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-message")
}

/// Read one line (terminator included) within `budget` bytes.
/// Returns None on EOF before any byte.
fn read_line<R: BufRead + ?Sized>(r: &mut R, budget: &mut usize) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let n = (&mut *r).take(*budget as u64).read_until(b'\n', &mut line)?;
    if n == 0 {
        return if *budget == 0 {
            Err(invalid("header section too large"))
        } else {
            Ok(None)
        };
    }
    *budget -= n;
    if !line.ends_with(b"\n") {
        return Err(if *budget == 0 {
            invalid("header section too large")
        } else {
            truncated()
        });
    }
    Ok(Some(line))
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Read a start line plus headers. Leading blank lines are skipped.
fn read_head<R: BufRead + ?Sized>(r: &mut R) -> io::Result<Option<(String, Headers, Vec<u8>)>> {
    let mut budget = HDR_CAP;
    let start_line = loop {
        let Some(line) = read_line(r, &mut budget)? else {
            return Ok(None);
        };
        if !trim_eol(&line).is_empty() {
            break line;
        }
    };
    let start = String::from_utf8_lossy(trim_eol(&start_line)).into_owned();
    let mut raw = start_line;

    let mut headers = Vec::new();
    loop {
        let line = read_line(r, &mut budget)?.ok_or_else(truncated)?;
        raw.extend_from_slice(&line);
        let text = trim_eol(&line);
        if text.is_empty() {
            break;
        }
        let text = String::from_utf8_lossy(text);
        if let Some((k, v)) = text.split_once(':') {
            headers.push((k.trim_end().to_string(), v.trim().to_string()));
        }
    }
    Ok(Some((start, Headers(headers), raw)))
}

/// Parse the next request head. Ok(None) means the peer closed cleanly between requests.
pub fn read_request_head<R: BufRead + ?Sized>(r: &mut R) -> io::Result<Option<RequestHead>> {
    let Some((start, headers, raw)) = read_head(r)? else {
        return Ok(None);
    };
    let mut parts = start.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(invalid("malformed request line"));
    };
    let version = parts.next().unwrap_or("HTTP/1.0");
    if !version.starts_with("HTTP/") {
        return Err(invalid("malformed request line"));
    }
    Ok(Some(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
        raw,
    }))
}

pub fn read_response_head<R: BufRead + ?Sized>(r: &mut R) -> io::Result<ResponseHead> {
    let (start, headers, raw) = read_head(r)?.ok_or_else(truncated)?;
    let mut parts = start.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let status = parts
        .next()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .filter(|_| version.starts_with("HTTP/"))
        .ok_or_else(|| invalid("malformed status line"))?;
    Ok(ResponseHead {
        version: version.to_string(),
        status,
        reason: parts.next().unwrap_or_default().trim().to_string(),
        headers,
        raw,
    })
}

fn chunk_size(line: &[u8]) -> io::Result<u64> {
    let text = String::from_utf8_lossy(trim_eol(line));
    let hex = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(hex, 16).map_err(|_| invalid("bad chunk size"))
}

fn copy_exact<R, W>(r: &mut R, w: &mut W, n: u64) -> io::Result<u64>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    let got = io::copy(&mut (&mut *r).take(n), w)?;
    if got < n {
        return Err(truncated());
    }
    Ok(got)
}

/// Relay a body from `r` to `w` keeping its wire framing. Returns payload bytes relayed.
pub fn copy_body<R, W>(framing: BodyFraming, r: &mut R, w: &mut W) -> io::Result<u64>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    let n = match framing {
        BodyFraming::None => 0,
        BodyFraming::Length(n) => copy_exact(r, w, n)?,
        BodyFraming::UntilClose => io::copy(r, w)?,
        BodyFraming::Chunked => {
            let mut total = 0u64;
            loop {
                let mut budget = CHUNK_LINE_CAP;
                let line = read_line(r, &mut budget)?.ok_or_else(truncated)?;
                w.write_all(&line)?;
                let size = chunk_size(&line)?;
                if size == 0 {
                    // Trailer section ends with a blank line.
                    let mut budget = HDR_CAP;
                    loop {
                        let tr = read_line(r, &mut budget)?.ok_or_else(truncated)?;
                        w.write_all(&tr)?;
                        if trim_eol(&tr).is_empty() {
                            break;
                        }
                    }
                    break;
                }
                total += copy_exact(r, w, size)?;
                let mut budget = CHUNK_LINE_CAP;
                let crlf = read_line(r, &mut budget)?.ok_or_else(truncated)?;
                w.write_all(&crlf)?;
                w.flush()?;
            }
            total
        }
    };
    w.flush()?;
    Ok(n)
}

/// Failure to buffer a request body.
#[derive(Debug)]
pub enum BodyError {
    TooLarge(u64),
    Io(io::Error),
}

impl From<io::Error> for BodyError {
    fn from(e: io::Error) -> Self {
        BodyError::Io(e)
    }
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyError::TooLarge(cap) => write!(f, "request body exceeds {cap} bytes"),
            BodyError::Io(e) => write!(f, "cannot read request body: {e}"),
        }
    }
}

impl std::error::Error for BodyError {}

/// Read a whole body into memory, de-chunking if needed. Bodies over `cap` are refused.
pub fn read_body<R: BufRead + ?Sized>(
    framing: BodyFraming,
    r: &mut R,
    cap: u64,
) -> Result<Vec<u8>, BodyError> {
    let mut body = Vec::new();
    match framing {
        BodyFraming::None => {}
        BodyFraming::Length(n) => {
            if n > cap {
                return Err(BodyError::TooLarge(cap));
            }
            copy_exact(r, &mut body, n)?;
        }
        BodyFraming::UntilClose => {
            (&mut *r).take(cap.saturating_add(1)).read_to_end(&mut body)?;
            if body.len() as u64 > cap {
                return Err(BodyError::TooLarge(cap));
            }
        }
        BodyFraming::Chunked => loop {
            let mut budget = CHUNK_LINE_CAP;
            let line = read_line(r, &mut budget)?.ok_or_else(truncated)?;
            let size = chunk_size(&line)?;
            if size == 0 {
                let mut budget = HDR_CAP;
                while let Some(tr) = read_line(r, &mut budget)? {
                    if trim_eol(&tr).is_empty() {
                        break;
                    }
                }
                break;
            }
            if size > cap.saturating_sub(body.len() as u64) {
                return Err(BodyError::TooLarge(cap));
            }
            copy_exact(r, &mut body, size)?;
            let mut budget = CHUNK_LINE_CAP;
            read_line(r, &mut budget)?.ok_or_else(truncated)?;
        },
    }
    Ok(body)
}

/// Path of a request target: query and fragment stripped, absolute-form reduced to
/// its path, percent-decoding applied (left raw if it does not decode to UTF-8).
pub fn request_path(target: &str) -> String {
    let mut path = target;
    if !path.starts_with('/') {
        if let Some((_, rest)) = path.split_once("://") {
            path = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
        }
    }
    let path = path.split(['?', '#']).next().unwrap_or_default();
    match urlencoding::decode(path) {
        Ok(Cow::Borrowed(p)) => p.to_string(),
        Ok(Cow::Owned(p)) => p,
        Err(_) => path.to_string(),
    }
}

/// Short status line reason phrases for the responses the proxy writes itself.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        400 => "Bad Request",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "",
    }
}

/// Write a complete plain-text response that closes the connection.
pub fn respond_plain<W: Write + ?Sized>(w: &mut W, status: u16, body: &[u8]) -> io::Result<()> {
    let header = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reason_phrase(status),
        body.len()
    );
    w.write_all(header.as_bytes())?;
    w.write_all(body)?;
    w.flush()
}

pub fn respond_continue<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    w.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
    w.flush()
}
