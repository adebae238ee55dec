/*!
Forwarding core: per-connection request loop in front of the engine socket.

- `Upgrade: tcp` requests are replayed verbatim on a fresh backend connection and the
  client connection is spliced to it (see tunnel.rs). They never reach the rewriter.
- Container-create requests with a body are buffered, passed through the body
  rewriter, and sent with a recomputed Content-Length. A rewrite failure is logged and
  the original body is sent instead.
- Everything else is relayed as-is, one backend connection per request, with the
  backend's status, headers and body streamed back unmodified.
- Failures end the affected connection only: 400 when the request body cannot be read,
  413 for oversized create bodies, 502 when the backend cannot be reached, 500 when the
  client connection cannot be taken over for a tunnel.
*/

use std::borrow::Cow;
use std::io::{self, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "otel")]
use tracing::info_span;

use crate::http::{self, BodyError, BodyFraming, RequestHead};
use crate::log::{log_info, log_warn};
use crate::rewrite::{BindMountRewriter, BodyRewrite};
use crate::tunnel::{self, Duplex, TunnelEnd};

/// `Upgrade` header value the engine uses for hijacked attach/exec streams.
pub const UPGRADE_RAW_STREAM: &str = "tcp";

/// Creation bodies larger than this are refused.
pub const MAX_CREATE_BODY: u64 = 32 * 1024 * 1024;

/// Matches `(/v[0-9.]*)?<endpoint>` exactly.
#[derive(Debug, Clone)]
pub struct CreatePathMatcher {
    endpoint: String,
}

impl Default for CreatePathMatcher {
    fn default() -> Self {
        CreatePathMatcher::new("/containers/create")
    }
}

impl CreatePathMatcher {
    pub fn new(endpoint: &str) -> Self {
        CreatePathMatcher {
            endpoint: endpoint.to_string(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let rest = match path.strip_prefix("/v") {
            Some(after_v) => {
                let end = after_v
                    .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                    .unwrap_or(after_v.len());
                &after_v[end..]
            }
            None => path,
        };
        rest == self.endpoint
    }
}

enum Outcome {
    KeepAlive,
    Close,
    Tunnel {
        backend: UnixStream,
        backend_pending: Vec<u8>,
    },
}

// Write the head and body of a forwarded request to the backend.
fn send_request<S: Duplex>(
    head: &RequestHead,
    buffered: Option<&[u8]>,
    framing: BodyFraming,
    client: &mut BufReader<S>,
    backend: &mut UnixStream,
) -> io::Result<()> {
    backend.write_all(&head.to_bytes())?;
    match buffered {
        Some(body) => backend.write_all(body)?,
        None => {
            http::copy_body(framing, client, backend)?;
        }
    }
    backend.flush()
}

/// Handles client connections for one backend socket.
pub struct ProxyHandler {
    backend: PathBuf,
    create_path: CreatePathMatcher,
    rewriter: Arc<dyn BodyRewrite>,
    verbose: bool,
}

impl ProxyHandler {
    pub fn new(backend: impl Into<PathBuf>, verbose: bool) -> Self {
        ProxyHandler::with_rewriter(backend, Arc::new(BindMountRewriter::default()), verbose)
    }

    pub fn with_rewriter(
        backend: impl Into<PathBuf>,
        rewriter: Arc<dyn BodyRewrite>,
        verbose: bool,
    ) -> Self {
        ProxyHandler {
            backend: backend.into(),
            create_path: CreatePathMatcher::default(),
            rewriter,
            verbose,
        }
    }

    pub fn backend(&self) -> &Path {
        &self.backend
    }

    fn dial(&self) -> io::Result<UnixStream> {
        UnixStream::connect(&self.backend)
    }

    /// Serve requests from one client connection until it closes or switches to a tunnel.
    pub fn handle_connection<S: Duplex>(&self, stream: S) {
        let mut client = BufReader::new(stream);
        loop {
            let head = match http::read_request_head(&mut client) {
                Ok(Some(h)) => h,
                Ok(None) => return,
                Err(e) => {
                    if e.kind() == io::ErrorKind::InvalidData {
                        log_warn(&format!("bad request: {e}"));
                        let _ = http::respond_plain(client.get_mut(), 400, b"malformed request\n");
                    }
                    return;
                }
            };
            #[cfg(feature = "otel")]
            let _span = info_span!("proxy_request", method = %head.method, target = %head.target)
                .entered();

            match self.serve_request(&mut client, head) {
                Outcome::KeepAlive => continue,
                Outcome::Close => return,
                Outcome::Tunnel {
                    backend,
                    backend_pending,
                } => {
                    self.run_tunnel(client, backend, backend_pending);
                    return;
                }
            }
        }
    }

    fn fail<S: Duplex>(&self, client: &mut BufReader<S>, status: u16, msg: &str) -> Outcome {
        log_warn(msg);
        let _ = http::respond_plain(client.get_mut(), status, format!("{msg}\n").as_bytes());
        Outcome::Close
    }

    fn serve_request<S: Duplex>(
        &self,
        client: &mut BufReader<S>,
        mut head: RequestHead,
    ) -> Outcome {
        let path = head.path();

        if head.headers.get("upgrade") == Some(UPGRADE_RAW_STREAM) {
            log_info(self.verbose, &format!("{} {} (raw stream)", head.method, path));
            let mut backend = match self.dial() {
                Ok(b) => b,
                Err(e) => return self.fail(client, 502, &format!("cannot connect to backend: {e}")),
            };
            if let Err(e) = backend.write_all(&head.raw).and_then(|_| backend.flush()) {
                return self.fail(client, 502, &format!("cannot write to backend: {e}"));
            }
            return Outcome::Tunnel {
                backend,
                backend_pending: Vec::new(),
            };
        }

        let close_after = head.wants_close();
        let upgrading = head.headers.get("upgrade").is_some();
        let framing = http::request_body_framing(&head);
        let buffer_body = self.create_path.matches(&path) && framing.has_body();
        if let BodyFraming::Length(n) = framing {
            if buffer_body && n > MAX_CREATE_BODY {
                // Must precede any 100 Continue.
                let e = BodyError::TooLarge(MAX_CREATE_BODY);
                return self.fail(client, 413, &e.to_string());
            }
        }
        let expects_continue = head.expects_continue();
        if expects_continue {
            head.headers.remove("expect");
        }
        if expects_continue && framing.has_body() {
            if let Err(e) = http::respond_continue(client.get_mut()) {
                log_warn(&format!("cannot write to client: {e}"));
                return Outcome::Close;
            }
        }

        let mut buffered: Option<Vec<u8>> = None;
        if buffer_body {
            let body = match http::read_body(framing, client, MAX_CREATE_BODY) {
                Ok(b) => b,
                Err(e @ BodyError::TooLarge(_)) => return self.fail(client, 413, &e.to_string()),
                Err(e) => return self.fail(client, 400, &e.to_string()),
            };
            let replacement = match self.rewriter.rewrite(&body) {
                Ok(Cow::Owned(new)) => {
                    log_info(self.verbose, &format!("rewrote bind mounts for {path}"));
                    Some(new)
                }
                Ok(Cow::Borrowed(_)) => None,
                Err(e) => {
                    log_warn(&e.to_string());
                    None
                }
            };
            let body = replacement.unwrap_or(body);
            head.headers.remove("transfer-encoding");
            head.headers.set("Content-Length", body.len().to_string());
            buffered = Some(body);
        }

        if !upgrading {
            head.headers.strip_hop_by_hop();
            head.headers.set("Connection", "close");
        }

        let backend = match self.dial() {
            Ok(b) => b,
            Err(e) => return self.fail(client, 502, &format!("cannot connect to backend: {e}")),
        };
        let mut upstream = BufReader::new(backend);

        let sent = send_request(
            &head,
            buffered.as_deref(),
            framing,
            client,
            upstream.get_mut(),
        );
        if let Err(e) = sent {
            return self.fail(client, 502, &format!("cannot forward request: {e}"));
        }

        let mut resp = loop {
            let resp = match http::read_response_head(&mut upstream) {
                Ok(r) => r,
                Err(e) => return self.fail(client, 502, &format!("bad backend response: {e}")),
            };
            if resp.status == 101 {
                log_info(self.verbose, &format!("{} {} -> 101", head.method, path));
                if client.get_mut().write_all(&resp.raw).is_err() {
                    return Outcome::Close;
                }
                let backend_pending = upstream.buffer().to_vec();
                return Outcome::Tunnel {
                    backend: upstream.into_inner(),
                    backend_pending,
                };
            }
            if !resp.is_interim() {
                break resp;
            }
            if client.get_mut().write_all(&resp.raw).is_err() {
                return Outcome::Close;
            }
        };
        log_info(
            self.verbose,
            &format!("{} {} -> {}", head.method, path, resp.status),
        );

        let resp_framing = http::response_body_framing(&head.method, &resp);
        let close = close_after || resp_framing == BodyFraming::UntilClose;
        resp.headers.strip_hop_by_hop();
        if close {
            resp.headers.set("Connection", "close");
        }
        let relayed = client
            .get_mut()
            .write_all(&resp.to_bytes())
            .and_then(|_| http::copy_body(resp_framing, &mut upstream, client.get_mut()));
        if let Err(e) = relayed {
            log_info(self.verbose, &format!("response relay ended early: {e}"));
            return Outcome::Close;
        }
        if close {
            Outcome::Close
        } else {
            Outcome::KeepAlive
        }
    }

    fn run_tunnel<S: Duplex>(&self, client: BufReader<S>, backend: UnixStream, backend_pending: Vec<u8>) {
        let client_pending = client.buffer().to_vec();
        let mut raw = client.into_inner();
        let client_end = match raw.try_clone_duplex() {
            Ok(writer) => TunnelEnd::new(raw, writer, client_pending),
            Err(e) => {
                log_warn(&format!("cannot take over client connection: {e}"));
                let _ = http::respond_plain(&mut raw, 500, b"cannot take over client connection\n");
                backend.shutdown_duplex();
                return;
            }
        };
        let backend_end = match TunnelEnd::from_stream(backend, backend_pending) {
            Ok(end) => end,
            Err(e) => {
                log_warn(&format!("cannot take over backend connection: {e}"));
                return;
            }
        };
        let stats = tunnel::splice(client_end, backend_end);
        log_info(
            self.verbose,
            &format!(
                "tunnel closed: {} bytes to backend, {} bytes to client",
                stats.client_to_backend, stats.backend_to_client
            ),
        );
    }
}
