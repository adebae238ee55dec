/*!
Test support helpers shared across integration tests.

- FakeEngine: a Unix-socket backend standing in for the container engine. It records
  every request (head + de-chunked body), answers plain requests with a small JSON
  body, and answers `Upgrade: tcp` requests with `101 UPGRADED` followed by an echo of
  whatever the client sends until EOF. Other upgrades get `101 Switching Protocols`
  plus ENGINE_GREETING in the same write, then the same echo.
- start_proxy(): run a ProxyServer in front of a FakeEngine inside a temp directory.
- post_json()/read_response(): minimal client helpers over UnixStream.
*/
#![allow(dead_code)]

use std::io::{BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use docker_bind_proxy::http::{self, BodyFraming, RequestHead};
use docker_bind_proxy::{ProxyConfig, ProxyHandler, ProxyServer};

/// Sent right after the 101 head when switching to a protocol other than `tcp`.
pub const ENGINE_GREETING: &str = "engine-ready\n";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub head: RequestHead,
    pub body: Vec<u8>,
    /// Bytes received after an upgrade, until the client closed.
    pub stream: Vec<u8>,
}

pub struct FakeEngine {
    pub path: PathBuf,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

fn serve_engine_conn(stream: UnixStream, requests: Arc<Mutex<Vec<Recorded>>>) {
    let mut reader = BufReader::new(stream);
    let Ok(Some(head)) = http::read_request_head(&mut reader) else {
        return;
    };
    let upgrade = head.headers.get("upgrade").map(str::to_string);
    let body = if upgrade.as_deref() == Some("tcp") {
        Vec::new()
    } else {
        http::read_body(http::request_body_framing(&head), &mut reader, 1 << 20).unwrap_or_default()
    };

    if let Some(proto) = upgrade {
        let answer = if proto == "tcp" {
            "HTTP/1.1 101 UPGRADED\r\nContent-Type: application/vnd.docker.raw-stream\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n".to_string()
        } else {
            // Greeting in the same write as the head, as h2c servers send their preface.
            format!("HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: {proto}\r\n\r\n{ENGINE_GREETING}")
        };
        let _ = reader.get_mut().write_all(answer.as_bytes());
        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    seen.extend_from_slice(&buf[..n]);
                    if reader.get_mut().write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
        requests.lock().unwrap().push(Recorded {
            head,
            body,
            stream: seen,
        });
        return;
    }

    let path = head.path();
    requests.lock().unwrap().push(Recorded {
        head: head.clone(),
        body: body.clone(),
        stream: Vec::new(),
    });
    let out = reader.get_mut();
    if path.ends_with("/events") {
        let _ = out.write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        );
        for ev in [&b"{\"status\":\"start\"}\n"[..], &b"{\"status\":\"die\"}\n"[..]] {
            let _ = write!(out, "{:X}\r\n", ev.len());
            let _ = out.write_all(ev);
            let _ = out.write_all(b"\r\n");
        }
        let _ = out.write_all(b"0\r\n\r\n");
    } else {
        let reply = format!("{{\"Path\":\"{}\",\"Received\":{}}}", path, body.len());
        let _ = write!(
            out,
            "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\nApi-Version: 1.41\r\n\r\n{}",
            reply.len(),
            reply
        );
    }
    let _ = out.flush();
}

impl FakeEngine {
    pub fn start(dir: &Path) -> FakeEngine {
        let path = dir.join("engine.sock");
        let listener = UnixListener::bind(&path).expect("bind fake engine");
        listener.set_nonblocking(true).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (rq, run) = (requests.clone(), running.clone());
        let handle = std::thread::spawn(move || {
            while run.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((s, _)) => {
                        let _ = s.set_nonblocking(false);
                        let rq = rq.clone();
                        std::thread::spawn(move || serve_engine_conn(s, rq));
                    }
                    Err(_) => std::thread::sleep(Duration::from_millis(10)),
                }
            }
        });
        FakeEngine {
            path,
            requests,
            running,
            handle: Some(handle),
        }
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until at least `n` requests were recorded.
    pub fn wait_for(&self, n: usize) -> Vec<Recorded> {
        for _ in 0..200 {
            let got = self.recorded();
            if got.len() >= n {
                return got;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("fake engine saw {} requests, expected {}", self.recorded().len(), n);
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

pub fn test_config(dir: &Path, backend: &Path) -> ProxyConfig {
    ProxyConfig {
        backend_socket: backend.to_path_buf(),
        listen_socket: dir.join("proxy.sock"),
        verbose: false,
        mirror_permissions: false,
    }
}

pub fn start_proxy(dir: &Path, engine: &FakeEngine) -> ProxyServer {
    let cfg = test_config(dir, &engine.path);
    ProxyServer::start(&cfg, ProxyHandler::new(&engine.path, false)).expect("start proxy")
}

pub fn connect(server: &ProxyServer) -> UnixStream {
    let s = UnixStream::connect(server.socket_path()).expect("connect proxy");
    s.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    s.set_write_timeout(Some(Duration::from_secs(10))).unwrap();
    s
}

pub fn post_json(path: &str, body: &[u8], keep_alive: bool) -> Vec<u8> {
    let mut req = format!(
        "POST {path} HTTP/1.1\r\nHost: docker\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
        body.len()
    );
    if !keep_alive {
        req.push_str("Connection: close\r\n");
    }
    req.push_str("\r\n");
    let mut out = req.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Read one response (head + body by its framing). Returns (status, head, body).
pub fn read_response<R: std::io::BufRead>(r: &mut R, method: &str) -> (u16, http::ResponseHead, Vec<u8>) {
    let head = http::read_response_head(r).expect("response head");
    let framing = http::response_body_framing(method, &head);
    let body = match framing {
        BodyFraming::None => Vec::new(),
        other => http::read_body(other, r, 1 << 20).expect("response body"),
    };
    (head.status, head, body)
}
