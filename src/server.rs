/*!
Listener setup and accept loop.

- A stale socket file at the listen path is removed first (NotFound is ignored).
- After bind, the engine socket's mode/owner/group are mirrored onto the new socket.
- The accept loop runs on its own thread with a non-blocking listener polled every
  50 ms, so clearing the `running` flag stops it; each accepted connection gets its
  own thread.
*/

use std::fs;
use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::errors::ProxyError;
use crate::forward::ProxyHandler;
use crate::log::{log_info, log_warn};
use crate::perms::{self, PermsError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Remove a leftover socket file from a previous run.
pub fn remove_stale_socket(path: &Path) -> Result<(), ProxyError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProxyError::setup("error removing existing unix socket", e)),
    }
}

pub struct ProxyServer {
    socket_path: PathBuf,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProxyServer {
    /// Bind the listen socket and start accepting in the background.
    pub fn start(config: &ProxyConfig, handler: ProxyHandler) -> Result<ProxyServer, ProxyError> {
        let verbose = config.verbose;
        let sock_path = config.listen_socket.clone();
        remove_stale_socket(&sock_path)?;
        let listener = UnixListener::bind(&sock_path)
            .map_err(|e| ProxyError::setup("proxy unix bind failed", e))?;

        if config.mirror_permissions {
            match perms::mirror_permissions(&config.backend_socket, &sock_path) {
                Ok(om) => log_info(
                    verbose,
                    &format!(
                        "mirrored mode {:o} uid {} gid {} onto {}",
                        om.mode,
                        om.uid,
                        om.gid,
                        sock_path.display()
                    ),
                ),
                Err(PermsError::Unsupported) => {
                    log_warn("permission mirroring unsupported on this host; socket keeps default mode")
                }
                Err(PermsError::Io(e)) => {
                    let _ = fs::remove_file(&sock_path);
                    return Err(ProxyError::setup("permission mirroring failed", e));
                }
            }
        }

        listener.set_nonblocking(true)?;
        let running = Arc::new(AtomicBool::new(true));
        let running_cl = running.clone();
        let handler = Arc::new(handler);
        let listen_display = sock_path.display().to_string();

        let handle = std::thread::Builder::new()
            .name("dbp-accept".to_string())
            .spawn(move || {
                log_info(
                    verbose,
                    &format!(
                        "listening on {} (backend {})",
                        listen_display,
                        handler.backend().display()
                    ),
                );
                loop {
                    if !running_cl.load(Ordering::SeqCst) {
                        break;
                    }
                    let (stream, _addr) = match listener.accept() {
                        Ok(pair) => pair,
                        Err(e) => {
                            if e.kind() != io::ErrorKind::WouldBlock {
                                log_info(verbose, &format!("accept error: {}", e));
                            }
                            std::thread::sleep(ACCEPT_BACKOFF);
                            continue;
                        }
                    };
                    let _ = stream.set_nonblocking(false);
                    let h = handler.clone();
                    std::thread::spawn(move || h.handle_connection(stream));
                }
                log_info(verbose, "proxy stopped");
            })?;

        Ok(ProxyServer {
            socket_path: sock_path,
            running,
            handle: Some(handle),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Stop accepting, wait for the accept thread and remove the socket file.
    /// Connections already being served keep running on their own threads.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            let _ = fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
