//! Prefixed stderr logging with an optional file tee.
//!
//! Every line is printed as `docker-bind-proxy: <msg>`. When DOCKER_BIND_PROXY_LOG_PATH
//! is set, the same line is appended to that file (integration tests read it instead of
//! capturing stderr). With the `otel` feature each line is also emitted as a tracing event.
use std::env;
use std::io::{self, Write};
use std::sync::Mutex;

use once_cell::sync::Lazy;

pub const LOG_PREFIX: &str = "docker-bind-proxy";
pub const LOG_PATH_ENV: &str = "DOCKER_BIND_PROXY_LOG_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
}

// Connection threads log concurrently; whole lines only.
static TEE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn tee(line: &str) {
    if let Ok(p) = env::var(LOG_PATH_ENV) {
        if !p.trim().is_empty() {
            let _guard = TEE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            if let Ok(mut f) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&p)
            {
                let _ = writeln!(f, "{}", line);
            }
        }
    }
}

fn emit(level: Level, msg: &str) {
    let line = format!("{LOG_PREFIX}: {msg}");
    eprintln!("{}", line);
    tee(&line);
    let _ = io::stderr().flush();

    #[cfg(feature = "otel")]
    {
        match level {
            Level::Info => tracing::info!(target: "docker_bind_proxy", "{}", msg),
            Level::Warn => tracing::warn!(target: "docker_bind_proxy", "{}", msg),
        }
    }
    #[cfg(not(feature = "otel"))]
    let _ = level;
}

/// Informational line, printed only in verbose mode.
pub fn log_info(verbose: bool, msg: &str) {
    if verbose {
        emit(Level::Info, msg);
    }
}

/// Warning line, always printed.
pub fn log_warn(msg: &str) {
    emit(Level::Warn, &format!("warning: {msg}"));
}
