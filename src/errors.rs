//! Error mapping guide:
//! - Map io::ErrorKind::NotFound to exit code 127; all others to 1.
//! - JsonError/RewriteError never reach the client: the forwarding path logs them and
//!   forwards the original body.
//! - ProxyError covers server startup failures and keeps the io::Error it wraps, so
//!   the exit code still follows its kind.
use std::fmt;
use std::io;

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (socket or directory missing)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Typed failures of the JSON document adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonError {
    Malformed(String),
    MissingField(String),
    WrongType {
        field: String,
        expected: &'static str,
    },
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonError::Malformed(msg) => write!(f, "unmarshal of request body failed: {msg}"),
            JsonError::MissingField(name) => write!(f, "missing field {name:?}"),
            JsonError::WrongType { field, expected } => {
                write!(f, "field {field:?} is not {expected}")
            }
        }
    }
}

impl std::error::Error for JsonError {}

/// Failure of the body rewrite; the caller always degrades to pass-through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    Json(JsonError),
}

impl From<JsonError> for RewriteError {
    fn from(e: JsonError) -> Self {
        RewriteError::Json(e)
    }
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteError::Json(e) => write!(f, "failed to modify request body: {e}"),
        }
    }
}

impl std::error::Error for RewriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RewriteError::Json(e) => Some(e),
        }
    }
}

/// Startup failures of the proxy server: removing the stale socket, binding, mirroring
/// permissions or spawning the accept thread.
#[derive(Debug)]
pub enum ProxyError {
    Io(io::Error),
    Setup { what: &'static str, source: io::Error },
}

impl ProxyError {
    pub(crate) fn setup(what: &'static str, source: io::Error) -> Self {
        ProxyError::Setup { what, source }
    }

    /// The underlying I/O error, whichever variant carries it.
    pub fn io_error(&self) -> &io::Error {
        match self {
            ProxyError::Io(e) | ProxyError::Setup { source: e, .. } => e,
        }
    }
}

impl From<io::Error> for ProxyError {
    fn from(e: io::Error) -> Self {
        ProxyError::Io(e)
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&display_for_proxy_error(self))
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.io_error())
    }
}

/// Convert ProxyError to exit code (parity with io::Error mapping).
pub fn exit_code_for_proxy_error(e: &ProxyError) -> u8 {
    exit_code_for_io_error(e.io_error())
}

/// Render a user-facing string for ProxyError.
pub fn display_for_proxy_error(e: &ProxyError) -> String {
    match e {
        ProxyError::Io(ioe) => ioe.to_string(),
        ProxyError::Setup { what, source } => format!("{what}: {source}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_io_kind() {
        let nf = io::Error::new(io::ErrorKind::NotFound, "gone");
        let pd = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(exit_code_for_io_error(&nf), 127);
        assert_eq!(exit_code_for_io_error(&pd), 1);
        assert_eq!(exit_code_for_proxy_error(&ProxyError::from(nf)), 127);
        assert_eq!(
            exit_code_for_proxy_error(&ProxyError::setup("proxy unix bind failed", pd)),
            1
        );
    }

    #[test]
    fn test_setup_error_names_the_step() {
        let e = ProxyError::setup(
            "permission mirroring failed",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(e.io_error().kind(), io::ErrorKind::NotFound);
        assert_eq!(e.to_string(), "permission mirroring failed: no such file");
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn test_rewrite_error_display_mentions_field() {
        let e = RewriteError::from(JsonError::WrongType {
            field: "Env".into(),
            expected: "an array of strings",
        });
        assert!(e.to_string().contains("\"Env\""), "{e}");
    }
}
