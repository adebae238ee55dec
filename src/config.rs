//! Runtime configuration: socket locations and switches.
//!
//! Precedence: explicit value (command line) > environment > built-in default.
//! Empty or whitespace-only environment values are ignored.
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BACKEND_SOCKET: &str = "/var/run/docker.sock";
pub const DEFAULT_LISTEN_SOCKET: &str = "/tmp/nomad-docker-wrapper.sock";

pub const ENV_BACKEND_SOCKET: &str = "DOCKER_BIND_PROXY_BACKEND";
pub const ENV_LISTEN_SOCKET: &str = "DOCKER_BIND_PROXY_LISTEN";
pub const ENV_VERBOSE: &str = "DOCKER_BIND_PROXY_VERBOSE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub backend_socket: PathBuf,
    pub listen_socket: PathBuf,
    pub verbose: bool,
    pub mirror_permissions: bool,
}

/// Values given explicitly (e.g. on the command line); None falls back to env/defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend_socket: Option<PathBuf>,
    pub listen_socket: Option<PathBuf>,
    pub verbose: bool,
    pub no_mirror_permissions: bool,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        ProxyConfig::resolve(&ConfigOverrides::default())
    }

    pub fn resolve(overrides: &ConfigOverrides) -> Self {
        ProxyConfig::resolve_with(overrides, |k| env::var(k).ok())
    }

    /// Resolve against an arbitrary variable lookup (tests pass a closure over a map).
    pub fn resolve_with<F>(overrides: &ConfigOverrides, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let path = |explicit: &Option<PathBuf>, key: &str, default: &str| {
            explicit
                .clone()
                .or_else(|| var(key).map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(default))
        };
        ProxyConfig {
            backend_socket: path(
                &overrides.backend_socket,
                ENV_BACKEND_SOCKET,
                DEFAULT_BACKEND_SOCKET,
            ),
            listen_socket: path(
                &overrides.listen_socket,
                ENV_LISTEN_SOCKET,
                DEFAULT_LISTEN_SOCKET,
            ),
            verbose: overrides.verbose || var(ENV_VERBOSE).as_deref() == Some("1"),
            mirror_permissions: !overrides.no_mirror_permissions,
        }
    }
}
