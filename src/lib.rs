/*!
docker-bind-proxy: a transparent proxy in front of the Docker engine socket.

Module map
- json.rs: schema-free JSON document with typed field access.
- rewrite.rs: moves `DOCKER_BIND_MOUNT*` environment entries of container-create bodies
  into `HostConfig.Binds`.
- http.rs: HTTP/1.1 head parsing and body relaying.
- forward.rs: per-connection request loop (rewrite, reverse proxy, upgrade detection).
- tunnel.rs: raw byte splicing for hijacked attach/exec streams.
- server.rs: listener setup and accept loop; perms.rs: socket permission mirroring.
- config.rs, log.rs, errors.rs: ambient configuration, logging and error mapping.

Environment
- DOCKER_BIND_PROXY_BACKEND / DOCKER_BIND_PROXY_LISTEN: socket paths.
- DOCKER_BIND_PROXY_VERBOSE=1: informational logs.
- DOCKER_BIND_PROXY_LOG_PATH: tee log lines to a file.
- DOCKER_BIND_PROXY_OTEL=1 (feature `otel`): tracing + OpenTelemetry stdout export.
*/

pub mod config;
mod errors;
pub mod forward;
pub mod http;
pub mod json;
pub mod log;
pub mod perms;
pub mod rewrite;
pub mod server;
#[cfg(feature = "otel")]
pub mod telemetry;
pub mod tunnel;

pub use config::{ConfigOverrides, ProxyConfig};
pub use errors::*;
pub use forward::{CreatePathMatcher, ProxyHandler, UPGRADE_RAW_STREAM};
pub use json::Document;
pub use rewrite::{rewrite_create_body, BindMountRewriter, BodyRewrite, EnvTagMatcher};
pub use server::{remove_stale_socket, ProxyServer};
pub use tunnel::{splice, Duplex, TunnelEnd, TunnelStats};
