use clap::Parser;
use std::path::PathBuf;

use docker_bind_proxy::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(
    name = "docker-bind-proxy",
    version,
    about = "Proxy the Docker engine socket, turning DOCKER_BIND_MOUNT* env entries into bind mounts."
)]
pub(crate) struct Cli {
    /// Engine socket to forward to (env: DOCKER_BIND_PROXY_BACKEND) [default: /var/run/docker.sock]
    #[arg(long, value_name = "PATH")]
    pub backend_socket: Option<PathBuf>,

    /// Socket to listen on (env: DOCKER_BIND_PROXY_LISTEN) [default: /tmp/nomad-docker-wrapper.sock]
    #[arg(long, value_name = "PATH")]
    pub listen_socket: Option<PathBuf>,

    /// Print detailed execution info (env: DOCKER_BIND_PROXY_VERBOSE=1)
    #[arg(long)]
    pub verbose: bool,

    /// Keep the listening socket's default mode/owner instead of copying the engine socket's
    #[arg(long)]
    pub no_mirror_permissions: bool,
}

impl Cli {
    pub(crate) fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            backend_socket: self.backend_socket.clone(),
            listen_socket: self.listen_socket.clone(),
            verbose: self.verbose,
            no_mirror_permissions: self.no_mirror_permissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_socket_flags() {
        let cli = Cli::try_parse_from([
            "docker-bind-proxy",
            "--backend-socket",
            "/run/docker.sock",
            "--listen-socket",
            "/tmp/p.sock",
            "--no-mirror-permissions",
        ])
        .expect("parse");
        let o = cli.overrides();
        assert_eq!(o.backend_socket, Some(PathBuf::from("/run/docker.sock")));
        assert_eq!(o.listen_socket, Some(PathBuf::from("/tmp/p.sock")));
        assert!(o.no_mirror_permissions);
        assert!(!o.verbose);
    }
}
