mod cli;

use anyhow::Context;
use clap::Parser;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use docker_bind_proxy::{
    exit_code_for_io_error, exit_code_for_proxy_error, ProxyConfig, ProxyError, ProxyHandler,
    ProxyServer,
};

use crate::cli::Cli;

static GOT_TERM: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_term(_sig: i32) {
    GOT_TERM.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let act_term = SigAction::new(
        SigHandler::Handler(handle_term),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &act_term);
        let _ = signal::sigaction(Signal::SIGTERM, &act_term);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = ProxyConfig::resolve(&cli.overrides());
    if config.verbose {
        eprintln!(
            "docker-bind-proxy: version {} ({}/{}) backend={} listen={}",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH,
            config.backend_socket.display(),
            config.listen_socket.display()
        );
    }

    let handler = ProxyHandler::new(&config.backend_socket, config.verbose);
    let server = ProxyServer::start(&config, handler)
        .with_context(|| format!("cannot serve on {}", config.listen_socket.display()))?;
    install_signal_handlers();

    while !GOT_TERM.load(Ordering::SeqCst) && !server.is_finished() {
        std::thread::sleep(Duration::from_millis(100));
    }
    server.stop();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    #[cfg(feature = "otel")]
    let _telemetry = docker_bind_proxy::telemetry::telemetry_init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("docker-bind-proxy: {e:#}");
            let code = match e.downcast_ref::<ProxyError>() {
                Some(pe) => exit_code_for_proxy_error(pe),
                None => e
                    .downcast_ref::<io::Error>()
                    .map(exit_code_for_io_error)
                    .unwrap_or(1),
            };
            ExitCode::from(code)
        }
    }
}
