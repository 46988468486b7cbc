// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level daemon runner: binds the 9P socket, writes the PID file, starts
//! the mail loop, and waits for `SIGINT`/`SIGTERM` to shut everything down
//! gracefully. Server binds happen in `start`, the signal handler is
//! spawned as its own task racing a `CancellationToken`, and `main.rs` just
//! calls `run` and maps the result to an exit code. One Unix-domain 9P
//! listener is the broker's only external interface.

use std::io;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use broker_9p::server::Server;
use broker_9p::tree::Tree;
use broker_core::backend::{BackendConfig, BackendRegistry};
use broker_core::manager::{Manager, ManagerConfig};
use broker_core::terminal_host::native::NativeTerminalHost;
use broker_core::terminal_host::tmux::TmuxTerminalHost;
use broker_core::terminal_host::TerminalHost;

use crate::config::{Config, TerminalHostKind};

/// Everything `run` needs to hold onto until shutdown.
pub struct RunningDaemon {
    pub manager: Arc<Manager>,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    pub stop: CancellationToken,
    mail_loop: tokio::task::JoinHandle<()>,
    server_task: tokio::task::JoinHandle<()>,
}

/// Build the registry this daemon serves: the `demo` backend, sized per
/// `--rows`/`--cols`.
fn build_backend_registry(config: &Config) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    let mut demo = BackendConfig::demo();
    demo.rows = config.rows;
    demo.cols = config.cols;
    registry.register(demo);
    registry
}

fn build_terminal_host(config: &Config) -> anyhow::Result<Arc<dyn TerminalHost>> {
    match config.terminal_host_kind()? {
        TerminalHostKind::Native => Ok(Arc::new(NativeTerminalHost::new("/bin/sh"))),
        TerminalHostKind::Tmux => Ok(Arc::new(TmuxTerminalHost::new(config.tmux_bin.clone()))),
    }
}

/// A socket file exists but nothing answers it: a prior daemon crashed
/// without cleaning up. Remove it so `bind` doesn't fail with `EADDRINUSE`.
/// A *responsive* peer means another daemon is already running, which is an
/// error, not something to clean up.
fn clear_stale_socket(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    match StdUnixStream::connect(path) {
        Ok(_) => anyhow::bail!("another brokerd is already listening on {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused || e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Exclusive-create the PID file; fails if one already exists (another
/// daemon's stale-socket check has already ruled that case out, so this
/// mainly guards a lost race between two concurrent startups).
fn write_pid_file(path: &Path) -> anyhow::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    write!(file, "{}", std::process::id())?;
    Ok(())
}

/// Bind the socket, start the mail loop and accept loop. Returns once both
/// are running; does not block on shutdown (see `RunningDaemon::shutdown`).
pub async fn start(config: Config) -> anyhow::Result<RunningDaemon> {
    let namespace = config.resolve_namespace();
    std::fs::create_dir_all(&namespace)?;

    let socket_path = config.socket_path();
    let pid_path = config.pid_path();
    clear_stale_socket(&socket_path)?;
    write_pid_file(&pid_path)?;

    let host = build_terminal_host(&config)?;
    let manager_config = ManagerConfig {
        mail_tick: std::time::Duration::from_millis(config.mail_tick_ms),
        idle_nudge: std::time::Duration::from_secs(config.idle_nudge_secs),
        chat_log_cap_bytes: config.chat_log_cap_bytes,
        ..ManagerConfig::default()
    };
    let manager = Manager::new(build_backend_registry(&config), host, config.host_session.clone(), config.audit_log_cap_bytes, manager_config);
    let tree = Arc::new(Tree::new(Arc::clone(&manager)));

    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "9p listener bound");
    let server = Server::bind(listener, tree);
    let stop = server.stop_token();
    let server_task = tokio::spawn(server.run());

    let mail_loop = manager.spawn_mail_loop();

    Ok(RunningDaemon { manager, socket_path, pid_path, stop, mail_loop, server_task })
}

impl RunningDaemon {
    /// Graceful shutdown: stop accepting, stop the mail loop, Close every
    /// session (destroying windows), close the listener, remove the
    /// socket and PID file.
    pub async fn shutdown(self) {
        info!("shutdown requested");
        self.stop.cancel();
        self.manager.stop_mail_loop();

        for id in self.manager.list_ids().await {
            if let Err(e) = self.manager.close_session(&id).await {
                warn!(session = %id, error = %e, "failed to close session during shutdown");
            }
        }

        let _ = self.server_task.await;
        self.mail_loop.abort();

        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.pid_path);
        info!("shutdown complete");
    }
}

/// Run until `SIGINT`/`SIGTERM`, then shut down gracefully. The daemon
/// stays attached to its controlling terminal, logs to stdout/stderr, and
/// exits on signal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    crate::logging::init(&config);
    let daemon = start(config).await?;

    wait_for_shutdown_signal().await;
    daemon.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            None
        }
    };
    let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            None
        }
    };

    tokio::select! {
        _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
            info!("received SIGTERM");
        }
        _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
            info!("received SIGINT");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "run_tests.rs"]
mod tests;
