// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process "multiplexer" built directly on `forkpty`, modeling the
//! session/window tree without shelling out to a real multiplexer binary.
//! One fd per named window, addressable by `WindowTarget` and outliving
//! any single command run inside it, via an unsafe `forkpty` call, an
//! `AsyncFd`-wrapped non-blocking master fd, and SIGHUP-then-SIGKILL
//! teardown. The window itself survives so Stop/Restart stay cheap.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;

use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{execvp, ForkResult, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{BoxFuture, TerminalHost, WindowTarget};
use crate::error::BrokerError;
use crate::pty::nbio::{set_nonblocking, write_all, PtyFd};

struct Window {
    master: Arc<AsyncFd<PtyFd>>,
    shell_pid: Pid,
    pipe_cancel: Option<CancellationToken>,
}

/// `forkpty`-backed [`TerminalHost`]. One forked login shell per window;
/// `pipe_pane` spawns a task copying the shell's output into the session's
/// named pipe.
pub struct NativeTerminalHost {
    shell: String,
    windows: Mutex<HashMap<WindowTarget, Window>>,
}

impl NativeTerminalHost {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into(), windows: Mutex::new(HashMap::new()) }
    }
}

impl TerminalHost for NativeTerminalHost {
    fn ensure_host_session(&self, _name: &str, _rows: u16, _cols: u16) -> BoxFuture<'_, Result<(), BrokerError>> {
        // Native windows are independent forkpty'd shells; there is no
        // shared host-session resource to create up front.
        Box::pin(async move { Ok(()) })
    }

    fn create_window(&self, target: &WindowTarget, rows: u16, cols: u16) -> BoxFuture<'_, Result<(), BrokerError>> {
        let target = target.clone();
        let shell = self.shell.clone();
        Box::pin(async move {
            let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

            // SAFETY: forkpty's child is partially initialized until exec;
            // the child branch below only calls async-signal-safe libc
            // functions before execvp.
            #[allow(unsafe_code)]
            let result = unsafe { forkpty(&winsize, None) }
                .map_err(|e| BrokerError::host_error(format!("forkpty failed: {e}")))?;
            let ForkptyResult { master, fork_result } = result;

            match fork_result {
                ForkResult::Child => {
                    std::env::set_var("TERM", "xterm-256color");
                    let cmd = CString::new(shell.as_bytes())
                        .map_err(|e| BrokerError::host_error(e.to_string()))?;
                    execvp(&cmd, &[cmd.clone()]).map_err(|e| BrokerError::host_error(e.to_string()))?;
                    unreachable!("execvp does not return on success");
                }
                ForkResult::Parent { child } => {
                    set_nonblocking(&master).map_err(|e| BrokerError::host_error(e.to_string()))?;
                    let afd =
                        AsyncFd::new(PtyFd(master)).map_err(|e| BrokerError::host_error(e.to_string()))?;
                    let mut windows = self.windows.lock().await;
                    windows.insert(
                        target,
                        Window { master: Arc::new(afd), shell_pid: child, pipe_cancel: None },
                    );
                    Ok(())
                }
            }
        })
    }

    fn destroy_window(&self, target: &WindowTarget) -> BoxFuture<'_, Result<(), BrokerError>> {
        let target = target.clone();
        Box::pin(async move {
            let mut windows = self.windows.lock().await;
            let Some(window) = windows.remove(&target) else {
                return Err(BrokerError::not_found(format!("no window {target:?}")));
            };
            if let Some(cancel) = window.pipe_cancel {
                cancel.cancel();
            }
            // Best-effort graceful shutdown: SIGHUP then SIGKILL.
            let _ = kill(window.shell_pid, Signal::SIGHUP);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = kill(window.shell_pid, Signal::SIGKILL);
            Ok(())
        })
    }

    fn send_literal(&self, target: &WindowTarget, text: String) -> BoxFuture<'_, Result<(), BrokerError>> {
        let target = target.clone();
        Box::pin(async move {
            let master = self.master_of(&target).await?;
            write_all(&master, text.as_bytes()).await.map_err(|e| BrokerError::host_error(e.to_string()))
        })
    }

    fn send_keys(&self, target: &WindowTarget, keys: Vec<String>) -> BoxFuture<'_, Result<(), BrokerError>> {
        let target = target.clone();
        Box::pin(async move {
            let master = self.master_of(&target).await?;
            for key in &keys {
                let bytes = super::encode_key(key)
                    .ok_or_else(|| BrokerError::invalid_argument(format!("unknown key name {key}")))?;
                write_all(&master, &bytes).await.map_err(|e| BrokerError::host_error(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn pipe_pane(&self, target: &WindowTarget, fifo_path: PathBuf) -> BoxFuture<'_, Result<(), BrokerError>> {
        let target = target.clone();
        Box::pin(async move {
            let master = self.master_of(&target).await?;
            let cancel = CancellationToken::new();
            let task_cancel = cancel.clone();

            {
                let mut windows = self.windows.lock().await;
                if let Some(window) = windows.get_mut(&target) {
                    window.pipe_cancel = Some(cancel);
                }
            }

            tokio::spawn(async move {
                let file = match tokio::fs::OpenOptions::new().write(true).open(&fifo_path).await {
                    Ok(f) => f,
                    Err(_) => return,
                };
                use tokio::io::AsyncWriteExt;
                let mut file = file;
                let mut buf = vec![0u8; 8192];
                loop {
                    tokio::select! {
                        _ = task_cancel.cancelled() => break,
                        result = crate::pty::nbio::read_chunk(&master, &mut buf) => {
                            match result {
                                Ok(0) => break,
                                Ok(n) => {
                                    if file.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    }
                }
            });

            Ok(())
        })
    }

    fn close_pipe(&self, target: &WindowTarget) -> BoxFuture<'_, Result<(), BrokerError>> {
        let target = target.clone();
        Box::pin(async move {
            let mut windows = self.windows.lock().await;
            if let Some(window) = windows.get_mut(&target) {
                if let Some(cancel) = window.pipe_cancel.take() {
                    cancel.cancel();
                }
            }
            Ok(())
        })
    }

    fn pane_pid(&self, target: &WindowTarget) -> BoxFuture<'_, Result<u32, BrokerError>> {
        let target = target.clone();
        Box::pin(async move {
            let windows = self.windows.lock().await;
            let window = windows
                .get(&target)
                .ok_or_else(|| BrokerError::not_found(format!("no window {target:?}")))?;
            Ok(window.shell_pid.as_raw() as u32)
        })
    }

    fn find_backend_pid(&self, pane_pid: u32, backend_comm: &str) -> BoxFuture<'_, Result<u32, BrokerError>> {
        let backend_comm = backend_comm.to_owned();
        Box::pin(async move { super::find_descendant_by_comm(pane_pid, &backend_comm) })
    }

    fn set_env(&self, target: &WindowTarget, key: String, value: String) -> BoxFuture<'_, Result<(), BrokerError>> {
        let target = target.clone();
        Box::pin(async move {
            let master = self.master_of(&target).await?;
            let literal = format!("export {key}={}\n", shell_quote(&value));
            write_all(&master, literal.as_bytes()).await.map_err(|e| BrokerError::host_error(e.to_string()))
        })
    }
}

impl NativeTerminalHost {
    async fn master_of(&self, target: &WindowTarget) -> Result<Arc<AsyncFd<PtyFd>>, BrokerError> {
        let windows = self.windows.lock().await;
        windows
            .get(target)
            .map(|w| Arc::clone(&w.master))
            .ok_or_else(|| BrokerError::not_found(format!("no window {target:?}")))
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "native_tests.rs"]
mod tests;
