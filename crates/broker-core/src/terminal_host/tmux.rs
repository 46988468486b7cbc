// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`TerminalHost`] implementation that shells out to a real `tmux` binary,
//! for operators who want sessions they can attach to interactively outside
//! the daemon. Every operation is one `tmux` subcommand invocation; there is
//! no persistent state beyond the configured binary path.

use std::path::PathBuf;

use tokio::process::Command;

use super::{BoxFuture, TerminalHost, WindowTarget};
use crate::error::BrokerError;

pub struct TmuxTerminalHost {
    tmux_bin: String,
}

impl TmuxTerminalHost {
    pub fn new(tmux_bin: impl Into<String>) -> Self {
        Self { tmux_bin: tmux_bin.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<String, BrokerError> {
        let output = Command::new(&self.tmux_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| BrokerError::host_error(format!("spawning {}: {e}", self.tmux_bin)))?;
        if !output.status.success() {
            return Err(BrokerError::host_error(format!(
                "{} {:?} failed: {}",
                self.tmux_bin,
                args,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn pane_name(target: &WindowTarget) -> String {
        format!("{}:{}", target.host_session, target.window)
    }
}

impl TerminalHost for TmuxTerminalHost {
    fn ensure_host_session(&self, name: &str, rows: u16, cols: u16) -> BoxFuture<'_, Result<(), BrokerError>> {
        let name = name.to_owned();
        Box::pin(async move {
            let has = Command::new(&self.tmux_bin)
                .args(["has-session", "-t", &name])
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if has {
                return Ok(());
            }
            self.run(&[
                "new-session",
                "-d",
                "-s",
                &name,
                "-x",
                &cols.to_string(),
                "-y",
                &rows.to_string(),
            ])
            .await?;
            Ok(())
        })
    }

    fn create_window(&self, target: &WindowTarget, rows: u16, cols: u16) -> BoxFuture<'_, Result<(), BrokerError>> {
        let target = target.clone();
        Box::pin(async move {
            self.run(&[
                "new-window",
                "-d",
                "-t",
                &target.host_session,
                "-n",
                &target.window,
                "-x",
                &cols.to_string(),
                "-y",
                &rows.to_string(),
            ])
            .await?;
            Ok(())
        })
    }

    fn destroy_window(&self, target: &WindowTarget) -> BoxFuture<'_, Result<(), BrokerError>> {
        let pane = Self::pane_name(target);
        Box::pin(async move {
            self.run(&["kill-window", "-t", &pane]).await?;
            Ok(())
        })
    }

    fn send_literal(&self, target: &WindowTarget, text: String) -> BoxFuture<'_, Result<(), BrokerError>> {
        let pane = Self::pane_name(target);
        Box::pin(async move {
            self.run(&["send-keys", "-t", &pane, "-l", "--", &text]).await?;
            Ok(())
        })
    }

    fn send_keys(&self, target: &WindowTarget, keys: Vec<String>) -> BoxFuture<'_, Result<(), BrokerError>> {
        let pane = Self::pane_name(target);
        Box::pin(async move {
            let mut args: Vec<&str> = vec!["send-keys", "-t", &pane];
            args.extend(keys.iter().map(|k| k.as_str()));
            self.run(&args).await?;
            Ok(())
        })
    }

    fn pipe_pane(&self, target: &WindowTarget, fifo_path: PathBuf) -> BoxFuture<'_, Result<(), BrokerError>> {
        let pane = Self::pane_name(target);
        Box::pin(async move {
            let path = fifo_path.to_string_lossy().into_owned();
            self.run(&["pipe-pane", "-t", &pane, "-o", &format!("cat >> {path}")]).await?;
            Ok(())
        })
    }

    fn close_pipe(&self, target: &WindowTarget) -> BoxFuture<'_, Result<(), BrokerError>> {
        let pane = Self::pane_name(target);
        Box::pin(async move {
            self.run(&["pipe-pane", "-t", &pane]).await?;
            Ok(())
        })
    }

    fn pane_pid(&self, target: &WindowTarget) -> BoxFuture<'_, Result<u32, BrokerError>> {
        let pane = Self::pane_name(target);
        Box::pin(async move {
            let out = self.run(&["list-panes", "-t", &pane, "-F", "#{pane_pid}"]).await?;
            out.lines()
                .next()
                .and_then(|l| l.trim().parse().ok())
                .ok_or_else(|| BrokerError::host_error("tmux returned no pane_pid"))
        })
    }

    fn find_backend_pid(&self, pane_pid: u32, backend_comm: &str) -> BoxFuture<'_, Result<u32, BrokerError>> {
        let backend_comm = backend_comm.to_owned();
        Box::pin(async move { super::find_descendant_by_comm(pane_pid, &backend_comm) })
    }

    fn set_env(&self, target: &WindowTarget, key: String, value: String) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.run(&["set-environment", "-t", &target.host_session, &key, &value]).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "tmux_tests.rs"]
mod tests;
