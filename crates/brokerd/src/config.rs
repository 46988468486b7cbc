// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Multi-agent session broker daemon.
#[derive(Debug, Parser)]
#[command(name = "brokerd", version, about)]
pub struct Config {
    /// Directory holding the daemon's socket and PID file. Defaults to
    /// `$XDG_RUNTIME_DIR/coop-broker`, falling back to `/tmp/<uid>-coop-broker`.
    #[arg(long, env = "COOP_BROKER_NAMESPACE")]
    pub namespace: Option<PathBuf>,

    /// Path to sandbox command-rewrite rules. Absent means the identity
    /// function: commands run exactly as given.
    #[arg(long, env = "COOP_BROKER_SANDBOX_CONFIG")]
    pub sandbox_config: Option<PathBuf>,

    /// Which terminal host adapter to use.
    #[arg(long, env = "COOP_BROKER_TERMINAL_HOST", default_value = "native")]
    pub terminal_host: String,

    /// `tmux` binary name/path, only consulted when `--terminal-host=tmux`.
    #[arg(long, env = "COOP_BROKER_TMUX_BIN", default_value = "tmux")]
    pub tmux_bin: String,

    /// Host session name every agent window lives under.
    #[arg(long, env = "COOP_BROKER_HOST_SESSION", default_value = "agents")]
    pub host_session: String,

    /// Terminal rows for new agent windows.
    #[arg(long, env = "COOP_BROKER_ROWS", default_value = "40")]
    pub rows: u16,

    /// Terminal columns for new agent windows.
    #[arg(long, env = "COOP_BROKER_COLS", default_value = "120")]
    pub cols: u16,

    /// Mail-processing loop tick, in milliseconds.
    #[arg(long, env = "COOP_BROKER_MAIL_TICK_MS", default_value = "5000")]
    pub mail_tick_ms: u64,

    /// Seconds an agent must be idle with pending inbox mail before it is nudged.
    #[arg(long, env = "COOP_BROKER_IDLE_NUDGE_SECS", default_value = "15")]
    pub idle_nudge_secs: u64,

    /// Per-session chat log cap, in bytes.
    #[arg(long, env = "COOP_BROKER_CHAT_LOG_CAP_BYTES", default_value = "2097152")]
    pub chat_log_cap_bytes: usize,

    /// Shared audit log cap, in bytes.
    #[arg(long, env = "COOP_BROKER_AUDIT_LOG_CAP_BYTES", default_value = "4194304")]
    pub audit_log_cap_bytes: usize,

    /// Log format (json or text).
    #[arg(long, env = "COOP_BROKER_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "COOP_BROKER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Which `TerminalHost` implementation the daemon should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalHostKind {
    Native,
    Tmux,
}

impl Config {
    /// Validate the configuration after parsing, before any I/O happens.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.terminal_host_kind()?;
        if let Some(ref path) = self.sandbox_config {
            if !path.exists() {
                anyhow::bail!("--sandbox-config path does not exist: {}", path.display());
            }
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid --log-format: {other} (expected json or text)"),
        }
        Ok(())
    }

    pub fn terminal_host_kind(&self) -> anyhow::Result<TerminalHostKind> {
        match self.terminal_host.as_str() {
            "native" => Ok(TerminalHostKind::Native),
            "tmux" => Ok(TerminalHostKind::Tmux),
            other => anyhow::bail!("invalid --terminal-host: {other} (expected native or tmux)"),
        }
    }

    /// Resolve the namespace directory from an explicit flag, the
    /// XDG runtime directory, or a per-uid fallback under `/tmp`.
    pub fn resolve_namespace(&self) -> PathBuf {
        if let Some(ref namespace) = self.namespace {
            return namespace.clone();
        }
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            return PathBuf::from(runtime_dir).join("coop-broker");
        }
        let uid = nix::unistd::getuid();
        PathBuf::from(format!("/tmp/{uid}-coop-broker"))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.resolve_namespace().join("agent")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.resolve_namespace().join("brokerd.pid")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "config_tests.rs"]
mod tests;
