// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end test harness: spawns the real `brokerd` binary, waits for its
//! 9P socket to come up, and hands back a connected [`broker_9p::client::Client`]
//! so integration tests can drive full scenarios over the wire protocol
//! exactly as a real front-end would.

use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::time::Duration;

use broker_9p::client::Client;
use tokio::net::UnixStream;

/// Resolve the path to the compiled `brokerd` binary.
pub fn brokerd_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("brokerd")
}

/// A running `brokerd` process, owning a private namespace directory, killed
/// on drop.
pub struct BrokerProcess {
    child: Child,
    namespace: tempfile::TempDir,
}

impl BrokerProcess {
    /// Spawn `brokerd` against a fresh temp namespace, using the
    /// `forkpty`-backed native terminal host (no real `tmux` binary
    /// required) and fast mail-loop/idle-nudge ticks so tests don't wait on
    /// the production 5s/15s defaults.
    pub fn start() -> anyhow::Result<Self> {
        let binary = brokerd_binary();
        anyhow::ensure!(binary.exists(), "brokerd binary not found at {}; run `cargo build` first", binary.display());

        let namespace = tempfile::tempdir()?;
        let child = std::process::Command::new(&binary)
            .arg("--namespace")
            .arg(namespace.path())
            .arg("--terminal-host")
            .arg("native")
            .arg("--mail-tick-ms")
            .arg("200")
            .arg("--idle-nudge-secs")
            .arg("1")
            .arg("--log-format")
            .arg("text")
            .arg("--log-level")
            .arg("warn")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, namespace })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.namespace.path().join("agent")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.namespace.path().join("brokerd.pid")
    }

    /// Poll for the socket to exist and accept connections, then return a
    /// version-negotiated, attached client.
    pub async fn connect(&self) -> anyhow::Result<Client<UnixStream>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let socket_path = self.socket_path();
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("brokerd did not open its socket within 10s");
            }
            match Client::connect(&socket_path).await {
                Ok(client) => return Ok(client),
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("brokerd did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Send a named signal (`"TERM"`, `"INT"`) to the daemon process via the
    /// `kill` utility, to exercise the graceful-shutdown path without
    /// reaching for unsafe FFI in a test-only crate.
    pub fn send_signal(&self, signal: &str) -> anyhow::Result<()> {
        let status = std::process::Command::new("kill").arg(format!("-{signal}")).arg(self.child.id().to_string()).status()?;
        anyhow::ensure!(status.success(), "kill -{signal} {} failed", self.child.id());
        Ok(())
    }
}

impl Drop for BrokerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One parsed `/list` row: `id\tbackend\tstate\talias\tcwd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub id: String,
    pub backend: String,
    pub state: String,
    pub alias: String,
    pub cwd: String,
}

pub fn parse_list(raw: &str) -> Vec<ListRow> {
    raw.lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(5, '\t');
            Some(ListRow {
                id: parts.next()?.to_string(),
                backend: parts.next()?.to_string(),
                state: parts.next()?.to_string(),
                alias: parts.next()?.to_string(),
                cwd: parts.next()?.to_string(),
            })
        })
        .collect()
}

/// One parsed `/status` row: `id state idle_seconds inbox_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub id: String,
    pub state: String,
    pub idle_seconds: u64,
    pub inbox_count: usize,
}

pub fn parse_status(raw: &str) -> Vec<StatusRow> {
    raw.lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(StatusRow {
                id: parts.next()?.to_string(),
                state: parts.next()?.to_string(),
                idle_seconds: parts.next()?.parse().ok()?,
                inbox_count: parts.next()?.parse().ok()?,
            })
        })
        .collect()
}

/// Directory listing entries as encoded by `Tree::encode_directory`:
/// `name\tdir-or-file`.
pub fn parse_dir(raw: &str) -> Vec<(String, bool)> {
    raw.lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let (name, kind) = line.split_once('\t')?;
            Some((name.to_string(), kind == "dir"))
        })
        .collect()
}

/// Create a session via `new <backend> <cwd>` on `/ctl` and return its id,
/// found by diffing `/list` before and after (the `ctl` write itself
/// reports only success/failure).
pub async fn create_session(client: &mut Client<UnixStream>, backend: &str, cwd: &Path) -> anyhow::Result<String> {
    let before: std::collections::HashSet<String> =
        parse_list(&String::from_utf8_lossy(&client.read_file("list").await?)).into_iter().map(|r| r.id).collect();

    client.write_file("ctl", format!("new {backend} {}", cwd.display())).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let after = parse_list(&String::from_utf8_lossy(&client.read_file("list").await?));
        if let Some(row) = after.iter().find(|r| !before.contains(&r.id)) {
            return Ok(row.id.clone());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("new session never appeared in /list");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll `/<id>/state` until it reads `want` or `timeout` elapses.
pub async fn wait_for_state(client: &mut Client<UnixStream>, id: &str, want: &str, timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = String::from_utf8_lossy(&client.read_file(&format!("{id}/state")).await?).into_owned();
        if state == want {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("{id}/state never reached {want}, last saw {state}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
