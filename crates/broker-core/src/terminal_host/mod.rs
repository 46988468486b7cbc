// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Terminal Host Adapter: the only component allowed to talk to the
//! multiplexer that hosts agent windows. Session/window operations over a
//! persistent host, since one daemon multiplexes many agent windows rather
//! than owning a single PTY for the process lifetime.

pub mod native;
pub mod tmux;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::BrokerError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifies one window inside one host session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowTarget {
    pub host_session: String,
    pub window: String,
}

impl WindowTarget {
    pub fn new(host_session: impl Into<String>, window: impl Into<String>) -> Self {
        Self { host_session: host_session.into(), window: window.into() }
    }
}

/// Abstract operations on a persistent terminal-multiplexer host.
///
/// Object-safe so daemon wiring can pick an implementation (native or a
/// real `tmux` binary) at startup and hold it as `Arc<dyn TerminalHost>`.
pub trait TerminalHost: Send + Sync {
    fn ensure_host_session(&self, name: &str, rows: u16, cols: u16) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn create_window(&self, target: &WindowTarget, rows: u16, cols: u16) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn destroy_window(&self, target: &WindowTarget) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn send_literal(&self, target: &WindowTarget, text: String) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn send_keys(&self, target: &WindowTarget, keys: Vec<String>) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn pipe_pane(&self, target: &WindowTarget, fifo_path: std::path::PathBuf) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn close_pipe(&self, target: &WindowTarget) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn pane_pid(&self, target: &WindowTarget) -> BoxFuture<'_, Result<u32, BrokerError>>;

    fn find_backend_pid(&self, pane_pid: u32, backend_comm: &str) -> BoxFuture<'_, Result<u32, BrokerError>>;

    fn set_env(&self, target: &WindowTarget, key: String, value: String) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Encode a named key (shared by both implementations) into the raw bytes a
/// terminal expects.
pub fn encode_key(name: &str) -> Option<Vec<u8>> {
    let bytes: &[u8] = match name {
        "enter" | "Enter" => b"\r",
        "tab" | "Tab" => b"\t",
        "escape" | "Escape" => b"\x1b",
        "up" | "Up" => b"\x1b[A",
        "down" | "Down" => b"\x1b[B",
        "right" | "Right" => b"\x1b[C",
        "left" | "Left" => b"\x1b[D",
        "space" | "Space" => b" ",
        "backspace" | "Backspace" => b"\x7f",
        _ => {
            if let Some(letter) = name.strip_prefix("ctrl-").or_else(|| name.strip_prefix("Ctrl-")) {
                let mut chars = letter.chars();
                let c = chars.next()?;
                if chars.next().is_some() || !c.is_ascii_alphabetic() {
                    return None;
                }
                let code = (c.to_ascii_uppercase() as u8) - b'A' + 1;
                return Some(vec![code]);
            }
            return None;
        }
    };
    Some(bytes.to_vec())
}

/// Walk `/proc/<pane_pid>/task/*/children` breadth-first to find the first
/// descendant whose `/proc/<pid>/comm` matches `backend_comm`. Shared by
/// both host implementations since neither changes how Linux exposes the
/// process tree.
pub fn find_descendant_by_comm(pane_pid: u32, backend_comm: &str) -> Result<u32, BrokerError> {
    use std::collections::VecDeque;

    let mut frontier: VecDeque<u32> = VecDeque::new();
    frontier.push_back(pane_pid);
    let mut visited = std::collections::HashSet::new();

    while let Some(pid) = frontier.pop_front() {
        if !visited.insert(pid) {
            continue;
        }
        for child in children_of(pid) {
            if comm_of(child).as_deref() == Some(backend_comm) {
                return Ok(child);
            }
            frontier.push_back(child);
        }
    }

    Err(BrokerError::host_error(format!("no descendant of pid {pane_pid} matches backend {backend_comm}")))
}

fn children_of(pid: u32) -> Vec<u32> {
    let task_dir = format!("/proc/{pid}/task");
    let Ok(entries) = std::fs::read_dir(&task_dir) else { return Vec::new() };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let children_path = entry.path().join("children");
        if let Ok(contents) = std::fs::read_to_string(children_path) {
            out.extend(contents.split_whitespace().filter_map(|s| s.parse::<u32>().ok()));
        }
    }
    out
}

fn comm_of(pid: u32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{pid}/comm")).ok().map(|s| s.trim().to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "mod_tests.rs"]
mod tests;
