// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named factories that produce an [`crate::session::AgentSession`] with a
//! specific command, environment, and startup dialog policy. One
//! [`BackendConfig`] value per backend rather than a module per agent,
//! since there is no per-backend screen-scraping detector here, only an
//! optional startup dialog and an optional slash-command whitelist.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of feeding newly captured output to a [`StartupDialog`].
pub enum DialogAction {
    /// Send these literal keystrokes (already encoded, e.g. `"y\n"`) and
    /// keep watching.
    Send(String),
    /// Nothing to do yet; keep watching.
    Wait,
    /// The agent has reached its ready prompt.
    Done,
}

/// Backend-specific handling of the text an agent prints before it reaches
/// its first idle prompt (e.g. a trust dialog or permission banner).
pub trait StartupDialog: Send + Sync {
    fn handle(&self, output_so_far: &[u8]) -> DialogAction;
}

/// A no-op dialog for backends that never prompt at startup.
pub struct NoStartupDialog;

impl StartupDialog for NoStartupDialog {
    fn handle(&self, _output_so_far: &[u8]) -> DialogAction {
        DialogAction::Done
    }
}

/// Whitelists which `/`-prefixed commands a `Send` may forward to the
/// backend unmodified.
pub trait CommandHandler: Send + Sync {
    fn allows(&self, command: &str) -> bool;
}

/// Accepts every slash command.
pub struct AllowAllCommands;

impl CommandHandler for AllowAllCommands {
    fn allows(&self, _command: &str) -> bool {
        true
    }
}

/// Configuration for one named backend: the command it runs, its
/// environment, terminal size, startup budget, and optional startup/command
/// hooks.
pub struct BackendConfig {
    pub name: String,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub rows: u16,
    pub cols: u16,
    pub startup_timeout: Duration,
    pub command_handler: Arc<dyn CommandHandler>,
    pub startup_dialog: Arc<dyn StartupDialog>,
}

impl BackendConfig {
    pub fn generic(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            env: HashMap::new(),
            rows: 40,
            cols: 120,
            startup_timeout: Duration::from_secs(30),
            command_handler: Arc::new(AllowAllCommands),
            startup_dialog: Arc::new(NoStartupDialog),
        }
    }

    /// The `demo` backend used by tests and examples: a scripted shell
    /// session with a trivial startup dialog so construction/readiness logic
    /// has something real to exercise without spawning a real AI CLI.
    pub fn demo() -> Self {
        Self::generic("demo", vec!["/bin/sh".into()])
    }
}

/// String-keyed mapping from backend name to its configuration. Populated at
/// daemon start; adding a backend is configuration, not code.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<BackendConfig>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self { backends: HashMap::new() }
    }

    pub fn register(&mut self, config: BackendConfig) {
        self.backends.insert(config.name.clone(), Arc::new(config));
    }

    pub fn get(&self, name: &str) -> Option<Arc<BackendConfig>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(BackendConfig::demo());
        registry
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "backend_tests.rs"]
mod tests;
