// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent session state machine: construction, the output reader,
//! synchronous `Send`, and the `Stop`/`Restart`/`Close`/`Refresh` lifecycle
//! operations.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::backend::{BackendConfig, DialogAction};
use crate::chatlog::ChatLog;
use crate::error::BrokerError;
use crate::terminal_host::{TerminalHost, WindowTarget};

/// Legal session lifecycle states and the transitions between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Idle,
    Running,
    Stopped,
    Error,
    Exited,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Exited => "exited",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, BrokerError> {
        match raw {
            "starting" => Ok(Self::Starting),
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            "exited" => Ok(Self::Exited),
            other => Err(BrokerError::invalid_argument(format!("unknown state {other}"))),
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Starting, Idle)
                | (Starting, Error)
                | (Idle, Running)
                | (Idle, Stopped)
                | (Idle, Exited)
                | (Running, Idle)
                | (Running, Error)
                | (Running, Stopped)
                | (Running, Exited)
                | (Error, Idle)
                | (Error, Starting)
                | (Error, Exited)
                | (Stopped, Starting)
                | (Stopped, Exited)
        )
    }
}

/// Options supplied when a session is created. `role`/`tasks` are opaque
/// pass-through strings: the daemon never interprets them, only exposes
/// them as read-only files.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub cwd: PathBuf,
    pub role: Option<String>,
    pub tasks: Vec<String>,
}

fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

const STOP_SIGNAL_GAP: Duration = Duration::from_millis(500);
const STOP_TERM_GAP: Duration = Duration::from_millis(300);
const STOP_KILL_GAP: Duration = Duration::from_millis(100);
const SEND_LITERAL_SETTLE: Duration = Duration::from_millis(200);
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PIPE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_QUIESCENCE: Duration = Duration::from_millis(300);
const RESTART_DEBOUNCE: Duration = Duration::from_secs(5);
const WINDOW_TEARDOWN_SETTLE: Duration = Duration::from_millis(50);
const READER_STOPPED_POLL: Duration = Duration::from_millis(100);
const SCRATCH_CAP: usize = 64 * 1024;

/// One live agent. All mutable fields are behind their own lock; no two
/// sessions ever share a lock and no operation holds a session lock while
/// calling into the terminal host.
pub struct AgentSession {
    pub id: String,
    pub backend: Arc<BackendConfig>,
    pub cwd: PathBuf,
    pub role: Option<String>,
    pub tasks: Vec<String>,
    pub created_at: u64,
    pub terminal_session: String,
    pub terminal_window: String,

    host: Arc<dyn TerminalHost>,
    fifo_path: RwLock<PathBuf>,

    state: RwLock<SessionState>,
    error_detail: RwLock<Option<String>>,
    pid: AtomicU32,
    idle_since: RwLock<Option<Instant>>,
    alias: RwLock<Option<String>>,
    context: RwLock<String>,

    /// Small bounded window of recently captured output, consulted only by
    /// the startup dialog; never persisted or exposed over the filesystem
    /// server.
    scratch: Mutex<Vec<u8>>,

    reader_generation: AtomicU64,
    reader_cancel: Mutex<CancellationToken>,
    transitioning: AtomicBool,
    intentionally_stopped: AtomicBool,
    last_restart_attempt: Mutex<Option<Instant>>,

    pub chat_log: Mutex<ChatLog>,
}

impl AgentSession {
    /// Run the full construction sequence and return the session already
    /// wrapped in its owning `Arc`, since the output reader spawned partway
    /// through needs a `'static` handle back to it.
    pub async fn construct(
        id: String,
        backend: Arc<BackendConfig>,
        host: Arc<dyn TerminalHost>,
        terminal_session: String,
        options: SessionOptions,
        chat_log_cap: usize,
    ) -> Result<Arc<Self>, BrokerError> {
        let target = WindowTarget::new(terminal_session.clone(), id.clone());

        host.ensure_host_session(&terminal_session, backend.rows, backend.cols).await?;
        host.create_window(&target, backend.rows, backend.cols).await?;

        for (k, v) in &backend.env {
            if let Err(e) = host.set_env(&target, k.clone(), v.clone()).await {
                let _ = host.destroy_window(&target).await;
                return Err(e);
            }
        }

        let fifo_path = std::env::temp_dir().join(format!("broker-{id}.fifo"));
        if let Err(e) = make_fifo(&fifo_path) {
            let _ = host.destroy_window(&target).await;
            return Err(e);
        }

        let reader_file = match open_pipe_with_timeout(&host, &target, &fifo_path).await {
            Ok(file) => file,
            Err(e) => {
                let _ = host.destroy_window(&target).await;
                let _ = std::fs::remove_file(&fifo_path);
                return Err(e);
            }
        };

        let cwd_line = format!("cd {}\n", shell_quote(&options.cwd.to_string_lossy()));
        if let Err(e) = host.send_literal(&target, cwd_line).await {
            let _ = host.destroy_window(&target).await;
            return Err(e);
        }
        let command_line = format!("{}\n", shell_join(&backend.command));
        if let Err(e) = host.send_literal(&target, command_line).await {
            let _ = host.destroy_window(&target).await;
            return Err(e);
        }

        let pane_pid = match host.pane_pid(&target).await {
            Ok(p) => p,
            Err(e) => {
                let _ = host.destroy_window(&target).await;
                return Err(e);
            }
        };
        let child_pid = host
            .find_backend_pid(pane_pid, last_path_component(&backend.command[0]))
            .await
            .unwrap_or(pane_pid);

        let session = Arc::new(Self {
            id,
            backend: Arc::clone(&backend),
            cwd: options.cwd,
            role: options.role,
            tasks: options.tasks,
            created_at: now_unix_secs(),
            terminal_session,
            terminal_window: target.window.clone(),
            host: Arc::clone(&host),
            fifo_path: RwLock::new(fifo_path),
            state: RwLock::new(SessionState::Starting),
            error_detail: RwLock::new(None),
            pid: AtomicU32::new(child_pid),
            idle_since: RwLock::new(None),
            alias: RwLock::new(None),
            context: RwLock::new(String::new()),
            scratch: Mutex::new(Vec::new()),
            reader_generation: AtomicU64::new(0),
            reader_cancel: Mutex::new(CancellationToken::new()),
            transitioning: AtomicBool::new(false),
            intentionally_stopped: AtomicBool::new(false),
            last_restart_attempt: Mutex::new(None),
            chat_log: Mutex::new(ChatLog::new(chat_log_cap)),
        });

        session.start_reader(reader_file, 0).await;

        match session.run_startup_dialog().await {
            Ok(()) => {
                *session.idle_since.write().await = Some(Instant::now());
                *session.state.write().await = SessionState::Idle;
                Ok(session)
            }
            Err(e) => {
                *session.state.write().await = SessionState::Error;
                *session.error_detail.write().await = Some(e.detail.clone());
                Err(e)
            }
        }
    }

    /// Run the backend's startup dialog within the configured budget,
    /// consulting the scratch buffer the reader is concurrently filling,
    /// confirming readiness via quiescence after the dialog reports `Done`.
    async fn run_startup_dialog(&self) -> Result<(), BrokerError> {
        let target = self.window_target();
        let deadline = tokio::time::Instant::now() + self.backend.startup_timeout;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(BrokerError::startup_failed("startup dialog exceeded timeout"));
            }
            let snapshot = self.scratch.lock().await.clone();
            match self.backend.startup_dialog.handle(&snapshot) {
                DialogAction::Done => break,
                DialogAction::Send(text) => {
                    self.host.send_literal(&target, text).await?;
                }
                DialogAction::Wait => {}
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tokio::time::sleep(STARTUP_QUIESCENCE).await;
        Ok(())
    }

    fn window_target(&self) -> WindowTarget {
        WindowTarget::new(self.terminal_session.clone(), self.terminal_window.clone())
    }

    /// Spawn the output reader for `generation`, replacing the session's
    /// cancellation token. The reader's only state mutation on EOF/error is
    /// the Stopped transition; all other transitions belong to the caller
    /// of Send/Stop/Restart/Close/Refresh.
    async fn start_reader(self: &Arc<Self>, mut file: tokio::fs::File, generation: u64) {
        let cancel = CancellationToken::new();
        *self.reader_cancel.lock().await = cancel.clone();

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = file.read(&mut buf) => {
                        match result {
                            Ok(0) => break,
                            Ok(n) => {
                                let mut scratch = session.scratch.lock().await;
                                scratch.extend_from_slice(&buf[..n]);
                                if scratch.len() > SCRATCH_CAP {
                                    let excess = scratch.len() - SCRATCH_CAP;
                                    scratch.drain(0..excess);
                                }
                            }
                            Err(_) => break,
                        }
                    }
                }
            }

            // EOF or read error: respect the generation/state guard so a
            // stale reader from a prior restart never clobbers live state.
            if session.reader_generation.load(Ordering::Acquire) != generation {
                return;
            }
            if *session.state.read().await == SessionState::Exited {
                return;
            }
            *session.state.write().await = SessionState::Stopped;
            session.pid.store(0, Ordering::Release);

            loop {
                if *session.state.read().await == SessionState::Exited {
                    return;
                }
                if session.reader_generation.load(Ordering::Acquire) != generation {
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(READER_STOPPED_POLL) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    pub async fn alias(&self) -> Option<String> {
        self.alias.read().await.clone()
    }

    pub async fn set_alias(&self, alias: String) -> Result<(), BrokerError> {
        if alias.is_empty() || !alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(BrokerError::invalid_argument(format!(
                "alias '{alias}' does not match [A-Za-z0-9_-]+"
            )));
        }
        *self.alias.write().await = Some(alias);
        Ok(())
    }

    pub async fn context(&self) -> String {
        self.context.read().await.clone()
    }

    pub async fn set_context(&self, context: String) {
        *self.context.write().await = context;
    }

    pub async fn error_detail(&self) -> Option<String> {
        self.error_detail.read().await.clone()
    }

    pub async fn idle_seconds(&self) -> u64 {
        match *self.idle_since.read().await {
            Some(since) => since.elapsed().as_secs(),
            None => 0,
        }
    }

    /// Append a record to the chat log under the session's own mutex.
    pub async fn append_chat(&self, role: &str, content: &str) {
        self.chat_log.lock().await.append(role, content);
    }

    /// Set `state` to `Idle` as a declared-completion transition, used by
    /// the mail loop when an agent enqueues outbound mail: writing to the
    /// outbox always idles the sender, regardless of what it was doing.
    pub async fn mark_idle_on_outbox_write(&self) {
        let mut state = self.state.write().await;
        if *state == SessionState::Running {
            *state = SessionState::Idle;
            *self.idle_since.write().await = Some(Instant::now());
        }
    }

    /// Synchronous send: construct the wire text, append to chat log, go
    /// `running`, submit, and block for `idle`.
    pub async fn send(&self, prompt: &str, cancel: &CancellationToken) -> Result<(), BrokerError> {
        if self.transitioning.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::busy("another operation is already in progress"));
        }
        let result = self.send_body(prompt, cancel).await;
        self.transitioning.store(false, Ordering::Release);
        result
    }

    async fn send_body(&self, prompt: &str, cancel: &CancellationToken) -> Result<(), BrokerError> {
        {
            let state = *self.state.read().await;
            if state != SessionState::Idle {
                return Err(BrokerError::busy(format!("session is {}", state.as_str())));
            }
        }

        let is_slash_command = prompt.starts_with('/');
        if is_slash_command && !self.backend.command_handler.allows(prompt) {
            return Err(BrokerError::invalid_argument(format!(
                "backend {} does not support command {prompt}",
                self.backend.name
            )));
        }

        self.append_chat("USER", prompt).await;

        let wire_text = self.build_wire_text(prompt, is_slash_command).await;

        *self.state.write().await = SessionState::Running;
        *self.idle_since.write().await = None;

        let target = self.window_target();
        if let Err(e) = self.host.send_literal(&target, wire_text).await {
            *self.idle_since.write().await = Some(Instant::now());
            *self.state.write().await = SessionState::Idle;
            return Err(e);
        }
        tokio::time::sleep(SEND_LITERAL_SETTLE).await;
        if let Err(e) = self.host.send_keys(&target, vec!["enter".to_string()]).await {
            *self.idle_since.write().await = Some(Instant::now());
            *self.state.write().await = SessionState::Idle;
            return Err(e);
        }

        loop {
            let state = *self.state.read().await;
            if state == SessionState::Idle {
                return Ok(());
            }
            if matches!(state, SessionState::Error | SessionState::Exited) {
                return Err(BrokerError::startup_failed("session left running state unexpectedly"));
            }
            tokio::select! {
                _ = tokio::time::sleep(SEND_POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return Err(BrokerError::busy("send cancelled")),
            }
        }
    }

    async fn build_wire_text(&self, prompt: &str, is_slash_command: bool) -> String {
        let idle_instruction = format!(
            "When you are done, write your response to /{id}/mail as a STATUS_UPDATE and go idle.\n",
            id = self.id
        );
        let context = self.context().await;
        if !context.is_empty() && !is_slash_command {
            format!("{idle_instruction}{context}\n{prompt}")
        } else {
            format!("{idle_instruction}{prompt}")
        }
    }

    /// `Ctrl-C`, `Ctrl-C`, `SIGTERM`, `SIGKILL` escalation with fixed gaps
    /// between each step. The window/pipe/reader stay alive so a following
    /// Restart is cheap.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        if self.transitioning.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::busy("another operation is already in progress"));
        }
        let result = self.stop_body().await;
        self.transitioning.store(false, Ordering::Release);
        result
    }

    async fn stop_body(&self) -> Result<(), BrokerError> {
        self.intentionally_stopped.store(true, Ordering::Release);
        *self.idle_since.write().await = None;
        let target = self.window_target();

        self.host.send_keys(&target, vec!["ctrl-c".to_string()]).await.ok();
        tokio::time::sleep(STOP_SIGNAL_GAP).await;

        let pid = self.pid();
        if pid != 0 && process_alive(pid) {
            self.host.send_keys(&target, vec!["ctrl-c".to_string()]).await.ok();
            tokio::time::sleep(STOP_SIGNAL_GAP).await;
            signal_pid(pid, nix::sys::signal::Signal::SIGTERM);
            tokio::time::sleep(STOP_TERM_GAP).await;
            signal_pid(pid, nix::sys::signal::Signal::SIGKILL);
            tokio::time::sleep(STOP_KILL_GAP).await;
        }

        if self.host.pane_pid(&target).await.is_err() {
            *self.state.write().await = SessionState::Exited;
            return Err(BrokerError::host_error("window no longer exists"));
        }

        *self.state.write().await = SessionState::Stopped;
        self.pid.store(0, Ordering::Release);
        // A fresh token for the still-live reader task to keep selecting on;
        // the reader itself already observed state=Stopped and is looping.
        let fresh = CancellationToken::new();
        *self.reader_cancel.lock().await = fresh;
        Ok(())
    }

    /// Stop (if running), tear down and recreate the pipe, replay env and
    /// the original command, and wait for readiness.
    pub async fn restart(self: &Arc<Self>, original_command_line: &str) -> Result<(), BrokerError> {
        if self.transitioning.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::busy("another operation is already in progress"));
        }
        let result = self.restart_body(original_command_line).await;
        self.transitioning.store(false, Ordering::Release);
        result
    }

    async fn restart_body(self: &Arc<Self>, original_command_line: &str) -> Result<(), BrokerError> {
        if *self.state.read().await == SessionState::Exited {
            return Err(BrokerError::not_running("session has exited"));
        }
        if *self.state.read().await == SessionState::Running {
            self.stop_body().await.ok();
        }
        *self.idle_since.write().await = None;

        self.reader_cancel.lock().await.cancel();

        let target = self.window_target();
        self.host.close_pipe(&target).await.ok();
        let old_fifo = self.fifo_path.read().await.clone();
        let _ = std::fs::remove_file(&old_fifo);

        let new_fifo = std::env::temp_dir().join(format!("broker-{}-{}.fifo", self.id, now_unix_secs()));
        make_fifo(&new_fifo)?;
        let reader_file = open_pipe_with_timeout(&self.host, &target, &new_fifo).await?;
        *self.fifo_path.write().await = new_fifo;

        for (k, v) in &self.backend.env {
            self.host.set_env(&target, k.clone(), v.clone()).await?;
        }
        self.host.send_literal(&target, format!("cd {}\n", shell_quote(&self.cwd.to_string_lossy()))).await?;
        self.host.send_literal(&target, format!("{original_command_line}\n")).await?;

        let pane_pid = self.host.pane_pid(&target).await?;
        let child_pid = self
            .host
            .find_backend_pid(pane_pid, last_path_component(&self.backend.command[0]))
            .await
            .unwrap_or(pane_pid);
        self.pid.store(child_pid, Ordering::Release);

        let generation = self.reader_generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.start_reader(reader_file, generation).await;
        self.intentionally_stopped.store(false, Ordering::Release);

        match self.run_startup_dialog().await {
            Ok(()) => {
                *self.idle_since.write().await = Some(Instant::now());
                *self.state.write().await = SessionState::Idle;
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = SessionState::Error;
                *self.error_detail.write().await = Some(e.detail.clone());
                Err(e)
            }
        }
    }

    /// Terminal teardown: destroy the window, close the pipe, mark exited.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if self.transitioning.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::busy("another operation is already in progress"));
        }
        *self.idle_since.write().await = None;
        self.reader_cancel.lock().await.cancel();
        let target = self.window_target();
        self.host.destroy_window(&target).await.ok();
        tokio::time::sleep(WINDOW_TEARDOWN_SETTLE).await;
        let fifo = self.fifo_path.read().await.clone();
        let _ = std::fs::remove_file(&fifo);
        self.pid.store(0, Ordering::Release);
        *self.state.write().await = SessionState::Exited;
        self.transitioning.store(false, Ordering::Release);
        Ok(())
    }

    /// Reconcile `pid`/`state` with reality: auto-restart an unexpectedly
    /// dead child unless it was intentionally stopped or we just tried.
    pub async fn refresh(self: &Arc<Self>, original_command_line: &str) -> Result<(), BrokerError> {
        if *self.state.read().await == SessionState::Exited {
            return Ok(());
        }

        let pid = self.pid();
        if pid != 0 && process_alive(pid) {
            return Ok(());
        }

        if pid == 0 {
            *self.idle_since.write().await = None;
            *self.state.write().await = SessionState::Stopped;
            return Ok(());
        }

        if self.intentionally_stopped.load(Ordering::Acquire) {
            *self.idle_since.write().await = None;
            *self.state.write().await = SessionState::Stopped;
            self.pid.store(0, Ordering::Release);
            return Ok(());
        }

        {
            let mut last_attempt = self.last_restart_attempt.lock().await;
            if let Some(last) = *last_attempt {
                if last.elapsed() < RESTART_DEBOUNCE {
                    *self.idle_since.write().await = None;
                    *self.state.write().await = SessionState::Stopped;
                    self.pid.store(0, Ordering::Release);
                    return Ok(());
                }
            }
            *last_attempt = Some(Instant::now());
        }

        warn!(session = %self.id, "backend process died unexpectedly, restarting");
        self.restart(original_command_line).await
    }
}

async fn open_pipe_with_timeout(
    host: &Arc<dyn TerminalHost>,
    target: &WindowTarget,
    fifo_path: &std::path::Path,
) -> Result<tokio::fs::File, BrokerError> {
    timeout(PIPE_OPEN_TIMEOUT, async {
        let reader_open = tokio::fs::File::open(fifo_path);
        let pipe_started = host.pipe_pane(target, fifo_path.to_path_buf());
        let (reader, pipe_result) = tokio::join!(reader_open, pipe_started);
        pipe_result?;
        reader.map_err(|e| BrokerError::startup_failed(format!("opening fifo: {e}")))
    })
    .await
    .unwrap_or_else(|_| Err(BrokerError::startup_failed("pipe did not open within 5s")))
}

fn make_fifo(path: &std::path::Path) -> Result<(), BrokerError> {
    let _ = std::fs::remove_file(path);
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::S_IRUSR | nix::sys::stat::Mode::S_IWUSR)
        .map_err(|e| BrokerError::host_error(format!("mkfifo {path:?}: {e}")))
}

fn process_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

fn signal_pid(pid: u32, signal: nix::sys::signal::Signal) {
    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn shell_join(parts: &[String]) -> String {
    parts.iter().map(|p| shell_quote(p)).collect::<Vec<_>>().join(" ")
}

fn last_path_component(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "session_tests.rs"]
mod tests;
