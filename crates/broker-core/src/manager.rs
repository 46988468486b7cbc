// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process-wide session registry and the background mail-processing
//! loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::BackendRegistry;
use crate::error::BrokerError;
use crate::event::{Event, EventQueue, EventType};
use crate::mailbox::MailboxManager;
use crate::message::{Message, MessageType, USER_PARTICIPANT};
use crate::session::{AgentSession, SessionOptions, SessionState};
use crate::terminal_host::TerminalHost;

/// Fixed prompt sent to an idle agent with pending inbox mail.
const INBOX_NUDGE_PROMPT: &str =
    "You have unread messages in your inbox. Read them and respond before going idle again.";

fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Bookkeeping the manager needs per session beyond what `AgentSession`
/// itself tracks: the backend name (for `/list`) and the exact command line
/// Restart must replay.
struct SessionEntry {
    session: Arc<AgentSession>,
    backend_name: String,
    original_command_line: String,
}

/// Tunable constants governing the mail loop's cadence and the logs' caps.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub mail_tick: Duration,
    pub idle_nudge: Duration,
    pub chat_log_cap_bytes: usize,
    pub event_cap: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mail_tick: Duration::from_secs(5),
            idle_nudge: Duration::from_secs(15),
            chat_log_cap_bytes: 2 * 1024 * 1024,
            event_cap: 4096,
        }
    }
}

/// Owns `backends`, `sessions`, the mailbox manager, and the event queue;
/// runs the background mail loop. One instance per daemon.
pub struct Manager {
    pub backends: BackendRegistry,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    pub mailboxes: Arc<MailboxManager>,
    pub events: RwLock<EventQueue>,
    host: Arc<dyn TerminalHost>,
    host_session_name: String,
    config: ManagerConfig,
    stop: CancellationToken,
}

impl Manager {
    pub fn new(
        backends: BackendRegistry,
        host: Arc<dyn TerminalHost>,
        host_session_name: String,
        audit_cap_bytes: usize,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backends,
            sessions: RwLock::new(HashMap::new()),
            mailboxes: Arc::new(MailboxManager::new(audit_cap_bytes)),
            events: RwLock::new(EventQueue::new(config.event_cap)),
            host,
            host_session_name,
            config,
            stop: CancellationToken::new(),
        })
    }

    /// Create a new agent session for `backend_name`, register it, and
    /// ensure it has a mailbox.
    pub async fn new_session(self: &Arc<Self>, backend_name: &str, options: SessionOptions) -> Result<String, BrokerError> {
        let backend = self
            .backends
            .get(backend_name)
            .ok_or_else(|| BrokerError::not_found(format!("unknown backend {backend_name}")))?;

        let id = new_session_id();
        let original_command_line = shell_join(&backend.command);

        let session = AgentSession::construct(
            id.clone(),
            backend,
            Arc::clone(&self.host),
            self.host_session_name.clone(),
            options,
            self.config.chat_log_cap_bytes,
        )
        .await?;

        self.mailboxes.ensure_mailbox(&id).await;
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                id.clone(),
                SessionEntry { session: Arc::clone(&session), backend_name: backend_name.to_owned(), original_command_line },
            );
        }

        self.emit(&id, EventType::StateChange, serde_json::json!({"state": session.state().await.as_str()})).await;
        info!(session = %id, backend = %backend_name, "session created");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<AgentSession>> {
        self.sessions.read().await.get(id).map(|e| Arc::clone(&e.session))
    }

    /// `backend_name` for `/list`'s second column.
    pub async fn backend_name_of(&self, id: &str) -> Option<String> {
        self.sessions.read().await.get(id).map(|e| e.backend_name.clone())
    }

    async fn original_command_line_of(&self, id: &str) -> Option<String> {
        self.sessions.read().await.get(id).map(|e| e.original_command_line.clone())
    }

    pub async fn list_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Remove a session's bookkeeping entry. Does not touch its mailbox or
    /// process state; callers close the session first.
    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    pub async fn restart(&self, id: &str, cancel: &CancellationToken) -> Result<(), BrokerError> {
        let session = self.get(id).await.ok_or_else(|| BrokerError::not_found(format!("no session {id}")))?;
        let original = self
            .original_command_line_of(id)
            .await
            .ok_or_else(|| BrokerError::not_running("original command unavailable"))?;
        let _ = cancel;
        session.restart(&original).await?;
        self.emit(id, EventType::StateChange, serde_json::json!({"state": session.state().await.as_str()})).await;
        Ok(())
    }

    pub async fn refresh(&self, id: &str) -> Result<(), BrokerError> {
        let session = self.get(id).await.ok_or_else(|| BrokerError::not_found(format!("no session {id}")))?;
        let original = self.original_command_line_of(id).await.unwrap_or_default();
        let before = session.state().await;
        session.refresh(&original).await?;
        let after = session.state().await;
        if before != after {
            self.emit(id, EventType::StateChange, serde_json::json!({"state": after.as_str()})).await;
        }
        Ok(())
    }

    pub async fn stop_session(&self, id: &str) -> Result<(), BrokerError> {
        let session = self.get(id).await.ok_or_else(|| BrokerError::not_found(format!("no session {id}")))?;
        session.stop().await?;
        self.emit(id, EventType::StateChange, serde_json::json!({"state": session.state().await.as_str()})).await;
        Ok(())
    }

    pub async fn close_session(&self, id: &str) -> Result<(), BrokerError> {
        let session = self.get(id).await.ok_or_else(|| BrokerError::not_found(format!("no session {id}")))?;
        session.close().await?;
        self.emit(id, EventType::StateChange, serde_json::json!({"state": "exited"})).await;
        Ok(())
    }

    pub async fn emit(&self, agent: &str, event_type: EventType, data: serde_json::Value) -> u64 {
        self.events.write().await.push(agent.to_owned(), event_type, data, now_unix_secs())
    }

    /// Enqueue `msg` to `from`'s outbox via the mailbox manager, then (per
    /// the Open Questions resolution: "always idle on outbox write") mark a
    /// sending session idle if it was running.
    pub async fn send_mail(&self, from: &str, msg: Message) -> Result<Message, BrokerError> {
        let stored = self.mailboxes.add_to_outbox(from, msg).await?;
        if from != USER_PARTICIPANT {
            if let Some(session) = self.get(from).await {
                session.mark_idle_on_outbox_write().await;
                self.emit(from, EventType::StateChange, serde_json::json!({"state": session.state().await.as_str()})).await;
            }
        }
        let event_type = if from == USER_PARTICIPANT { EventType::UserSend } else { EventType::BotSend };
        self.emit(&stored.to, event_type, serde_json::json!({"message_id": stored.id})).await;
        Ok(stored)
    }

    /// Spawn the background mail loop; returns the join handle so the
    /// daemon can await it at shutdown.
    pub fn spawn_mail_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.mail_loop().await })
    }

    pub fn stop_mail_loop(&self) {
        self.stop.cancel();
    }

    async fn mail_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return,
                _ = tokio::time::sleep(self.config.mail_tick) => {}
            }
            self.mail_tick().await;
        }
    }

    /// One tick: drain outboxes, auto-route log-type messages into chat
    /// logs, then nudge idle agents with pending mail. The order matters:
    /// a message must land in chat before its sender is nudged again.
    async fn mail_tick(&self) {
        self.drain_outboxes().await;
        self.route_log_messages_to_chat().await;
        self.nudge_idle_agents_with_mail().await;
    }

    async fn drain_outboxes(&self) {
        let mut participants = self.mailboxes.participants().await;
        if !participants.iter().any(|p| p == USER_PARTICIPANT) {
            participants.push(USER_PARTICIPANT.to_owned());
        }
        for participant in participants {
            loop {
                let Some(msg) = self.mailboxes.read_outbox(&participant).await else { break };
                let to = msg.to.clone();
                let event_type = if to == USER_PARTICIPANT { EventType::UserRecv } else { EventType::BotRecv };
                self.mailboxes.deliver_to_inbox(&to, msg.clone()).await;
                self.emit(&to, event_type, serde_json::json!({"message_id": msg.id, "from": msg.from})).await;
            }
        }
    }

    async fn route_log_messages_to_chat(&self) {
        let inbox = self.mailboxes.get_inbox(USER_PARTICIPANT).await;
        for msg in inbox {
            let Ok(message_type) = msg.message_type() else { continue };
            if !message_type.is_log_type() {
                continue;
            }
            if let Some(session) = self.get(&msg.from).await {
                let content = if msg.subject.is_empty() { msg.body.clone() } else { format!("{}\n{}", msg.subject, msg.body) };
                session.append_chat("ASSISTANT", &content).await;
            }
            if let Err(e) = self.mailboxes.complete_message(USER_PARTICIPANT, &msg.id).await {
                warn!(msg = %msg.id, error = %e, "failed to auto-complete routed message");
            }
        }
    }

    async fn nudge_idle_agents_with_mail(&self) {
        let ids = self.list_ids().await;
        for id in ids {
            let Some(session) = self.get(&id).await else { continue };
            if session.state().await != SessionState::Idle {
                continue;
            }
            if session.idle_seconds().await < self.config.idle_nudge.as_secs() {
                continue;
            }
            if self.mailboxes.get_inbox(&id).await.is_empty() {
                continue;
            }
            let cancel = CancellationToken::new();
            if let Err(e) = session.send(INBOX_NUDGE_PROMPT, &cancel).await {
                warn!(session = %id, error = %e, "failed to nudge idle agent with pending mail");
            }
        }
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_owned()
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| format!("'{}'", p.replace('\'', "'\\''")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Validate an inbound message against `MessageType` and report the
/// deprecated-type replacement verbatim, used by the 9P server's `mail`
/// file handlers.
pub fn validate_message_type(msg: &Message) -> Result<MessageType, BrokerError> {
    msg.message_type()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "manager_tests.rs"]
mod tests;
