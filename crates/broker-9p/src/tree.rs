// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The virtual name tree: path resolution, content materialization, and
//! the path-specific write/remove semantics that drive
//! [`broker_core::manager::Manager`]/[`broker_core::session::AgentSession`]
//! operations.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use broker_core::error::{BrokerError, ErrorKind};
use broker_core::event::Ack;
use broker_core::manager::Manager;
use broker_core::message::{Message as MailMessage, USER_PARTICIPANT};
use broker_core::session::{SessionOptions, SessionState};

use crate::qid::{dir_qid, file_qid, Qid};

/// Which of a participant's three mailbox sequences a directory/file
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Inbox,
    Outbox,
    Completed,
}

impl MailKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
            Self::Completed => "completed",
        }
    }
}

/// One resolved node in the name tree. Cheap to clone; a `Fid` in the
/// server holds one of these plus open-mode/offset bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Root,
    Ctl,
    List,
    Status,
    Audit,
    Events,
    UserDir,
    UserCtl,
    UserMail,
    UserMailDir(MailKind),
    UserMailMsg(MailKind, String),
    SessionDir(String),
    SessionCtl(String),
    SessionState(String),
    SessionPid(String),
    SessionCwd(String),
    SessionBackend(String),
    SessionRole(String),
    SessionTasks(String),
    SessionTmux(String),
    SessionAlias(String),
    SessionContext(String),
    SessionChatlog(String),
    SessionMail(String),
    SessionMailDir(String, MailKind),
    SessionMailMsg(String, MailKind, String),
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(
            self,
            Node::Root
                | Node::UserDir
                | Node::UserMailDir(_)
                | Node::SessionDir(_)
                | Node::SessionMailDir(_, _)
        )
    }

    /// True for files with tail-follow read semantics.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Node::Audit | Node::Events | Node::SessionChatlog(_))
    }

    fn qid_key(&self) -> String {
        match self {
            Node::Root => "root".into(),
            Node::Ctl => "ctl".into(),
            Node::List => "list".into(),
            Node::Status => "status".into(),
            Node::Audit => "audit".into(),
            Node::Events => "events".into(),
            Node::UserDir => "user".into(),
            Node::UserCtl => "user:ctl".into(),
            Node::UserMail => "user:mail".into(),
            Node::UserMailDir(k) => format!("user:{}", k.as_str()),
            Node::UserMailMsg(k, id) => format!("user:{}:{id}", k.as_str()),
            Node::SessionDir(id) => format!("session:{id}"),
            Node::SessionCtl(id) => format!("session:{id}:ctl"),
            Node::SessionState(id) => format!("session:{id}:state"),
            Node::SessionPid(id) => format!("session:{id}:pid"),
            Node::SessionCwd(id) => format!("session:{id}:cwd"),
            Node::SessionBackend(id) => format!("session:{id}:backend"),
            Node::SessionRole(id) => format!("session:{id}:role"),
            Node::SessionTasks(id) => format!("session:{id}:tasks"),
            Node::SessionTmux(id) => format!("session:{id}:tmux"),
            Node::SessionAlias(id) => format!("session:{id}:alias"),
            Node::SessionContext(id) => format!("session:{id}:context"),
            Node::SessionChatlog(id) => format!("session:{id}:chatlog"),
            Node::SessionMail(id) => format!("session:{id}:mail"),
            Node::SessionMailDir(id, k) => format!("session:{id}:{}", k.as_str()),
            Node::SessionMailMsg(id, k, msg) => format!("session:{id}:{}:{msg}", k.as_str()),
        }
    }

    pub fn qid(&self) -> Qid {
        let key = self.qid_key();
        if self.is_dir() {
            dir_qid(&key)
        } else {
            file_qid(&key)
        }
    }

    /// This node's own name as it appears in its parent directory's
    /// listing; used for the `name` field of a `stat` record. The root has
    /// no parent and is conventionally unnamed.
    pub fn leaf_name(&self) -> String {
        match self {
            Node::Root => String::new(),
            Node::Ctl | Node::UserCtl | Node::SessionCtl(_) => "ctl".to_string(),
            Node::List => "list".to_string(),
            Node::Status => "status".to_string(),
            Node::Audit => "audit".to_string(),
            Node::Events => "events".to_string(),
            Node::UserDir => "user".to_string(),
            Node::UserMail | Node::SessionMail(_) => "mail".to_string(),
            Node::UserMailDir(k) | Node::SessionMailDir(_, k) => k.as_str().to_string(),
            Node::UserMailMsg(_, msg) | Node::SessionMailMsg(_, _, msg) => format!("{msg}.json"),
            Node::SessionDir(id) => id.clone(),
            Node::SessionState(_) => "state".to_string(),
            Node::SessionPid(_) => "pid".to_string(),
            Node::SessionCwd(_) => "cwd".to_string(),
            Node::SessionBackend(_) => "backend".to_string(),
            Node::SessionRole(_) => "role".to_string(),
            Node::SessionTasks(_) => "tasks".to_string(),
            Node::SessionTmux(_) => "tmux".to_string(),
            Node::SessionAlias(_) => "alias".to_string(),
            Node::SessionContext(_) => "context".to_string(),
            Node::SessionChatlog(_) => "chatlog".to_string(),
        }
    }
}

/// Owns a reference to the [`Manager`] and implements every path operation
/// the 9P server dispatches into.
pub struct Tree {
    pub manager: Arc<Manager>,
}

impl Tree {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    /// Resolve `name` against `base`, the single-component walk step
    /// `Twalk` repeats for each `wname`. Returns `None` when `name` does
    /// not exist under `base` (a non-existent session, for instance).
    pub async fn walk_one(&self, base: &Node, name: &str) -> Option<Node> {
        match base {
            Node::Root => match name {
                "ctl" => Some(Node::Ctl),
                "list" => Some(Node::List),
                "status" => Some(Node::Status),
                "audit" => Some(Node::Audit),
                "events" => Some(Node::Events),
                "user" => Some(Node::UserDir),
                id => {
                    if self.manager.get(id).await.is_some() {
                        Some(Node::SessionDir(id.to_owned()))
                    } else {
                        None
                    }
                }
            },
            Node::UserDir => match name {
                "ctl" => Some(Node::UserCtl),
                "mail" => Some(Node::UserMail),
                "inbox" => Some(Node::UserMailDir(MailKind::Inbox)),
                "outbox" => Some(Node::UserMailDir(MailKind::Outbox)),
                "completed" => Some(Node::UserMailDir(MailKind::Completed)),
                _ => None,
            },
            Node::UserMailDir(kind) => {
                let msg_id = name.strip_suffix(".json").unwrap_or(name);
                if self.mail_exists(USER_PARTICIPANT, *kind, msg_id).await {
                    Some(Node::UserMailMsg(*kind, msg_id.to_owned()))
                } else {
                    None
                }
            }
            Node::SessionDir(id) => {
                if self.manager.get(id).await.is_none() {
                    return None;
                }
                match name {
                    "ctl" => Some(Node::SessionCtl(id.clone())),
                    "state" => Some(Node::SessionState(id.clone())),
                    "pid" => Some(Node::SessionPid(id.clone())),
                    "cwd" => Some(Node::SessionCwd(id.clone())),
                    "backend" => Some(Node::SessionBackend(id.clone())),
                    "role" => Some(Node::SessionRole(id.clone())),
                    "tasks" => Some(Node::SessionTasks(id.clone())),
                    "tmux" => Some(Node::SessionTmux(id.clone())),
                    "alias" => Some(Node::SessionAlias(id.clone())),
                    "context" => Some(Node::SessionContext(id.clone())),
                    "chatlog" => Some(Node::SessionChatlog(id.clone())),
                    "mail" => Some(Node::SessionMail(id.clone())),
                    "inbox" => Some(Node::SessionMailDir(id.clone(), MailKind::Inbox)),
                    "outbox" => Some(Node::SessionMailDir(id.clone(), MailKind::Outbox)),
                    "completed" => Some(Node::SessionMailDir(id.clone(), MailKind::Completed)),
                    _ => None,
                }
            }
            Node::SessionMailDir(id, kind) => {
                let msg_id = name.strip_suffix(".json").unwrap_or(name);
                if self.mail_exists(id, *kind, msg_id).await {
                    Some(Node::SessionMailMsg(id.clone(), *kind, msg_id.to_owned()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    async fn mail_exists(&self, participant: &str, kind: MailKind, msg_id: &str) -> bool {
        self.mail_sequence(participant, kind).await.iter().any(|m| m.id == msg_id)
    }

    async fn mail_sequence(&self, participant: &str, kind: MailKind) -> Vec<MailMessage> {
        match kind {
            MailKind::Inbox => self.manager.mailboxes.get_inbox(participant).await,
            MailKind::Outbox => self.manager.mailboxes.get_outbox(participant).await,
            MailKind::Completed => self.manager.mailboxes.get_completed(participant).await,
        }
    }

    /// List `(name, child)` pairs for a directory read.
    pub async fn list_children(&self, dir: &Node) -> Vec<(String, Node)> {
        match dir {
            Node::Root => {
                let mut out = vec![
                    ("ctl".to_string(), Node::Ctl),
                    ("list".to_string(), Node::List),
                    ("status".to_string(), Node::Status),
                    ("audit".to_string(), Node::Audit),
                    ("events".to_string(), Node::Events),
                    ("user".to_string(), Node::UserDir),
                ];
                for id in self.manager.list_ids().await {
                    out.push((id.clone(), Node::SessionDir(id)));
                }
                out
            }
            Node::UserDir => vec![
                ("ctl".to_string(), Node::UserCtl),
                ("mail".to_string(), Node::UserMail),
                ("inbox".to_string(), Node::UserMailDir(MailKind::Inbox)),
                ("outbox".to_string(), Node::UserMailDir(MailKind::Outbox)),
                ("completed".to_string(), Node::UserMailDir(MailKind::Completed)),
            ],
            Node::UserMailDir(kind) => self
                .mail_sequence(USER_PARTICIPANT, *kind)
                .await
                .into_iter()
                .map(|m| (format!("{}.json", m.id), Node::UserMailMsg(*kind, m.id)))
                .collect(),
            Node::SessionDir(id) => vec![
                ("ctl".to_string(), Node::SessionCtl(id.clone())),
                ("state".to_string(), Node::SessionState(id.clone())),
                ("pid".to_string(), Node::SessionPid(id.clone())),
                ("cwd".to_string(), Node::SessionCwd(id.clone())),
                ("backend".to_string(), Node::SessionBackend(id.clone())),
                ("role".to_string(), Node::SessionRole(id.clone())),
                ("tasks".to_string(), Node::SessionTasks(id.clone())),
                ("tmux".to_string(), Node::SessionTmux(id.clone())),
                ("alias".to_string(), Node::SessionAlias(id.clone())),
                ("context".to_string(), Node::SessionContext(id.clone())),
                ("chatlog".to_string(), Node::SessionChatlog(id.clone())),
                ("mail".to_string(), Node::SessionMail(id.clone())),
                ("inbox".to_string(), Node::SessionMailDir(id.clone(), MailKind::Inbox)),
                ("outbox".to_string(), Node::SessionMailDir(id.clone(), MailKind::Outbox)),
                ("completed".to_string(), Node::SessionMailDir(id.clone(), MailKind::Completed)),
            ],
            Node::SessionMailDir(id, kind) => self
                .mail_sequence(id, *kind)
                .await
                .into_iter()
                .map(|m| (format!("{}.json", m.id), Node::SessionMailMsg(id.clone(), *kind, m.id)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Block (honoring `cancel`) until a streaming file has data at or past
    /// `offset`, then materialize and slice content exactly like a regular
    /// file read.
    pub async fn read(&self, node: &Node, offset: u64, count: u32, cancel: &CancellationToken) -> Result<Bytes, BrokerError> {
        if node.is_dir() {
            let listing = self.encode_directory(node).await;
            return Ok(slice(&listing, offset, count));
        }
        if node.is_streaming() {
            self.wait_for_stream_data(node, offset, cancel).await;
            let content = self.stream_read_from(node, offset).await?;
            return Ok(truncate(&content, count));
        }
        let content = self.materialize(node).await?;
        Ok(slice(&content, offset, count))
    }

    /// Audit/chatlog track a global byte offset directly (their own
    /// `base_offset`/`read_from`), unlike the rest of the tree's
    /// materialize-then-slice files, so `offset` is passed straight through
    /// instead of being re-based against a freshly materialized buffer.
    async fn stream_read_from(&self, node: &Node, offset: u64) -> Result<Bytes, BrokerError> {
        match node {
            Node::Audit => Ok(self.manager.mailboxes.audit.read().await.read_from(offset)),
            Node::SessionChatlog(id) => {
                let session = self.manager.get(id).await.ok_or_else(not_found_session(id))?;
                Ok(session.chat_log.lock().await.read_from(offset))
            }
            Node::Events => {
                let full = self.materialize(node).await?;
                Ok(slice(&full, offset, full.len() as u32))
            }
            _ => unreachable!("is_streaming() only covers the arms above"),
        }
    }

    async fn wait_for_stream_data(&self, node: &Node, offset: u64, cancel: &CancellationToken) {
        match node {
            Node::Audit => self.manager.mailboxes.audit.read().await.wait_for_data(offset, cancel).await,
            Node::Events => self.manager.events.read().await.wait_for_data(cancel).await,
            Node::SessionChatlog(id) => {
                if let Some(session) = self.manager.get(id).await {
                    session.chat_log.lock().await.wait_for_data(offset, cancel).await;
                }
            }
            _ => {}
        }
    }

    async fn materialize(&self, node: &Node) -> Result<Bytes, BrokerError> {
        match node {
            Node::List => {
                let mut out = String::new();
                for id in self.manager.list_ids().await {
                    let Some(session) = self.manager.get(&id).await else { continue };
                    let backend = self.manager.backend_name_of(&id).await.unwrap_or_default();
                    let alias = session.alias().await.unwrap_or_else(|| "-".to_string());
                    out.push_str(&format!(
                        "{id}\t{backend}\t{}\t{alias}\t{}\n",
                        session.state().await.as_str(),
                        session.cwd.display()
                    ));
                }
                Ok(Bytes::from(out))
            }
            Node::Status => {
                let mut out = String::new();
                for id in self.manager.list_ids().await {
                    let Some(session) = self.manager.get(&id).await else { continue };
                    let inbox_count = self.manager.mailboxes.get_inbox(&id).await.len();
                    out.push_str(&format!(
                        "{id} {} {} {inbox_count}\n",
                        session.state().await.as_str(),
                        session.idle_seconds().await
                    ));
                }
                Ok(Bytes::from(out))
            }
            Node::Audit => {
                let audit = self.manager.mailboxes.audit.read().await;
                Ok(audit.read_from(audit.start_offset()))
            }
            Node::Events => {
                let events = self.manager.events.read().await;
                let mut out = String::new();
                for event in events.read() {
                    out.push_str(&serde_json::to_string(&event).unwrap_or_default());
                    out.push('\n');
                }
                Ok(Bytes::from(out))
            }
            Node::Ctl | Node::UserCtl | Node::UserMail | Node::SessionCtl(_) | Node::SessionMail(_) => Ok(Bytes::new()),
            Node::SessionState(id) => self.with_session(id, |s| async move { Ok(Bytes::from(s.state().await.as_str())) }).await,
            Node::SessionPid(id) => self.with_session(id, |s| async move { Ok(Bytes::from(s.pid().to_string())) }).await,
            Node::SessionCwd(id) => self.with_session(id, |s| async move { Ok(Bytes::from(s.cwd.display().to_string())) }).await,
            Node::SessionBackend(id) => {
                let name = self.manager.backend_name_of(id).await.ok_or_else(not_found_session(id))?;
                Ok(Bytes::from(name))
            }
            Node::SessionRole(id) => self.with_session(id, |s| async move { Ok(Bytes::from(s.role.clone().unwrap_or_default())) }).await,
            Node::SessionTasks(id) => self.with_session(id, |s| async move { Ok(Bytes::from(s.tasks.join(","))) }).await,
            Node::SessionTmux(id) => {
                self.with_session(id, |s| async move { Ok(Bytes::from(format!("{}:{}", s.terminal_session, s.terminal_window))) }).await
            }
            Node::SessionAlias(id) => self.with_session(id, |s| async move { Ok(Bytes::from(s.alias().await.unwrap_or_default())) }).await,
            Node::SessionContext(id) => self.with_session(id, |s| async move { Ok(Bytes::from(s.context().await)) }).await,
            Node::SessionChatlog(id) => {
                let session = self.manager.get(id).await.ok_or_else(not_found_session(id))?;
                let log = session.chat_log.lock().await;
                Ok(log.read_from(log.start_offset()))
            }
            Node::UserMailMsg(kind, msg_id) => self.materialize_mail_msg(USER_PARTICIPANT, *kind, msg_id).await,
            Node::SessionMailMsg(id, kind, msg_id) => self.materialize_mail_msg(id, *kind, msg_id).await,
            Node::Root | Node::UserDir | Node::UserMailDir(_) | Node::SessionDir(_) | Node::SessionMailDir(_, _) => unreachable!(
                "directories are handled by encode_directory"
            ),
        }
    }

    async fn materialize_mail_msg(&self, participant: &str, kind: MailKind, msg_id: &str) -> Result<Bytes, BrokerError> {
        let msg = self
            .mail_sequence(participant, kind)
            .await
            .into_iter()
            .find(|m| m.id == msg_id)
            .ok_or_else(|| BrokerError::not_found(format!("message {msg_id} not found")))?;
        let json = serde_json::to_vec(&msg).map_err(|e| BrokerError::new(ErrorKind::InvalidArgument, e.to_string()))?;
        Ok(Bytes::from(json))
    }

    async fn with_session<F, Fut>(&self, id: &str, f: F) -> Result<Bytes, BrokerError>
    where
        F: FnOnce(Arc<broker_core::session::AgentSession>) -> Fut,
        Fut: std::future::Future<Output = Result<Bytes, BrokerError>>,
    {
        let session = self.manager.get(id).await.ok_or_else(not_found_session(id))?;
        f(session).await
    }

    /// Concatenated `stat[n]` directory entries, one per child, in the same
    /// encoding `Tstat` uses for a single file — a real 9P client's
    /// `Tread` on a directory fid parses this the same way it parses
    /// `Rstat`.
    async fn encode_directory(&self, dir: &Node) -> Bytes {
        let mut out = bytes::BytesMut::new();
        for (name, child) in self.list_children(dir).await {
            out.extend_from_slice(&crate::server::encode_stat(&child, &name));
        }
        Bytes::from(out.freeze())
    }

    /// Path-specific write semantics. `owning_session` is the connection's
    /// bound session, updated in place on the first `state`/`mail` write
    /// per the authorization rule.
    pub async fn write(&self, node: &Node, data: &[u8], owning_session: &mut Option<String>) -> Result<usize, BrokerError> {
        let text = String::from_utf8_lossy(data).into_owned();
        match node {
            Node::Ctl => {
                self.handle_root_ctl(text.trim()).await?;
                Ok(data.len())
            }
            Node::UserCtl => {
                self.handle_mailbox_ctl(USER_PARTICIPANT, text.trim()).await?;
                Ok(data.len())
            }
            Node::SessionCtl(id) => {
                self.handle_session_ctl(id, text.trim()).await?;
                Ok(data.len())
            }
            Node::SessionState(id) => {
                let requested = SessionState::parse(text.trim())?;
                let session = self.manager.get(id).await.ok_or_else(not_found_session(id))?;
                let current = session.state().await;
                if !current.can_transition_to(requested) {
                    return Err(BrokerError::invalid_argument(format!(
                        "cannot transition from {} to {}",
                        current.as_str(),
                        requested.as_str()
                    )));
                }
                match requested {
                    SessionState::Stopped => self.manager.stop_session(id).await?,
                    SessionState::Starting => self.manager.restart(id, &CancellationToken::new()).await?,
                    SessionState::Exited => self.manager.close_session(id).await?,
                    _ => {
                        return Err(BrokerError::invalid_argument(format!(
                            "state {} is not directly writable",
                            requested.as_str()
                        )))
                    }
                }
                if owning_session.is_none() {
                    *owning_session = Some(id.clone());
                }
                Ok(data.len())
            }
            Node::SessionAlias(id) => {
                let session = self.manager.get(id).await.ok_or_else(not_found_session(id))?;
                session.set_alias(text.trim().to_string()).await?;
                Ok(data.len())
            }
            Node::SessionContext(id) => {
                let session = self.manager.get(id).await.ok_or_else(not_found_session(id))?;
                session.set_context(text).await;
                Ok(data.len())
            }
            Node::UserMail => {
                self.handle_mail_write(USER_PARTICIPANT, &text).await?;
                Ok(data.len())
            }
            Node::SessionMail(id) => {
                self.handle_mail_write(id, &text).await?;
                if owning_session.is_none() {
                    *owning_session = Some(id.clone());
                }
                Ok(data.len())
            }
            Node::Events => {
                let ack: Ack = serde_json::from_str(&text).map_err(|e| BrokerError::invalid_argument(e.to_string()))?;
                self.manager.events.write().await.ack(ack);
                Ok(data.len())
            }
            _ => Err(BrokerError::new(ErrorKind::Permission, "file is read-only")),
        }
    }

    async fn handle_root_ctl(&self, line: &str) -> Result<(), BrokerError> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("new") => {
                let backend = parts.next().ok_or_else(|| BrokerError::invalid_argument("new: missing backend name"))?;
                let cwd = parts.next().ok_or_else(|| BrokerError::invalid_argument("new: missing cwd"))?;
                let cwd_path = std::path::PathBuf::from(cwd);
                if !cwd_path.is_absolute() || !cwd_path.is_dir() {
                    return Err(BrokerError::invalid_argument(format!("cwd {cwd} is not an existing absolute directory")));
                }
                let mut role = None;
                let mut tasks = Vec::new();
                for kv in parts {
                    if let Some(r) = kv.strip_prefix("role=") {
                        role = Some(r.to_string());
                    } else if let Some(t) = kv.strip_prefix("tasks=") {
                        tasks = t.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
                    }
                }
                self.manager.new_session(backend, SessionOptions { cwd: cwd_path, role, tasks }).await?;
                Ok(())
            }
            _ => Err(BrokerError::invalid_argument(format!("unrecognized ctl command: {line}"))),
        }
    }

    async fn handle_mailbox_ctl(&self, participant: &str, line: &str) -> Result<(), BrokerError> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("complete") => {
                let msg_id = parts.next().ok_or_else(|| BrokerError::invalid_argument("complete: missing message id"))?;
                self.manager.mailboxes.complete_message(participant, msg_id).await?;
                Ok(())
            }
            _ => Err(BrokerError::invalid_argument(format!("unrecognized ctl command: {line}"))),
        }
    }

    async fn handle_session_ctl(&self, id: &str, line: &str) -> Result<(), BrokerError> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("stop") => self.manager.stop_session(id).await,
            Some("restart") => self.manager.restart(id, &CancellationToken::new()).await,
            Some("kill") => self.manager.close_session(id).await,
            Some("refresh") => self.manager.refresh(id).await,
            Some("complete") => {
                let msg_id = parts.next().ok_or_else(|| BrokerError::invalid_argument("complete: missing message id"))?;
                self.manager.mailboxes.complete_message(id, msg_id).await.map(|_| ())
            }
            _ => Err(BrokerError::invalid_argument(format!("unrecognized ctl command: {line}"))),
        }
    }

    async fn handle_mail_write(&self, from: &str, text: &str) -> Result<(), BrokerError> {
        let mut msg: MailMessage =
            serde_json::from_str(text).map_err(|e| BrokerError::invalid_argument(format!("malformed message JSON: {e}")))?;
        msg.from = from.to_owned();
        msg.id = String::new();
        self.manager.send_mail(from, msg).await?;
        Ok(())
    }

    /// Remove is permitted only on `<session-or-user>/inbox/<msg>.json`,
    /// acting as `CompleteMessage`, subject to the connection's ownership
    /// binding.
    pub async fn remove(&self, node: &Node, owning_session: &Option<String>) -> Result<(), BrokerError> {
        match node {
            Node::UserMailMsg(MailKind::Inbox, msg_id) => {
                self.manager.mailboxes.complete_message(USER_PARTICIPANT, msg_id).await?;
                Ok(())
            }
            Node::SessionMailMsg(id, MailKind::Inbox, msg_id) => {
                match owning_session {
                    Some(bound) if bound == id => {}
                    _ => return Err(BrokerError::new(ErrorKind::Permission, "connection does not own this session's inbox")),
                }
                self.manager.mailboxes.complete_message(id, msg_id).await?;
                Ok(())
            }
            _ => Err(BrokerError::new(ErrorKind::Permission, "remove is only permitted on inbox messages")),
        }
    }
}

fn not_found_session(id: &str) -> impl FnOnce() -> BrokerError + '_ {
    move || BrokerError::not_found(format!("no session {id}"))
}

fn slice(content: &Bytes, offset: u64, count: u32) -> Bytes {
    let offset = offset as usize;
    if offset >= content.len() {
        return Bytes::new();
    }
    let end = (offset + count as usize).min(content.len());
    content.slice(offset..end)
}

fn truncate(content: &Bytes, count: u32) -> Bytes {
    let end = (count as usize).min(content.len());
    content.slice(0..end)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "tree_tests.rs"]
mod tests;
