// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-participant inbox/outbox/completed queues plus the shared audit log.
//! A single `RwLock<HashMap<..>>` guards short, non-blocking operations
//! only; nothing here ever awaits while holding the lock.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::audit::{AuditLog, Direction};
use crate::error::BrokerError;
use crate::message::{Message, Participant};

#[derive(Default)]
struct Mailbox {
    inbox: Vec<Message>,
    outbox: Vec<Message>,
    completed: Vec<Message>,
}

pub struct MailboxManager {
    mailboxes: RwLock<HashMap<Participant, Mailbox>>,
    pub audit: RwLock<AuditLog>,
}

fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl MailboxManager {
    pub fn new(audit_cap_bytes: usize) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            audit: RwLock::new(AuditLog::new(audit_cap_bytes)),
        }
    }

    pub async fn ensure_mailbox(&self, participant: &str) {
        let mut mailboxes = self.mailboxes.write().await;
        mailboxes.entry(participant.to_owned()).or_default();
    }

    /// Validate, assign defaults, and append to `participant`'s outbox.
    pub async fn add_to_outbox(&self, participant: &str, msg: Message) -> Result<Message, BrokerError> {
        let msg = msg.prepare_outbound(participant, now_unix_secs())?;
        {
            let mut mailboxes = self.mailboxes.write().await;
            mailboxes.entry(participant.to_owned()).or_default().outbox.push(msg.clone());
        }
        self.audit.write().await.record(now_unix_secs(), participant, Direction::Out, &msg);
        Ok(msg)
    }

    /// Pop the oldest outbox message for `participant`, FIFO.
    pub async fn read_outbox(&self, participant: &str) -> Option<Message> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.get_mut(participant)?;
        if mailbox.outbox.is_empty() {
            return None;
        }
        Some(mailbox.outbox.remove(0))
    }

    pub async fn has_outbox(&self, participant: &str) -> bool {
        let mailboxes = self.mailboxes.read().await;
        mailboxes.get(participant).is_some_and(|m| !m.outbox.is_empty())
    }

    pub async fn deliver_to_inbox(&self, participant: &str, msg: Message) {
        {
            let mut mailboxes = self.mailboxes.write().await;
            mailboxes.entry(participant.to_owned()).or_default().inbox.push(msg.clone());
        }
        self.audit.write().await.record(now_unix_secs(), participant, Direction::In, &msg);
    }

    pub async fn get_inbox(&self, participant: &str) -> Vec<Message> {
        let mailboxes = self.mailboxes.read().await;
        mailboxes.get(participant).map(|m| m.inbox.clone()).unwrap_or_default()
    }

    pub async fn get_outbox(&self, participant: &str) -> Vec<Message> {
        let mailboxes = self.mailboxes.read().await;
        mailboxes.get(participant).map(|m| m.outbox.clone()).unwrap_or_default()
    }

    pub async fn get_completed(&self, participant: &str) -> Vec<Message> {
        let mailboxes = self.mailboxes.read().await;
        mailboxes.get(participant).map(|m| m.completed.clone()).unwrap_or_default()
    }

    pub async fn complete_message(&self, participant: &str, msg_id: &str) -> Result<Message, BrokerError> {
        let msg = {
            let mut mailboxes = self.mailboxes.write().await;
            let mailbox = mailboxes
                .get_mut(participant)
                .ok_or_else(|| BrokerError::not_found(format!("no mailbox for {participant}")))?;
            let idx = mailbox
                .inbox
                .iter()
                .position(|m| m.id == msg_id)
                .ok_or_else(|| BrokerError::not_found(format!("message {msg_id} not in {participant}'s inbox")))?;
            let msg = mailbox.inbox.remove(idx);
            mailbox.completed.push(msg.clone());
            msg
        };
        self.audit.write().await.record(now_unix_secs(), participant, Direction::Complete, &msg);
        Ok(msg)
    }

    pub async fn get_message(&self, participant: &str, msg_id: &str) -> Option<Message> {
        let mailboxes = self.mailboxes.read().await;
        let mailbox = mailboxes.get(participant)?;
        mailbox
            .inbox
            .iter()
            .chain(mailbox.outbox.iter())
            .chain(mailbox.completed.iter())
            .find(|m| m.id == msg_id)
            .cloned()
    }

    /// All participants that currently have a mailbox, for the manager's
    /// drain step.
    pub async fn participants(&self) -> Vec<Participant> {
        self.mailboxes.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "mailbox_tests.rs"]
mod tests;
