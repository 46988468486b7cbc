// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered, acknowledge-based event stream, served by the filesystem
//! server's `/events` file. A durable, process-lifetime queue rather than
//! a broadcast channel, since clients read it lazily instead of
//! subscribing to a live feed.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    StateChange,
    UserRecv,
    UserSend,
    BotRecv,
    BotSend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub ts: u64,
    pub agent: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
}

/// Payload a client writes to `/events` to acknowledge consumption.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Ack {
    HighWaterMark { ack_seq: u64 },
    Ids { ack_ids: Vec<u64> },
}

pub struct EventQueue {
    next_seq: u64,
    events: VecDeque<Event>,
    cap: usize,
    waiters: Notify,
}

impl EventQueue {
    pub fn new(cap: usize) -> Self {
        Self { next_seq: 1, events: VecDeque::new(), cap, waiters: Notify::new() }
    }

    pub fn push(&mut self, agent: impl Into<String>, event_type: EventType, data: serde_json::Value, ts: u64) -> u64 {
        let id = self.next_seq;
        self.next_seq += 1;
        self.events.push_back(Event { id, ts, agent: agent.into(), event_type, data });
        while self.events.len() > self.cap {
            self.events.pop_front();
        }
        self.waiters.notify_waiters();
        id
    }

    /// All currently unacknowledged events, newline-delimited JSON.
    pub fn read(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Discard events consumed per `ack`.
    pub fn ack(&mut self, ack: Ack) {
        match ack {
            Ack::HighWaterMark { ack_seq } => {
                self.events.retain(|e| e.id > ack_seq);
            }
            Ack::Ids { ack_ids } => {
                self.events.retain(|e| !ack_ids.contains(&e.id));
            }
        }
    }

    pub async fn wait_for_data(&self, cancel: &tokio_util::sync::CancellationToken) {
        if !self.events.is_empty() {
            return;
        }
        let notified = self.waiters.notified();
        tokio::select! {
            _ = notified => {},
            _ = cancel.cancelled() => {},
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "event_tests.rs"]
mod tests;
