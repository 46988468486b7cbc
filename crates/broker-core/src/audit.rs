// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit trail of every mailbox state change, recorded by
//! [`crate::mailbox::MailboxManager`] and served as a tail-follow stream by
//! the filesystem server's `/audit` file.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::message::Message;

/// Direction of a mailbox event, used as the third tab-separated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Complete,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Out => "out",
            Self::In => "in",
            Self::Complete => "complete",
        }
    }
}

/// Capacity-bounded, line-oriented log. Truncates whole lines from the front
/// on overflow, the same discipline as [`crate::chatlog::ChatLog`] but keyed
/// on `\n` rather than the chat log's `\n---\n` record separator.
pub struct AuditLog {
    cap: usize,
    lines: VecDeque<Bytes>,
    total_bytes: usize,
    base_offset: u64,
    waiters: Notify,
}

impl AuditLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            lines: VecDeque::new(),
            total_bytes: 0,
            base_offset: 0,
            waiters: Notify::new(),
        }
    }

    pub fn record(&mut self, now_unix_secs: u64, participant: &str, direction: Direction, msg: &Message) {
        let json = serde_json::to_string(msg).unwrap_or_else(|_| "{}".to_string());
        let line = Bytes::from(format!("{now_unix_secs}\t{participant}\t{}\t{json}\n", direction.as_str()));
        self.total_bytes += line.len();
        self.lines.push_back(line);

        while self.total_bytes > self.cap {
            let Some(oldest) = self.lines.pop_front() else { break };
            self.total_bytes -= oldest.len();
            self.base_offset += oldest.len() as u64;
        }

        self.waiters.notify_waiters();
    }

    pub fn end_offset(&self) -> u64 {
        self.base_offset + self.total_bytes as u64
    }

    pub fn start_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn read_from(&self, offset: u64) -> Bytes {
        let offset = offset.max(self.base_offset);
        if offset >= self.end_offset() {
            return Bytes::new();
        }
        let skip = (offset - self.base_offset) as usize;
        let mut out = Vec::with_capacity(self.total_bytes.saturating_sub(skip));
        let mut seen = 0usize;
        for line in &self.lines {
            let len = line.len();
            if seen + len <= skip {
                seen += len;
                continue;
            }
            let start_in_line = skip.saturating_sub(seen);
            out.extend_from_slice(&line[start_in_line..]);
            seen += len;
        }
        Bytes::from(out)
    }

    pub async fn wait_for_data(&self, offset: u64, cancel: &tokio_util::sync::CancellationToken) {
        if offset < self.end_offset() {
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
#[path = "audit_tests.rs"]
mod tests;
