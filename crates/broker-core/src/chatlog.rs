// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, message-boundary-aware transcript shared by [`crate::session`] and
//! [`crate::manager`]'s auto-routing step.
//!
//! Unlike [`crate::audit::AuditLog`]'s raw byte ring, the chat log never
//! splits a record: on overflow it drops whole `ROLE:\n...\n---\n` records
//! from the front until the total fits the cap (invariant: size stays
//! strictly below the cap after any truncation and the remaining bytes begin
//! immediately after a `\n---\n` boundary).

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::Notify;

const SEPARATOR: &str = "\n---\n";

/// A bounded log of `ROLE:\n<content>\n---\n` records addressed by a global,
/// monotonically increasing byte offset.
pub struct ChatLog {
    cap: usize,
    records: VecDeque<Bytes>,
    total_bytes: usize,
    base_offset: u64,
    waiters: Notify,
}

impl ChatLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            records: VecDeque::new(),
            total_bytes: 0,
            base_offset: 0,
            waiters: Notify::new(),
        }
    }

    /// Append a `role:\n<content>\n---\n` record, truncating from the oldest
    /// complete record if the cap would be exceeded.
    pub fn append(&mut self, role: &str, content: &str) {
        let record = Bytes::from(format!("{role}:\n{content}{SEPARATOR}"));
        self.total_bytes += record.len();
        self.records.push_back(record);

        while self.total_bytes > self.cap {
            let Some(oldest) = self.records.pop_front() else { break };
            self.total_bytes -= oldest.len();
            self.base_offset += oldest.len() as u64;
        }

        self.waiters.notify_waiters();
    }

    /// Global offset of the next byte that will be appended.
    pub fn end_offset(&self) -> u64 {
        self.base_offset + self.total_bytes as u64
    }

    /// Oldest offset still retained.
    pub fn start_offset(&self) -> u64 {
        self.base_offset
    }

    /// Bytes currently available starting at `offset`, clamped to what is
    /// still retained. Returns an empty buffer (not an error) for an offset
    /// that has already been truncated away, matching tail-follow semantics:
    /// callers that want "from the beginning" should pass `start_offset()`.
    pub fn read_from(&self, offset: u64) -> Bytes {
        let offset = offset.max(self.base_offset);
        if offset >= self.end_offset() {
            return Bytes::new();
        }
        let skip = (offset - self.base_offset) as usize;
        let mut out = Vec::with_capacity(self.total_bytes.saturating_sub(skip));
        let mut seen = 0usize;
        for record in &self.records {
            let len = record.len();
            if seen + len <= skip {
                seen += len;
                continue;
            }
            let start_in_record = skip.saturating_sub(seen);
            out.extend_from_slice(&record[start_in_record..]);
            seen += len;
        }
        Bytes::from(out)
    }

    /// Block until `read_from(offset)` would return non-empty data, or the
    /// cancellation token fires.
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

    pub fn total_size(&self) -> usize {
        self.total_bytes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "chatlog_tests.rs"]
mod tests;
