// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn push_assigns_monotonic_ids() {
    let mut q = EventQueue::new(16);
    let a = q.push("abc123", EventType::StateChange, serde_json::json!({}), 1);
    let b = q.push("abc123", EventType::StateChange, serde_json::json!({}), 2);
    assert!(b > a);
}

#[test]
fn ack_high_water_mark_discards_consumed() {
    let mut q = EventQueue::new(16);
    q.push("a", EventType::UserSend, serde_json::json!({}), 1);
    let second = q.push("a", EventType::UserSend, serde_json::json!({}), 2);
    q.ack(Ack::HighWaterMark { ack_seq: second });
    assert!(q.is_empty());
}

#[test]
fn ack_by_ids_discards_only_named() {
    let mut q = EventQueue::new(16);
    let first = q.push("a", EventType::BotRecv, serde_json::json!({}), 1);
    q.push("a", EventType::BotRecv, serde_json::json!({}), 2);
    q.ack(Ack::Ids { ack_ids: vec![first] });
    assert_eq!(q.read().len(), 1);
}

#[test]
fn cap_evicts_oldest() {
    let mut q = EventQueue::new(2);
    q.push("a", EventType::StateChange, serde_json::json!({}), 1);
    q.push("a", EventType::StateChange, serde_json::json!({}), 2);
    q.push("a", EventType::StateChange, serde_json::json!({}), 3);
    assert_eq!(q.read().len(), 2);
}
