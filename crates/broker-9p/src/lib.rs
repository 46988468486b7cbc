// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The 9P2000 filesystem server that exposes a `broker_core::manager::Manager`
//! over a Unix socket: wire framing, qid synthesis, the name tree, and the
//! accept/dispatch loop. `client` is a companion client used by the
//! integration test harness and any future non-9P-mount caller.

pub mod client;
pub mod qid;
pub mod server;
pub mod tree;
pub mod wire;
