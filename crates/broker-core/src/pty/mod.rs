// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Low-level PTY plumbing shared by [`crate::terminal_host`]'s native
//! implementation. The `forkpty`/escalating-signal spawn logic lives in
//! `terminal_host::native` since it is one ingredient of a window, not the
//! whole backend.

pub mod nbio;
