// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn default_registry_has_demo_backend() {
    let registry = BackendRegistry::default();
    assert!(registry.get("demo").is_some());
    assert_eq!(registry.names(), vec!["demo".to_string()]);
}

#[test]
fn unknown_backend_is_absent() {
    let registry = BackendRegistry::default();
    assert!(registry.get("nonexistent").is_none());
}

#[test]
fn generic_backend_allows_any_command_and_has_no_startup_dialog() {
    let cfg = BackendConfig::generic("custom", vec!["my-agent".into()]);
    assert!(cfg.command_handler.allows("/anything"));
    assert!(matches!(cfg.startup_dialog.handle(b"hello"), DialogAction::Done));
}
