// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests: spawn the real `brokerd` binary and drive it
//! over the 9P2000 socket, covering session lifecycle, mail routing, and
//! error handling end to end.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use broker_specs::{create_session, parse_dir, parse_list, parse_status, wait_for_state, BrokerProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

/// A freshly created session appears in `/list` with a generated id.
#[tokio::test]
async fn create_and_list() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;

    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    assert_eq!(id.len(), 8);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

    let rows = parse_list(&String::from_utf8_lossy(&client.read_file("list").await?));
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.id, id);
    assert_eq!(row.backend, "demo");
    assert!(row.state == "starting" || row.state == "idle");
    assert_eq!(row.alias, "-");
    assert_eq!(row.cwd, cwd.path().display().to_string());

    Ok(())
}

/// `/status` exposes the same session with idle seconds and inbox count.
#[tokio::test]
async fn status_line_matches_list() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let rows = parse_status(&String::from_utf8_lossy(&client.read_file("status").await?));
    let row = rows.iter().find(|r| r.id == id).expect("session present in /status");
    assert_eq!(row.state, "idle");
    assert_eq!(row.inbox_count, 0);

    Ok(())
}

/// A session's STATUS_UPDATE mail is auto-routed into its own
/// chat log and auto-completed out of the user's inbox within one tick.
#[tokio::test]
async fn status_update_auto_routes_to_chat_log() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let mail = serde_json::json!({"to": "user", "type": "STATUS_UPDATE", "subject": "done", "body": "ok"});
    client.write_file(format!("{id}/mail"), serde_json::to_vec(&mail)?).await?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let completed_listing = parse_dir(&String::from_utf8_lossy(&client.read_file("user/completed").await?));
        if !completed_listing.is_empty() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("status update never reached user/completed");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let inbox_listing = parse_dir(&String::from_utf8_lossy(&client.read_file("user/inbox").await?));
    assert!(inbox_listing.is_empty(), "STATUS_UPDATE must not linger in the inbox");

    let completed_listing = parse_dir(&String::from_utf8_lossy(&client.read_file("user/completed").await?));
    assert_eq!(completed_listing.len(), 1);
    let (name, _) = &completed_listing[0];
    let body = client.read_file(&format!("user/completed/{name}")).await?;
    let parsed: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(parsed["from"], id);
    assert_eq!(parsed["subject"], "done");

    let chat_log = String::from_utf8_lossy(&client.read_file(&format!("{id}/chatlog")).await?).into_owned();
    assert!(chat_log.contains("ASSISTANT:"));
    assert!(chat_log.contains("ok"));

    Ok(())
}

/// A request-type message stays in the recipient's inbox across
/// ticks until explicitly completed.
#[tokio::test]
async fn request_stays_in_inbox_until_completed() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let mail = serde_json::json!({"to": id, "type": "QUERY_REQUEST", "subject": "q", "body": "?"});
    client.write_file("user/mail", serde_json::to_vec(&mail)?).await?;

    // Give the mail loop two ticks (200ms each in tests) to deliver.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let inbox_listing = parse_dir(&String::from_utf8_lossy(&client.read_file(&format!("{id}/inbox")).await?));
    assert_eq!(inbox_listing.len(), 1);
    let (name, _) = &inbox_listing[0];
    let msg_id = name.strip_suffix(".json").unwrap();

    let completed_listing = parse_dir(&String::from_utf8_lossy(&client.read_file(&format!("{id}/completed")).await?));
    assert!(completed_listing.is_empty());

    client.write_file(format!("{id}/ctl"), format!("complete {msg_id}")).await?;

    let inbox_listing = parse_dir(&String::from_utf8_lossy(&client.read_file(&format!("{id}/inbox")).await?));
    assert!(inbox_listing.is_empty());
    let completed_listing = parse_dir(&String::from_utf8_lossy(&client.read_file(&format!("{id}/completed")).await?));
    assert_eq!(completed_listing.len(), 1);

    Ok(())
}

/// An invalid alias is rejected and leaves the field unchanged.
#[tokio::test]
async fn invalid_alias_is_rejected() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let err = client.write_file(format!("{id}/alias"), "bad alias!").await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    assert!(err.to_string().contains("A-Za-z0-9"), "error should name the regex: {err}");

    let alias = String::from_utf8_lossy(&client.read_file(&format!("{id}/alias")).await?).into_owned();
    assert_eq!(alias, "");

    Ok(())
}

/// A valid alias round-trips.
#[tokio::test]
async fn valid_alias_round_trips() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    client.write_file(format!("{id}/alias"), "planner-1").await?;
    let alias = String::from_utf8_lossy(&client.read_file(&format!("{id}/alias")).await?).into_owned();
    assert_eq!(alias, "planner-1");

    let rows = parse_list(&String::from_utf8_lossy(&client.read_file("list").await?));
    assert_eq!(rows[0].alias, "planner-1");

    Ok(())
}

/// Restart after stop brings the session back to idle with a
/// fresh (non-zero) PID.
#[tokio::test]
async fn restart_after_stop() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let pid_before: u32 = String::from_utf8_lossy(&client.read_file(&format!("{id}/pid")).await?).trim().parse()?;
    assert_ne!(pid_before, 0);

    client.write_file(format!("{id}/ctl"), "stop").await?;
    wait_for_state(&mut client, &id, "stopped", TIMEOUT).await?;

    let pid_stopped: u32 = String::from_utf8_lossy(&client.read_file(&format!("{id}/pid")).await?).trim().parse()?;
    assert_eq!(pid_stopped, 0);

    client.write_file(format!("{id}/ctl"), "restart").await?;
    wait_for_state(&mut client, &id, "idle", Duration::from_secs(30)).await?;

    let pid_after: u32 = String::from_utf8_lossy(&client.read_file(&format!("{id}/pid")).await?).trim().parse()?;
    assert_ne!(pid_after, 0);

    Ok(())
}

/// Deprecated message types are rejected and name their modern
/// replacement, leaving the outbox untouched.
#[tokio::test]
async fn deprecated_message_type_is_rejected() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;

    let mail = serde_json::json!({"to": "user", "type": "LEGACY_PROMPT", "subject": "x", "body": "y"});
    let err = client.write_file("user/mail", serde_json::to_vec(&mail)?).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    assert!(err.to_string().contains("PROMPT_REQUEST"), "error should name the replacement: {err}");

    let outbox_listing = parse_dir(&String::from_utf8_lossy(&client.read_file("user/outbox").await?));
    assert!(outbox_listing.is_empty());

    Ok(())
}

/// `/<id>/state` rejects unreachable transitions by name.
#[tokio::test]
async fn invalid_state_transition_is_rejected() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    // idle -> idle is not a legal transition (only idle -> running/stopped/exited).
    let err = client.write_file(format!("{id}/state"), "idle").await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

    Ok(())
}

/// Sending a prompt from `user` through mail marks a running sender idle
/// again (the "always idle on outbox write" Open Question resolution), and
/// the recipient sees it in its inbox.
#[tokio::test]
async fn prompt_request_round_trip() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let mail = serde_json::json!({"to": id, "type": "PROMPT_REQUEST", "subject": "task", "body": "do the thing"});
    client.write_file("user/mail", serde_json::to_vec(&mail)?).await?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let inbox_listing = parse_dir(&String::from_utf8_lossy(&client.read_file(&format!("{id}/inbox")).await?));
        if !inbox_listing.is_empty() {
            let (name, _) = &inbox_listing[0];
            let body = client.read_file(&format!("{id}/inbox/{name}")).await?;
            let parsed: serde_json::Value = serde_json::from_slice(&body)?;
            assert_eq!(parsed["from"], "user");
            assert_eq!(parsed["type"], "PROMPT_REQUEST");
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("prompt never reached session inbox");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}

/// A session can reply by enqueueing outbox mail, which idles it again.
#[tokio::test]
async fn session_mail_write_idles_sender() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let mail = serde_json::json!({"to": "user", "type": "PROMPT_RESPONSE", "subject": "r", "body": "done"});
    client.write_file(format!("{id}/mail"), serde_json::to_vec(&mail)?).await?;

    // from is overwritten server-side regardless of what the client sends.
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;
    let outbox_or_user_inbox_deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let inbox_listing = parse_dir(&String::from_utf8_lossy(&client.read_file("user/inbox").await?));
        if !inbox_listing.is_empty() {
            let (name, _) = &inbox_listing[0];
            let body = client.read_file(&format!("user/inbox/{name}")).await?;
            let parsed: serde_json::Value = serde_json::from_slice(&body)?;
            assert_eq!(parsed["from"], id);
            break;
        }
        if tokio::time::Instant::now() > outbox_or_user_inbox_deadline {
            anyhow::bail!("session reply never reached user inbox");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}

/// `/ctl` refuses a `cwd` that doesn't exist.
#[tokio::test]
async fn new_session_rejects_nonexistent_cwd() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;

    let err = client.write_file("ctl", "new demo /no/such/directory/anywhere").await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

    Ok(())
}

/// `/ctl` refuses an unknown backend name.
#[tokio::test]
async fn new_session_rejects_unknown_backend() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;

    let err = client.write_file("ctl", format!("new no-such-backend {}", cwd.path().display())).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);

    Ok(())
}

/// Removing a message from a session's inbox before that connection has
/// bound to the session is rejected (only `user/inbox` is open to an
/// unbound connection).
#[tokio::test]
async fn remove_from_unbound_session_inbox_is_denied() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let mail = serde_json::json!({"to": id, "type": "QUERY_REQUEST", "subject": "q", "body": "?"});
    client.write_file("user/mail", serde_json::to_vec(&mail)?).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let inbox_listing = parse_dir(&String::from_utf8_lossy(&client.read_file(&format!("{id}/inbox")).await?));
    assert_eq!(inbox_listing.len(), 1);
    let (name, _) = &inbox_listing[0];

    let err = client.remove_file(&format!("{id}/inbox/{name}")).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);

    Ok(())
}

/// Session metadata (`role`, `tasks`) created via `/ctl`'s optional fields
/// is exposed read-only.
#[tokio::test]
async fn session_metadata_round_trips() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;

    let before: std::collections::HashSet<String> =
        parse_list(&String::from_utf8_lossy(&client.read_file("list").await?)).into_iter().map(|r| r.id).collect();
    client
        .write_file("ctl", format!("new demo {} role=reviewer tasks=lint,test", cwd.path().display()))
        .await?;
    let id = {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let after = parse_list(&String::from_utf8_lossy(&client.read_file("list").await?));
            if let Some(row) = after.iter().find(|r| !before.contains(&r.id)) {
                break row.id.clone();
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("new session never appeared");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    let role = String::from_utf8_lossy(&client.read_file(&format!("{id}/role")).await?).into_owned();
    assert_eq!(role, "reviewer");
    let tasks = String::from_utf8_lossy(&client.read_file(&format!("{id}/tasks")).await?).into_owned();
    assert_eq!(tasks, "lint,test");

    Ok(())
}

/// Context text set via `/<id>/context` round-trips.
#[tokio::test]
async fn context_round_trips() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    client.write_file(format!("{id}/context"), "You are reviewing PR #42.").await?;
    let context = String::from_utf8_lossy(&client.read_file(&format!("{id}/context")).await?).into_owned();
    assert_eq!(context, "You are reviewing PR #42.");

    Ok(())
}

/// `kill` (Close) is terminal: the session moves to `exited` and no longer
/// resolves on a later walk from `/`.
#[tokio::test]
async fn kill_closes_session_permanently() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    client.write_file(format!("{id}/ctl"), "kill").await?;
    wait_for_state(&mut client, &id, "exited", TIMEOUT).await?;

    // exited is terminal: nothing can transition it further.
    let err = client.write_file(format!("{id}/state"), "starting").await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

    Ok(())
}

/// `/events` streams JSON-per-line state-change events and accepts a
/// high-water-mark acknowledgment that trims the buffer.
#[tokio::test]
async fn events_stream_and_ack() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let raw = String::from_utf8_lossy(&client.read_file("events").await?).into_owned();
    assert!(!raw.is_empty(), "expected at least the session-creation StateChange event");

    let mut last_id = 0u64;
    for line in raw.lines() {
        let event: serde_json::Value = serde_json::from_str(line)?;
        assert_eq!(event["agent"], id);
        last_id = last_id.max(event["id"].as_u64().unwrap_or(0));
    }
    assert!(last_id > 0);

    client.write_file("events", serde_json::to_vec(&serde_json::json!({"ack_seq": last_id}))?).await?;
    let raw_after = String::from_utf8_lossy(&client.read_file("events").await?).into_owned();
    for line in raw_after.lines() {
        let event: serde_json::Value = serde_json::from_str(line)?;
        assert!(event["id"].as_u64().unwrap_or(0) > last_id);
    }

    Ok(())
}

/// The audit log records mailbox activity as an append-only stream.
#[tokio::test]
async fn audit_log_records_mail_activity() -> anyhow::Result<()> {
    let broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;

    let mail = serde_json::json!({"to": id, "type": "QUERY_REQUEST", "subject": "audit-marker", "body": "?"});
    client.write_file("user/mail", serde_json::to_vec(&mail)?).await?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let audit = String::from_utf8_lossy(&client.read_file("audit").await?).into_owned();
        if audit.contains("audit-marker") {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("audit log never recorded the outbox write");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}

/// Graceful shutdown on SIGTERM closes sessions and removes the socket and
/// PID file.
#[tokio::test]
async fn sigterm_triggers_graceful_shutdown() -> anyhow::Result<()> {
    let mut broker = BrokerProcess::start()?;
    let mut client = broker.connect().await?;
    let cwd = tempfile::tempdir()?;
    let id = create_session(&mut client, "demo", cwd.path()).await?;
    wait_for_state(&mut client, &id, "idle", TIMEOUT).await?;
    drop(client);

    let socket_path = broker.socket_path();
    let pid_path = broker.pid_path();
    assert!(socket_path.exists());
    assert!(pid_path.exists());

    broker.send_signal("TERM")?;
    broker.wait_exit(Duration::from_secs(10)).await?;

    assert!(!socket_path.exists(), "socket should be removed on graceful shutdown");
    assert!(!pid_path.exists(), "pid file should be removed on graceful shutdown");

    Ok(())
}

/// A stale socket left behind by a prior (not-responding) daemon is removed
/// on the next daemon's startup rather than causing a bind failure.
#[tokio::test]
async fn stale_socket_is_cleared_on_startup() -> anyhow::Result<()> {
    let namespace = tempfile::tempdir()?;
    std::fs::create_dir_all(namespace.path())?;
    let socket_path = namespace.path().join("agent");
    // A bound-but-unaccepted listener, dropped immediately, leaves a socket
    // file on disk with no responsive peer -- exactly the "stale" case.
    {
        let _listener = std::os::unix::net::UnixListener::bind(&socket_path)?;
    }
    assert!(socket_path.exists());

    let binary = broker_specs::brokerd_binary();
    anyhow::ensure!(binary.exists(), "brokerd binary not found at {}", binary.display());
    let mut child = std::process::Command::new(&binary)
        .arg("--namespace")
        .arg(namespace.path())
        .arg("--terminal-host")
        .arg("native")
        .arg("--log-format")
        .arg("text")
        .arg("--log-level")
        .arg("warn")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if broker_9p::client::Client::connect(&socket_path).await.is_ok() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            let _ = child.kill();
            anyhow::bail!("brokerd never came up over the stale socket");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let _ = child.kill();
    let _ = child.wait();
    Ok(())
}
