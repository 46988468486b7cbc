// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Unix-socket accept loop and per-connection dispatch loop: a
//! `UnixListener` held by one struct, an infinite `accept().await` loop
//! spawning one task per connection, and a `handle_connection` generic
//! over `AsyncRead + AsyncWrite` so the same dispatch code could in
//! principle serve any framed transport. Specialized here to a single
//! Unix socket with no TCP/auth-token branch, since the 9P server has no
//! auth model beyond socket permissions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use broker_core::error::BrokerError;

use crate::qid::Qid;
use crate::tree::{Node, Tree};
use crate::wire::{self, Message, DEFAULT_MSIZE, OREAD, ORDWR, OWRITE, VERSION};

/// One outstanding fid on a connection: the node it was walked to, plus
/// open-mode bookkeeping. `None` until `Topen` succeeds.
struct Fid {
    node: Node,
    opened_write: bool,
}

/// Per-connection state. `owning_session` implements the Remove
/// authorization rule: the first write to a `/<id>/state` or `/<id>/mail`
/// file binds it.
struct Connection {
    tree: Arc<Tree>,
    fids: HashMap<u32, Fid>,
    owning_session: Option<String>,
    cancel: CancellationToken,
}

pub struct Server {
    listener: UnixListener,
    tree: Arc<Tree>,
    stop: CancellationToken,
}

impl Server {
    /// Bind `socket_path`. Stale-socket cleanup (removing the file first if
    /// nothing is listening on it) is the daemon's startup sequence's job,
    /// performed before calling this.
    pub fn bind(listener: UnixListener, tree: Arc<Tree>) -> Self {
        Self { listener, tree, stop: CancellationToken::new() }
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Accept connections until `stop` fires, spawning one task per
    /// connection.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    info!("9p server shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let tree = Arc::clone(&self.tree);
                            let conn_cancel = self.stop.child_token();
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                if let Err(e) = handle_connection(reader, writer, tree, conn_cancel).await {
                                    debug!(error = %e, "connection closed");
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }
}

async fn handle_connection<R, W>(mut reader: R, mut writer: W, tree: Arc<Tree>, cancel: CancellationToken) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = Connection { tree, fids: HashMap::new(), owning_session: None, cancel };

    loop {
        let frame = tokio::select! {
            _ = conn.cancel.cancelled() => return Ok(()),
            frame = wire::read_frame(&mut reader) => frame?,
        };
        let request = match Message::decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "malformed 9p frame, dropping connection");
                return Ok(());
            }
        };
        let tag = request.tag();
        let response = conn.dispatch(request).await;
        wire::write_message(&mut writer, &response).await?;
        if matches!(response, Message::Rerror { .. }) {
            debug!(tag, "request returned Rerror");
        }
    }
}

impl Connection {
    async fn dispatch(&mut self, request: Message) -> Message {
        match request {
            Message::Tversion { tag, msize, .. } => {
                Message::Rversion { tag, msize: msize.min(DEFAULT_MSIZE), version: VERSION.to_string() }
            }
            Message::Tauth { tag, .. } => err(tag, &BrokerError::permission("authentication not required")),
            Message::Tattach { tag, fid, .. } => {
                self.fids.insert(fid, Fid { node: Node::Root, opened_write: false });
                Message::Rattach { tag, qid: Node::Root.qid() }
            }
            Message::Twalk { tag, fid, newfid, wname } => self.walk(tag, fid, newfid, wname).await,
            Message::Topen { tag, fid, mode } => self.open(tag, fid, mode).await,
            Message::Tread { tag, fid, offset, count } => self.read(tag, fid, offset, count).await,
            Message::Twrite { tag, fid, offset, data } => self.write(tag, fid, offset, data).await,
            Message::Tclunk { tag, fid } => {
                self.fids.remove(&fid);
                Message::Rclunk { tag }
            }
            Message::Tremove { tag, fid } => self.remove(tag, fid).await,
            Message::Tstat { tag, fid } => self.stat(tag, fid).await,
            other => err(other.tag(), &BrokerError::invalid_argument("unexpected message type for a server to receive")),
        }
    }

    async fn walk(&mut self, tag: u16, fid: u32, newfid: u32, wname: Vec<String>) -> Message {
        let Some(start) = self.fids.get(&fid).map(|f| f.node.clone()) else {
            return err(tag, &BrokerError::not_found("no such fid"));
        };

        let mut current = start;
        let mut wqid = Vec::with_capacity(wname.len());
        for name in &wname {
            match self.tree.walk_one(&current, name).await {
                Some(next) => {
                    wqid.push(next.qid());
                    current = next;
                }
                None => break,
            }
        }

        if wname.is_empty() {
            self.fids.insert(newfid, Fid { node: current, opened_write: false });
            return Message::Rwalk { tag, wqid: vec![] };
        }
        if wqid.len() < wname.len() {
            if wqid.is_empty() {
                return err(tag, &BrokerError::not_found(format!("no such file {}", wname[0])));
            }
            return Message::Rwalk { tag, wqid };
        }
        self.fids.insert(newfid, Fid { node: current, opened_write: false });
        Message::Rwalk { tag, wqid }
    }

    async fn open(&mut self, tag: u16, fid: u32, mode: u8) -> Message {
        let Some(entry) = self.fids.get_mut(&fid) else {
            return err(tag, &BrokerError::not_found("no such fid"));
        };
        if matches!(mode, OWRITE | ORDWR) && entry.node.is_dir() {
            return err(tag, &BrokerError::permission("directories are not writable"));
        }
        let qid = entry.node.qid();
        entry.opened_write = mode != OREAD;
        Message::Ropen { tag, qid, iounit: 0 }
    }

    async fn read(&mut self, tag: u16, fid: u32, offset: u64, count: u32) -> Message {
        let Some(entry) = self.fids.get(&fid) else {
            return err(tag, &BrokerError::not_found("no such fid"));
        };
        match self.tree.read(&entry.node, offset, count, &self.cancel).await {
            Ok(data) => Message::Rread { tag, data },
            Err(e) => err(tag, &e),
        }
    }

    async fn write(&mut self, tag: u16, fid: u32, offset: u64, data: bytes::Bytes) -> Message {
        let Some(entry) = self.fids.get(&fid) else {
            return err(tag, &BrokerError::not_found("no such fid"));
        };
        if !entry.opened_write {
            return err(tag, &BrokerError::permission("fid was not opened for writing"));
        }
        let node = entry.node.clone();
        let _ = offset;
        match self.tree.write(&node, &data, &mut self.owning_session).await {
            Ok(n) => Message::Rwrite { tag, count: n as u32 },
            Err(e) => err(tag, &e),
        }
    }

    async fn remove(&mut self, tag: u16, fid: u32) -> Message {
        let Some(entry) = self.fids.remove(&fid) else {
            return err(tag, &BrokerError::not_found("no such fid"));
        };
        match self.tree.remove(&entry.node, &self.owning_session).await {
            Ok(()) => Message::Rremove { tag },
            Err(e) => err(tag, &e),
        }
    }

    async fn stat(&mut self, tag: u16, fid: u32) -> Message {
        let Some(entry) = self.fids.get(&fid) else {
            return err(tag, &BrokerError::not_found("no such fid"));
        };
        Message::Rstat { tag, stat: encode_stat(&entry.node, &entry.node.leaf_name()) }
    }
}

/// A minimal 9P2000 stat record: enough for clients that just want
/// name/qid/mode, not the exhaustive dotu/dotl variants this server never
/// advertises support for. Fixed zero timestamps/uid/gid; the daemon has no
/// concept of per-file ownership beyond the Remove authorization rule. Shared
/// by `Tstat` and the per-entry encoding `Tree::encode_directory` does for
/// directory reads, so both paths agree on field widths.
pub(crate) fn encode_stat(node: &Node, name: &str) -> bytes::Bytes {
    use bytes::{BufMut, BytesMut};
    let Qid { qtype, version, path } = node.qid();
    let mode: u32 = if node.is_dir() { 0o40555 } else if matches!(node, Node::List | Node::Status | Node::Audit) { 0o444 } else { 0o644 };

    let mut body = BytesMut::new();
    body.put_u16_le(0); // type
    body.put_u32_le(0); // dev
    body.put_u8(qtype);
    body.put_u32_le(version);
    body.put_u64_le(path);
    body.put_u32_le(mode);
    body.put_u32_le(0); // atime
    body.put_u32_le(0); // mtime
    body.put_u64_le(0); // length
    put_str(&mut body, name);
    put_str(&mut body, ""); // uid
    put_str(&mut body, ""); // gid
    put_str(&mut body, ""); // muid

    let mut out = BytesMut::with_capacity(body.len() + 2);
    out.put_u16_le(body.len() as u16);
    out.extend_from_slice(&body);
    out.freeze()
}

fn put_str(buf: &mut bytes::BytesMut, s: &str) {
    use bytes::BufMut;
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn err(tag: u16, e: &BrokerError) -> Message {
    Message::Rerror { tag, ename: e.to_9p_error() }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "server_tests.rs"]
mod tests;
