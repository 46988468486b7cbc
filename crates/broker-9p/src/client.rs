// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A minimal 9P2000 client used by the integration test harness (and usable
//! by any future front-end that wants to talk to `brokerd` without shelling
//! out to a real 9P mount). Not part of the daemon itself.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;

use crate::wire::{self, Message, DEFAULT_MSIZE, NOFID, OREAD, OWRITE, VERSION};

/// A connected 9P session: version-negotiated, attached at fid 0, handing
/// out fresh fids/tags for each call.
pub struct Client<S> {
    stream: S,
    next_fid: u32,
    next_tag: u16,
}

impl Client<UnixStream> {
    pub async fn connect(socket_path: &std::path::Path) -> io::Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Self::handshake(stream).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn handshake(mut stream: S) -> io::Result<Self> {
        wire::write_message(&mut stream, &Message::Tversion { tag: wire::NOTAG, msize: DEFAULT_MSIZE, version: VERSION.to_string() }).await?;
        let frame = wire::read_frame(&mut stream).await?;
        match Message::decode(&frame)? {
            Message::Rversion { version, .. } if version == VERSION => {}
            Message::Rversion { version, .. } => {
                return Err(io::Error::new(io::ErrorKind::Unsupported, format!("server speaks {version}, expected {VERSION}")))
            }
            other => return Err(unexpected("Rversion", &other)),
        }

        let mut client = Self { stream, next_fid: 0, next_tag: 0 };
        let root = client.alloc_fid();
        client
            .call(Message::Tattach { tag: client.alloc_tag(), fid: root, afid: NOFID, uname: "broker".into(), aname: "".into() })
            .await?;
        Ok(client)
    }

    fn alloc_fid(&mut self) -> u32 {
        let fid = self.next_fid;
        self.next_fid += 1;
        fid
    }

    fn alloc_tag(&mut self) -> u16 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    async fn call(&mut self, request: Message) -> io::Result<Message> {
        wire::write_message(&mut self.stream, &request).await?;
        let frame = wire::read_frame(&mut self.stream).await?;
        Message::decode(&frame)
    }

    /// Walk from the attached root (fid 0) to `path`, split on `/`, returning
    /// a freshly allocated fid positioned there.
    pub async fn walk(&mut self, path: &str) -> io::Result<u32> {
        let newfid = self.alloc_fid();
        let wname: Vec<String> = path.split('/').filter(|s| !s.is_empty()).map(str::to_owned).collect();
        let tag = self.alloc_tag();
        match self.call(Message::Twalk { tag, fid: 0, newfid, wname: wname.clone() }).await? {
            Message::Rwalk { wqid, .. } if wqid.len() == wname.len() => Ok(newfid),
            Message::Rwalk { .. } => Err(io::Error::new(io::ErrorKind::NotFound, format!("no such path {path}"))),
            Message::Rerror { ename, .. } => Err(rerror_to_io(ename)),
            other => Err(unexpected("Rwalk", &other)),
        }
    }

    pub async fn open(&mut self, fid: u32, mode: u8) -> io::Result<()> {
        let tag = self.alloc_tag();
        match self.call(Message::Topen { tag, fid, mode }).await? {
            Message::Ropen { .. } => Ok(()),
            Message::Rerror { ename, .. } => Err(rerror_to_io(ename)),
            other => Err(unexpected("Ropen", &other)),
        }
    }

    pub async fn read(&mut self, fid: u32, offset: u64, count: u32) -> io::Result<Bytes> {
        let tag = self.alloc_tag();
        match self.call(Message::Tread { tag, fid, offset, count }).await? {
            Message::Rread { data, .. } => Ok(data),
            Message::Rerror { ename, .. } => Err(rerror_to_io(ename)),
            other => Err(unexpected("Rread", &other)),
        }
    }

    pub async fn write(&mut self, fid: u32, offset: u64, data: Bytes) -> io::Result<u32> {
        let tag = self.alloc_tag();
        match self.call(Message::Twrite { tag, fid, offset, data }).await? {
            Message::Rwrite { count, .. } => Ok(count),
            Message::Rerror { ename, .. } => Err(rerror_to_io(ename)),
            other => Err(unexpected("Rwrite", &other)),
        }
    }

    pub async fn clunk(&mut self, fid: u32) -> io::Result<()> {
        let tag = self.alloc_tag();
        match self.call(Message::Tclunk { tag, fid }).await? {
            Message::Rclunk { .. } => Ok(()),
            Message::Rerror { ename, .. } => Err(rerror_to_io(ename)),
            other => Err(unexpected("Rclunk", &other)),
        }
    }

    pub async fn remove(&mut self, fid: u32) -> io::Result<()> {
        let tag = self.alloc_tag();
        match self.call(Message::Tremove { tag, fid }).await? {
            Message::Rremove { .. } => Ok(()),
            Message::Rerror { ename, .. } => Err(rerror_to_io(ename)),
            other => Err(unexpected("Rremove", &other)),
        }
    }

    /// Walk + open(OREAD) + read-to-end + clunk, for one-shot reads of a
    /// small non-streaming file.
    pub async fn read_file(&mut self, path: &str) -> io::Result<Bytes> {
        let fid = self.walk(path).await?;
        self.open(fid, OREAD).await?;
        let data = self.read(fid, 0, DEFAULT_MSIZE).await?;
        self.clunk(fid).await?;
        Ok(data)
    }

    /// Walk + open(OWRITE) + write + clunk, for one-shot writes to a control
    /// or mail file.
    pub async fn write_file(&mut self, path: &str, data: impl Into<Bytes>) -> io::Result<()> {
        let fid = self.walk(path).await?;
        self.open(fid, OWRITE).await?;
        self.write(fid, 0, data.into()).await?;
        self.clunk(fid).await?;
        Ok(())
    }

    /// Walk + remove (for `CompleteMessage` over `<id>/inbox/<msg>.json`).
    pub async fn remove_file(&mut self, path: &str) -> io::Result<()> {
        let fid = self.walk(path).await?;
        self.remove(fid).await
    }
}

fn unexpected(expected: &str, got: &Message) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("expected {expected}, got {got:?}"))
}

/// Recover an `io::ErrorKind` from a server `Rerror`'s `ename`, which is
/// always `BrokerError::to_9p_error()`'s `"{KIND}: {detail}"`.
fn rerror_to_io(ename: String) -> io::Error {
    let kind = match ename.split_once(": ").map(|(kind, _)| kind) {
        Some("NOT_FOUND") => io::ErrorKind::NotFound,
        Some("PERMISSION") => io::ErrorKind::PermissionDenied,
        Some("INVALID_ARGUMENT") => io::ErrorKind::InvalidInput,
        Some("BUSY") => io::ErrorKind::WouldBlock,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, ename)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "client_tests.rs"]
mod tests;
