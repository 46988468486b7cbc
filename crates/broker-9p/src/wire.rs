// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! 9P2000 wire framing: `size[4] type[1] tag[2] ...` little-endian, plus
//! encode/decode for the T/R message pairs the filesystem server speaks.
//! Used by both the server (`crate::server`) and the client helper
//! (`crate::client`) so the two sides round-trip identically.

use std::io::{self, Cursor, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::qid::Qid;

pub const NOTAG: u16 = 0xFFFF;
pub const NOFID: u32 = 0xFFFF_FFFF;
pub const DEFAULT_MSIZE: u32 = 64 * 1024;
pub const VERSION: &str = "9P2000";

const T_VERSION: u8 = 100;
const R_VERSION: u8 = 101;
const T_AUTH: u8 = 102;
const R_AUTH: u8 = 103;
const R_ERROR: u8 = 107;
const T_ATTACH: u8 = 104;
const R_ATTACH: u8 = 105;
const T_WALK: u8 = 110;
const R_WALK: u8 = 111;
const T_OPEN: u8 = 112;
const R_OPEN: u8 = 113;
const T_READ: u8 = 116;
const R_READ: u8 = 117;
const T_WRITE: u8 = 118;
const R_WRITE: u8 = 119;
const T_CLUNK: u8 = 120;
const R_CLUNK: u8 = 121;
const T_REMOVE: u8 = 122;
const R_REMOVE: u8 = 123;
const T_STAT: u8 = 124;
const R_STAT: u8 = 125;

/// Open modes a `Topen`/`Tcreate` may request; only the read/write
/// distinction matters to this server.
pub const OREAD: u8 = 0;
pub const OWRITE: u8 = 1;
pub const ORDWR: u8 = 2;

#[derive(Debug, Clone)]
pub enum Message {
    Tversion { tag: u16, msize: u32, version: String },
    Rversion { tag: u16, msize: u32, version: String },
    Tauth { tag: u16, afid: u32, uname: String, aname: String },
    Rauth { tag: u16, aqid: Qid },
    Rerror { tag: u16, ename: String },
    Tattach { tag: u16, fid: u32, afid: u32, uname: String, aname: String },
    Rattach { tag: u16, qid: Qid },
    Twalk { tag: u16, fid: u32, newfid: u32, wname: Vec<String> },
    Rwalk { tag: u16, wqid: Vec<Qid> },
    Topen { tag: u16, fid: u32, mode: u8 },
    Ropen { tag: u16, qid: Qid, iounit: u32 },
    Tread { tag: u16, fid: u32, offset: u64, count: u32 },
    Rread { tag: u16, data: Bytes },
    Twrite { tag: u16, fid: u32, offset: u64, data: Bytes },
    Rwrite { tag: u16, count: u32 },
    Tclunk { tag: u16, fid: u32 },
    Rclunk { tag: u16 },
    Tremove { tag: u16, fid: u32 },
    Rremove { tag: u16 },
    Tstat { tag: u16, fid: u32 },
    Rstat { tag: u16, stat: Bytes },
}

impl Message {
    pub fn tag(&self) -> u16 {
        match self {
            Message::Tversion { tag, .. }
            | Message::Rversion { tag, .. }
            | Message::Tauth { tag, .. }
            | Message::Rauth { tag, .. }
            | Message::Rerror { tag, .. }
            | Message::Tattach { tag, .. }
            | Message::Rattach { tag, .. }
            | Message::Twalk { tag, .. }
            | Message::Rwalk { tag, .. }
            | Message::Topen { tag, .. }
            | Message::Ropen { tag, .. }
            | Message::Tread { tag, .. }
            | Message::Rread { tag, .. }
            | Message::Twrite { tag, .. }
            | Message::Rwrite { tag, .. }
            | Message::Tclunk { tag, .. }
            | Message::Rclunk { tag, .. }
            | Message::Tremove { tag, .. }
            | Message::Rremove { tag, .. }
            | Message::Tstat { tag, .. }
            | Message::Rstat { tag, .. } => *tag,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        let ty: u8 = match self {
            Message::Tversion { tag, msize, version } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*msize);
                put_str(&mut body, version);
                T_VERSION
            }
            Message::Rversion { tag, msize, version } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*msize);
                put_str(&mut body, version);
                R_VERSION
            }
            Message::Tauth { tag, afid, uname, aname } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*afid);
                put_str(&mut body, uname);
                put_str(&mut body, aname);
                T_AUTH
            }
            Message::Rauth { tag, aqid } => {
                body.put_u16_le(*tag);
                put_qid(&mut body, aqid);
                R_AUTH
            }
            Message::Rerror { tag, ename } => {
                body.put_u16_le(*tag);
                put_str(&mut body, ename);
                R_ERROR
            }
            Message::Tattach { tag, fid, afid, uname, aname } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*fid);
                body.put_u32_le(*afid);
                put_str(&mut body, uname);
                put_str(&mut body, aname);
                T_ATTACH
            }
            Message::Rattach { tag, qid } => {
                body.put_u16_le(*tag);
                put_qid(&mut body, qid);
                R_ATTACH
            }
            Message::Twalk { tag, fid, newfid, wname } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*fid);
                body.put_u32_le(*newfid);
                body.put_u16_le(wname.len() as u16);
                for name in wname {
                    put_str(&mut body, name);
                }
                T_WALK
            }
            Message::Rwalk { tag, wqid } => {
                body.put_u16_le(*tag);
                body.put_u16_le(wqid.len() as u16);
                for qid in wqid {
                    put_qid(&mut body, qid);
                }
                R_WALK
            }
            Message::Topen { tag, fid, mode } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*fid);
                body.put_u8(*mode);
                T_OPEN
            }
            Message::Ropen { tag, qid, iounit } => {
                body.put_u16_le(*tag);
                put_qid(&mut body, qid);
                body.put_u32_le(*iounit);
                R_OPEN
            }
            Message::Tread { tag, fid, offset, count } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*fid);
                body.put_u64_le(*offset);
                body.put_u32_le(*count);
                T_READ
            }
            Message::Rread { tag, data } => {
                body.put_u16_le(*tag);
                body.put_u32_le(data.len() as u32);
                body.put_slice(data);
                R_READ
            }
            Message::Twrite { tag, fid, offset, data } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*fid);
                body.put_u64_le(*offset);
                body.put_u32_le(data.len() as u32);
                body.put_slice(data);
                T_WRITE
            }
            Message::Rwrite { tag, count } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*count);
                R_WRITE
            }
            Message::Tclunk { tag, fid } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*fid);
                T_CLUNK
            }
            Message::Rclunk { tag } => {
                body.put_u16_le(*tag);
                R_CLUNK
            }
            Message::Tremove { tag, fid } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*fid);
                T_REMOVE
            }
            Message::Rremove { tag } => {
                body.put_u16_le(*tag);
                R_REMOVE
            }
            Message::Tstat { tag, fid } => {
                body.put_u16_le(*tag);
                body.put_u32_le(*fid);
                T_STAT
            }
            Message::Rstat { tag, stat } => {
                body.put_u16_le(*tag);
                body.put_u16_le(stat.len() as u16);
                body.put_slice(stat);
                R_STAT
            }
        };

        let size = 4 + 1 + body.len() as u32;
        let mut out = BytesMut::with_capacity(size as usize);
        out.put_u32_le(size);
        out.put_u8(ty);
        out.extend_from_slice(&body);
        out.freeze()
    }

    pub fn decode(buf: &[u8]) -> io::Result<Message> {
        let mut cursor = Cursor::new(buf);
        let ty = read_u8(&mut cursor)?;
        let tag = read_u16(&mut cursor)?;
        let msg = match ty {
            T_VERSION => Message::Tversion { tag, msize: read_u32(&mut cursor)?, version: read_str(&mut cursor)? },
            R_VERSION => Message::Rversion { tag, msize: read_u32(&mut cursor)?, version: read_str(&mut cursor)? },
            T_AUTH => Message::Tauth {
                tag,
                afid: read_u32(&mut cursor)?,
                uname: read_str(&mut cursor)?,
                aname: read_str(&mut cursor)?,
            },
            R_AUTH => Message::Rauth { tag, aqid: read_qid(&mut cursor)? },
            R_ERROR => Message::Rerror { tag, ename: read_str(&mut cursor)? },
            T_ATTACH => Message::Tattach {
                tag,
                fid: read_u32(&mut cursor)?,
                afid: read_u32(&mut cursor)?,
                uname: read_str(&mut cursor)?,
                aname: read_str(&mut cursor)?,
            },
            R_ATTACH => Message::Rattach { tag, qid: read_qid(&mut cursor)? },
            T_WALK => {
                let fid = read_u32(&mut cursor)?;
                let newfid = read_u32(&mut cursor)?;
                let n = read_u16(&mut cursor)?;
                let mut wname = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    wname.push(read_str(&mut cursor)?);
                }
                Message::Twalk { tag, fid, newfid, wname }
            }
            R_WALK => {
                let n = read_u16(&mut cursor)?;
                let mut wqid = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    wqid.push(read_qid(&mut cursor)?);
                }
                Message::Rwalk { tag, wqid }
            }
            T_OPEN => Message::Topen { tag, fid: read_u32(&mut cursor)?, mode: read_u8(&mut cursor)? },
            R_OPEN => Message::Ropen { tag, qid: read_qid(&mut cursor)?, iounit: read_u32(&mut cursor)? },
            T_READ => Message::Tread {
                tag,
                fid: read_u32(&mut cursor)?,
                offset: read_u64(&mut cursor)?,
                count: read_u32(&mut cursor)?,
            },
            R_READ => {
                let count = read_u32(&mut cursor)?;
                Message::Rread { tag, data: read_bytes(&mut cursor, count as usize)? }
            }
            T_WRITE => {
                let fid = read_u32(&mut cursor)?;
                let offset = read_u64(&mut cursor)?;
                let count = read_u32(&mut cursor)?;
                Message::Twrite { tag, fid, offset, data: read_bytes(&mut cursor, count as usize)? }
            }
            R_WRITE => Message::Rwrite { tag, count: read_u32(&mut cursor)? },
            T_CLUNK => Message::Tclunk { tag, fid: read_u32(&mut cursor)? },
            R_CLUNK => Message::Rclunk { tag },
            T_REMOVE => Message::Tremove { tag, fid: read_u32(&mut cursor)? },
            R_REMOVE => Message::Rremove { tag },
            T_STAT => Message::Tstat { tag, fid: read_u32(&mut cursor)? },
            R_STAT => {
                let n = read_u16(&mut cursor)?;
                Message::Rstat { tag, stat: read_bytes(&mut cursor, n as usize)? }
            }
            other => return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown message type {other}"))),
        };
        Ok(msg)
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_qid(buf: &mut BytesMut, qid: &Qid) {
    buf.put_u8(qid.qtype);
    buf.put_u32_le(qid.version);
    buf.put_u64_le(qid.path);
}

fn read_u8(c: &mut Cursor<&[u8]>) -> io::Result<u8> {
    let mut b = [0u8; 1];
    c.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16(c: &mut Cursor<&[u8]>) -> io::Result<u16> {
    let mut b = [0u8; 2];
    c.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32(c: &mut Cursor<&[u8]>) -> io::Result<u32> {
    let mut b = [0u8; 4];
    c.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(c: &mut Cursor<&[u8]>) -> io::Result<u64> {
    let mut b = [0u8; 8];
    c.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn read_str(c: &mut Cursor<&[u8]>) -> io::Result<String> {
    let len = read_u16(c)? as usize;
    let bytes = read_bytes(c, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn read_qid(c: &mut Cursor<&[u8]>) -> io::Result<Qid> {
    let qtype = read_u8(c)?;
    let version = read_u32(c)?;
    let path = read_u64(c)?;
    Ok(Qid { qtype, version, path })
}

fn read_bytes(c: &mut Cursor<&[u8]>, len: usize) -> io::Result<Bytes> {
    let mut v = vec![0u8; len];
    c.read_exact(&mut v)?;
    Ok(Bytes::from(v))
}

/// Read one length-prefixed frame off an async stream, per the `size[4] ...`
/// framing (`size` includes itself).
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<Bytes> {
    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).await?;
    let size = u32::from_le_bytes(size_buf);
    if size < 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame smaller than its own length prefix"));
    }
    let mut rest = vec![0u8; size as usize - 4];
    stream.read_exact(&mut rest).await?;
    Ok(Bytes::from(rest))
}

pub async fn write_message<W: AsyncWrite + Unpin>(stream: &mut W, msg: &Message) -> io::Result<()> {
    stream.write_all(&msg.encode()).await?;
    stream.flush().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "wire_tests.rs"]
mod tests;
