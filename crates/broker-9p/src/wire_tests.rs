use bytes::Bytes;

use super::*;

fn roundtrip(msg: Message) {
    let encoded = msg.encode();
    let size = u32::from_le_bytes(encoded[0..4].try_into().unwrap());
    assert_eq!(size as usize, encoded.len());
    let decoded = Message::decode(&encoded[4..]).unwrap();
    assert_eq!(format!("{decoded:?}"), format!("{msg:?}"));
}

#[test]
fn tversion_roundtrips() {
    roundtrip(Message::Tversion { tag: NOTAG, msize: DEFAULT_MSIZE, version: VERSION.to_string() });
}

#[test]
fn rversion_roundtrips() {
    roundtrip(Message::Rversion { tag: NOTAG, msize: DEFAULT_MSIZE, version: VERSION.to_string() });
}

#[test]
fn tauth_roundtrips() {
    roundtrip(Message::Tauth { tag: 1, afid: NOFID, uname: "u".into(), aname: "".into() });
}

#[test]
fn rerror_roundtrips() {
    roundtrip(Message::Rerror { tag: 1, ename: "NOT_FOUND: no session abc".into() });
}

#[test]
fn tattach_rattach_roundtrip() {
    roundtrip(Message::Tattach { tag: 2, fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() });
    roundtrip(Message::Rattach { tag: 2, qid: crate::qid::dir_qid("root") });
}

#[test]
fn twalk_with_multiple_names_roundtrips() {
    roundtrip(Message::Twalk { tag: 3, fid: 0, newfid: 1, wname: vec!["abc12345".into(), "state".into()] });
}

#[test]
fn rwalk_with_multiple_qids_roundtrips() {
    roundtrip(Message::Rwalk { tag: 3, wqid: vec![crate::qid::dir_qid("a"), crate::qid::file_qid("b")] });
}

#[test]
fn twalk_with_no_names_roundtrips() {
    roundtrip(Message::Twalk { tag: 3, fid: 0, newfid: 1, wname: vec![] });
}

#[test]
fn topen_ropen_roundtrip() {
    roundtrip(Message::Topen { tag: 4, fid: 1, mode: OREAD });
    roundtrip(Message::Ropen { tag: 4, qid: crate::qid::file_qid("x"), iounit: 0 });
}

#[test]
fn tread_rread_roundtrip() {
    roundtrip(Message::Tread { tag: 5, fid: 1, offset: 128, count: 4096 });
    roundtrip(Message::Rread { tag: 5, data: Bytes::from_static(b"hello world") });
}

#[test]
fn rread_with_empty_data_roundtrips() {
    roundtrip(Message::Rread { tag: 5, data: Bytes::new() });
}

#[test]
fn twrite_rwrite_roundtrip() {
    roundtrip(Message::Twrite { tag: 6, fid: 1, offset: 0, data: Bytes::from_static(b"{\"to\":\"user\"}") });
    roundtrip(Message::Rwrite { tag: 6, count: 14 });
}

#[test]
fn tclunk_rclunk_roundtrip() {
    roundtrip(Message::Tclunk { tag: 7, fid: 1 });
    roundtrip(Message::Rclunk { tag: 7 });
}

#[test]
fn tremove_rremove_roundtrip() {
    roundtrip(Message::Tremove { tag: 8, fid: 1 });
    roundtrip(Message::Rremove { tag: 8 });
}

#[test]
fn tstat_rstat_roundtrip() {
    roundtrip(Message::Tstat { tag: 9, fid: 1 });
    roundtrip(Message::Rstat { tag: 9, stat: Bytes::from_static(b"fake-stat-record") });
}

#[test]
fn tag_accessor_matches_every_variant() {
    assert_eq!(Message::Tversion { tag: 42, msize: 0, version: String::new() }.tag(), 42);
    assert_eq!(Message::Rerror { tag: 42, ename: String::new() }.tag(), 42);
    assert_eq!(Message::Rread { tag: 42, data: Bytes::new() }.tag(), 42);
}

#[test]
fn decode_rejects_unknown_type() {
    let mut buf = vec![0xFFu8];
    buf.extend_from_slice(&1u16.to_le_bytes());
    let err = Message::decode(&buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn decode_rejects_truncated_frame() {
    let buf = vec![T_VERSION, 0, 0];
    let err = Message::decode(&buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn read_frame_rejects_length_prefix_smaller_than_itself() {
    let mut buf: &[u8] = &[2, 0, 0, 0];
    let err = read_frame(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[tokio::test]
async fn write_then_read_frame_roundtrips() {
    let msg = Message::Tversion { tag: NOTAG, msize: DEFAULT_MSIZE, version: VERSION.to_string() };
    let mut buf = Vec::new();
    write_message(&mut buf, &msg).await.unwrap();

    let mut cursor = std::io::Cursor::new(buf);
    let frame = read_frame(&mut cursor).await.unwrap();
    let decoded = Message::decode(&frame).unwrap();
    assert_eq!(format!("{decoded:?}"), format!("{msg:?}"));
}
