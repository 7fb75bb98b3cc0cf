//! Canonical object encoding.
//!
//! Every stored object is framed as
//!
//! ```text
//! <kind> <decimal body length>\0<body>
//! ```
//!
//! and its [`ObjectId`] is the SHA-256 of the whole frame. Body layouts:
//!
//! | Kind   | Body                                                                |
//! |--------|---------------------------------------------------------------------|
//! | blob   | raw bytes                                                           |
//! | tree   | per entry, in name order: `<octal mode> <name>\0<32 raw id bytes>`  |
//! | commit | `tree`, `parent`*, `author`, `committer` header lines, blank line, message |
//! | tag    | `object`, `type`, `tag`, `tagger` header lines, blank line, message |
//!
//! Signatures encode as `<name> <<email>> <seconds> <±hhmm>`.
//!
//! Decoding is strict: anything an encoder would not have produced (unsorted
//! tree entries, unknown headers, wrong lengths) is rejected, so two decoded
//! objects are equal exactly when their encodings are.

use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::object::{Commit, Object, Signature, Tag, Tree, TreeEntry};
use crate::types::{EntryMode, ObjectId, ObjectKind};

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

fn header(kind: ObjectKind, len: usize) -> Vec<u8> {
    format!("{} {len}\0", kind.as_str()).into_bytes()
}

/// Compute the id of an object without storing it.
#[must_use]
pub fn hash_object(kind: ObjectKind, body: &[u8]) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(header(kind, body.len()));
    hasher.update(body);
    ObjectId::from_bytes(hasher.finalize().into())
}

/// Digest of an already-framed object (used to verify stored bytes).
#[must_use]
pub fn hash_frame(frame: &[u8]) -> ObjectId {
    ObjectId::from_bytes(Sha256::digest(frame).into())
}

/// Frame a body with its header.
#[must_use]
pub fn frame(kind: ObjectKind, body: &[u8]) -> Vec<u8> {
    let mut out = header(kind, body.len());
    out.extend_from_slice(body);
    out
}

/// Split a frame into its kind and body, checking the declared length.
///
/// # Errors
/// Returns [`StoreError::Malformed`] if the header is missing, names an
/// unknown kind, or declares a length that does not match the body.
pub fn unframe(bytes: &[u8]) -> Result<(ObjectKind, &[u8]), StoreError> {
    let nul = bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| StoreError::malformed(ObjectKind::Blob, "missing header terminator"))?;
    let head = &bytes[..nul];
    let body = &bytes[nul + 1..];
    let space = head
        .iter()
        .position(|b| *b == b' ')
        .ok_or_else(|| StoreError::malformed(ObjectKind::Blob, "header has no length"))?;
    let kind = ObjectKind::from_keyword(&head[..space]).ok_or_else(|| {
        StoreError::malformed(
            ObjectKind::Blob,
            format!("unknown kind {:?}", String::from_utf8_lossy(&head[..space])),
        )
    })?;
    let len: usize = std::str::from_utf8(&head[space + 1..])
        .ok()
        .filter(|s| !s.is_empty() && (s == &"0" || !s.starts_with('0')))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::malformed(kind, "invalid length in header"))?;
    if len != body.len() {
        return Err(StoreError::malformed(
            kind,
            format!("header declares {len} bytes, body has {}", body.len()),
        ));
    }
    Ok((kind, body))
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Encode the body of an object (without the frame header).
#[must_use]
pub fn encode_body(object: &Object) -> Vec<u8> {
    match object {
        Object::Blob(data) => data.clone(),
        Object::Tree(tree) => encode_tree(tree),
        Object::Commit(commit) => encode_commit(commit),
        Object::Tag(tag) => encode_tag(tag),
    }
}

/// Decode a body of the given kind.
///
/// # Errors
/// Returns [`StoreError::Malformed`] if the body is not a canonical encoding.
pub fn decode_body(kind: ObjectKind, body: &[u8]) -> Result<Object, StoreError> {
    match kind {
        ObjectKind::Blob => Ok(Object::Blob(body.to_vec())),
        ObjectKind::Tree => decode_tree(body).map(Object::Tree),
        ObjectKind::Commit => decode_commit(body).map(Object::Commit),
        ObjectKind::Tag => decode_tag(body).map(Object::Tag),
    }
}

fn encode_tree(tree: &Tree) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in tree.entries() {
        out.extend_from_slice(entry.mode.as_octal().as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.id.as_bytes());
    }
    out
}

fn decode_tree(mut body: &[u8]) -> Result<Tree, StoreError> {
    let bad = |reason: &str| StoreError::malformed(ObjectKind::Tree, reason);
    let mut entries = Vec::new();
    while !body.is_empty() {
        let space = body
            .iter()
            .position(|b| *b == b' ')
            .ok_or_else(|| bad("entry without mode separator"))?;
        let mode = EntryMode::from_octal(&body[..space]).ok_or_else(|| bad("unknown entry mode"))?;
        let rest = &body[space + 1..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| bad("entry name not terminated"))?;
        let name = std::str::from_utf8(&rest[..nul]).map_err(|_| bad("entry name is not UTF-8"))?;
        let id_bytes: [u8; ObjectId::LEN] = rest
            .get(nul + 1..nul + 1 + ObjectId::LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| bad("truncated entry id"))?;
        entries.push(TreeEntry::new(name, mode, ObjectId::from_bytes(id_bytes))?);
        body = &rest[nul + 1 + ObjectId::LEN..];
    }
    let sorted = entries
        .windows(2)
        .all(|w| w[0].name.as_bytes() < w[1].name.as_bytes());
    if !sorted {
        return Err(bad("entries are not strictly sorted by name"));
    }
    Tree::from_entries(entries)
}

fn encode_commit(commit: &Commit) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("tree {}\n", commit.tree));
    for parent in &commit.parents {
        out.push_str(&format!("parent {parent}\n"));
    }
    out.push_str(&format!("author {}\n", format_signature(&commit.author)));
    out.push_str(&format!("committer {}\n", format_signature(&commit.committer)));
    out.push('\n');
    out.push_str(&commit.message);
    out.into_bytes()
}

fn decode_commit(body: &[u8]) -> Result<Commit, StoreError> {
    let kind = ObjectKind::Commit;
    let (headers, message) = split_headers(kind, body)?;
    let mut lines = headers.iter().peekable();

    let tree = expect_header(kind, lines.next(), "tree").and_then(|v| parse_id(kind, v))?;
    let mut parents = Vec::new();
    while let Some(value) = lines.peek().and_then(|l| l.strip_prefix("parent ")) {
        parents.push(parse_id(kind, value)?);
        lines.next();
    }
    let author = expect_header(kind, lines.next(), "author").and_then(|v| parse_signature(kind, v))?;
    let committer =
        expect_header(kind, lines.next(), "committer").and_then(|v| parse_signature(kind, v))?;
    if let Some(extra) = lines.next() {
        return Err(StoreError::malformed(kind, format!("unexpected header line {extra:?}")));
    }
    Ok(Commit {
        tree,
        parents,
        author,
        committer,
        message,
    })
}

fn encode_tag(tag: &Tag) -> Vec<u8> {
    format!(
        "object {}\ntype {}\ntag {}\ntagger {}\n\n{}",
        tag.target,
        tag.target_kind,
        tag.name,
        format_signature(&tag.tagger),
        tag.message
    )
    .into_bytes()
}

fn decode_tag(body: &[u8]) -> Result<Tag, StoreError> {
    let kind = ObjectKind::Tag;
    let (headers, message) = split_headers(kind, body)?;
    let mut lines = headers.iter();
    let target = expect_header(kind, lines.next(), "object").and_then(|v| parse_id(kind, v))?;
    let target_kind = expect_header(kind, lines.next(), "type").and_then(|v| {
        ObjectKind::from_keyword(v.as_bytes())
            .ok_or_else(|| StoreError::malformed(kind, format!("unknown target type {v:?}")))
    })?;
    let name = expect_header(kind, lines.next(), "tag")?;
    let tagger = expect_header(kind, lines.next(), "tagger").and_then(|v| parse_signature(kind, v))?;
    if let Some(extra) = lines.next() {
        return Err(StoreError::malformed(kind, format!("unexpected header line {extra:?}")));
    }
    Tag::new(name, target, target_kind, tagger, message)
        .map_err(|e| StoreError::malformed(kind, e.to_string()))
}

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// Split a commit/tag body into header lines and the message.
fn split_headers(kind: ObjectKind, body: &[u8]) -> Result<(Vec<String>, String), StoreError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| StoreError::malformed(kind, "body is not UTF-8"))?;
    let (head, message) = text
        .split_once("\n\n")
        .ok_or_else(|| StoreError::malformed(kind, "missing blank line before message"))?;
    let headers = head.split('\n').map(str::to_owned).collect();
    Ok((headers, message.to_owned()))
}

fn expect_header<'a>(
    kind: ObjectKind,
    line: Option<&'a String>,
    key: &str,
) -> Result<&'a str, StoreError> {
    line.and_then(|l| l.strip_prefix(key))
        .and_then(|l| l.strip_prefix(' '))
        .ok_or_else(|| StoreError::malformed(kind, format!("expected `{key}` header")))
}

fn parse_id(kind: ObjectKind, value: &str) -> Result<ObjectId, StoreError> {
    // Canonical encodings always use lowercase hex.
    if value.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(StoreError::malformed(kind, format!("non-canonical id {value:?}")));
    }
    value
        .parse()
        .map_err(|e: crate::types::OidParseError| StoreError::malformed(kind, e.to_string()))
}

/// Format a signature as `<name> <<email>> <seconds> <±hhmm>`.
#[must_use]
pub fn format_signature(sig: &Signature) -> String {
    let sign = if sig.tz_offset_minutes < 0 { '-' } else { '+' };
    let offset = sig.tz_offset_minutes.unsigned_abs();
    format!(
        "{} <{}> {} {sign}{:02}{:02}",
        sig.name,
        sig.email,
        sig.timestamp,
        offset / 60,
        offset % 60
    )
}

fn parse_signature(kind: ObjectKind, value: &str) -> Result<Signature, StoreError> {
    let bad = |reason: &str| StoreError::malformed(kind, format!("signature {value:?}: {reason}"));
    let open = value.find(" <").ok_or_else(|| bad("missing email"))?;
    let close = value[open..]
        .find("> ")
        .map(|i| open + i)
        .ok_or_else(|| bad("unterminated email"))?;
    let name = &value[..open];
    let email = &value[open + 2..close];
    let (ts, tz) = value[close + 2..]
        .split_once(' ')
        .ok_or_else(|| bad("missing timezone"))?;
    let timestamp: i64 = ts.parse().map_err(|_| bad("invalid timestamp"))?;
    let tz = tz.as_bytes();
    if tz.len() != 5 || !matches!(tz[0], b'+' | b'-') || !tz[1..].iter().all(u8::is_ascii_digit) {
        return Err(bad("invalid timezone"));
    }
    let digit = |i: usize| i32::from(tz[i] - b'0');
    let hours = digit(1) * 10 + digit(2);
    let minutes = digit(3) * 10 + digit(4);
    if minutes >= 60 {
        return Err(bad("invalid timezone minutes"));
    }
    let mut offset = hours * 60 + minutes;
    if tz[0] == b'-' {
        offset = -offset;
    }
    Signature::new(name, email, timestamp, offset).map_err(|e| bad(&e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(ts: i64, tz: i32) -> Signature {
        Signature::new("Ann Example", "ann@example.com", ts, tz).unwrap()
    }

    fn oid(b: u8) -> ObjectId {
        ObjectId::from_bytes([b; 32])
    }

    fn roundtrip(object: &Object) -> Object {
        let body = encode_body(object);
        decode_body(object.kind(), &body).unwrap()
    }

    #[test]
    fn frame_and_unframe() {
        let framed = frame(ObjectKind::Blob, b"hello");
        assert_eq!(&framed[..7], b"blob 5\0");
        let (kind, body) = unframe(&framed).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(body, b"hello");
        assert_eq!(hash_frame(&framed), hash_object(ObjectKind::Blob, b"hello"));
    }

    #[test]
    fn unframe_rejects_length_mismatch() {
        assert!(unframe(b"blob 4\0hello").is_err());
        assert!(unframe(b"blob 05\0hello").is_err());
        assert!(unframe(b"blob5hello").is_err());
        assert!(unframe(b"sock 5\0hello").is_err());
    }

    #[test]
    fn kind_is_part_of_identity() {
        assert_ne!(
            hash_object(ObjectKind::Blob, b""),
            hash_object(ObjectKind::Tree, b"")
        );
    }

    #[test]
    fn tree_roundtrip_and_order() {
        let tree = Tree::from_entries(vec![
            TreeEntry::new("b.txt", EntryMode::Blob, oid(1)).unwrap(),
            TreeEntry::new("a", EntryMode::Tree, oid(2)).unwrap(),
            TreeEntry::new("run.sh", EntryMode::BlobExecutable, oid(3)).unwrap(),
        ])
        .unwrap();
        let object = Object::Tree(tree);
        assert_eq!(roundtrip(&object), object);
        let body = encode_body(&object);
        assert!(body.starts_with(b"40000 a\0"));
    }

    #[test]
    fn tree_decode_rejects_unsorted() {
        let mut body = Vec::new();
        for name in ["b", "a"] {
            body.extend_from_slice(b"100644 ");
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&[7; 32]);
        }
        assert!(decode_body(ObjectKind::Tree, &body).is_err());
    }

    #[test]
    fn tree_decode_rejects_truncated_id() {
        let mut body = b"100644 a\0".to_vec();
        body.extend_from_slice(&[1; 10]);
        assert!(decode_body(ObjectKind::Tree, &body).is_err());
    }

    #[test]
    fn commit_roundtrip_with_parents() {
        let object = Object::Commit(Commit {
            tree: oid(1),
            parents: vec![oid(2), oid(3)],
            author: sig(1_700_000_000, 120),
            committer: sig(1_700_000_100, -330),
            message: "merge things\n\nwith a body\n".to_owned(),
        });
        assert_eq!(roundtrip(&object), object);
    }

    #[test]
    fn commit_message_may_contain_blank_lines() {
        let object = Object::Commit(Commit {
            tree: oid(1),
            parents: vec![],
            author: sig(0, 0),
            committer: sig(0, 0),
            message: "a\n\n\nb".to_owned(),
        });
        assert_eq!(roundtrip(&object), object);
    }

    #[test]
    fn commit_encoding_is_stable() {
        let commit = Commit {
            tree: oid(0xaa),
            parents: vec![oid(0xbb)],
            author: sig(5, 90),
            committer: sig(6, -60),
            message: "msg".to_owned(),
        };
        let text = String::from_utf8(encode_body(&Object::Commit(commit))).unwrap();
        let expected = format!(
            "tree {}\nparent {}\nauthor Ann Example <ann@example.com> 5 +0130\n\
             committer Ann Example <ann@example.com> 6 -0100\n\nmsg",
            "aa".repeat(32),
            "bb".repeat(32)
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn commit_decode_rejects_unknown_header() {
        let body = format!(
            "tree {}\nauthor A <a@x> 0 +0000\ncommitter A <a@x> 0 +0000\nextra 1\n\nm",
            "11".repeat(32)
        );
        assert!(decode_body(ObjectKind::Commit, body.as_bytes()).is_err());
    }

    #[test]
    fn commit_decode_rejects_uppercase_ids() {
        let body = format!(
            "tree {}\nauthor A <a@x> 0 +0000\ncommitter A <a@x> 0 +0000\n\nm",
            "AA".repeat(32)
        );
        assert!(decode_body(ObjectKind::Commit, body.as_bytes()).is_err());
    }

    #[test]
    fn tag_roundtrip() {
        let tag = Tag::new("v1.0", oid(9), ObjectKind::Commit, sig(42, 0), "release\n").unwrap();
        let object = Object::Tag(tag);
        assert_eq!(roundtrip(&object), object);
    }

    #[test]
    fn signature_format_parse() {
        let s = sig(-20, -(5 * 60 + 45));
        let text = format_signature(&s);
        assert_eq!(text, "Ann Example <ann@example.com> -20 -0545");
        assert_eq!(parse_signature(ObjectKind::Commit, &text).unwrap(), s);
    }

    #[test]
    fn signature_parse_rejects_garbage() {
        for bad in ["Ann", "Ann <a@x>", "Ann <a@x> x +0000", "Ann <a@x> 1 +00", "Ann <a@x> 1 +0075"] {
            assert!(parse_signature(ObjectKind::Commit, bad).is_err(), "{bad}");
        }
    }
}
