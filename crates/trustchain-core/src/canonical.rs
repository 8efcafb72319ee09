//! Deterministic CBOR for record headers.
//!
//! The signature and the record id are computed over these bytes, so every
//! node must produce exactly the same encoding:
//! - maps use small integer keys written in ascending order
//! - text-keyed maps are ordered by their encoded key bytes
//! - integers use the shortest head
//! - lengths are always definite
//! - sets are written in ascending order

use crate::meta::{EntityMeta, ParentLink};
use crate::record::{Record, RecordHeader};
use crate::rights::Rights;

mod header_keys {
    pub const FORMAT: u64 = 0;
    pub const KIND: u64 = 1;
    pub const META: u64 = 2;
    pub const AUTHOR: u64 = 3;
    pub const TIMESTAMP: u64 = 4;
    pub const CONTENT_DIGEST: u64 = 5;
}

mod meta_keys {
    pub const ID: u64 = 0;
    pub const TYPE: u64 = 1;
    pub const PARENT: u64 = 2;
    pub const ALLOWED_CHILDREN: u64 = 3;
    pub const VERSION: u64 = 4;
    pub const PREVIOUS_VERSION: u64 = 5;
    pub const MERGE_VERSIONS: u64 = 6;
    pub const IMMUTABLE: u64 = 7;
    pub const RIGHTS: u64 = 8;
    pub const CONTENT_KEY: u64 = 9;
}

mod rights_keys {
    pub const READ: u64 = 0;
    pub const WRITE: u64 = 1;
    pub const ALLOW_READ: u64 = 2;
    pub const ALLOW_WRITE: u64 = 3;
    pub const INHERIT_READ: u64 = 4;
    pub const INHERIT_WRITE: u64 = 5;
}

const MAJOR_UINT: u8 = 0;
const MAJOR_NEGINT: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;

const SIMPLE_FALSE: u8 = 0xf4;
const SIMPLE_TRUE: u8 = 0xf5;
const SIMPLE_NULL: u8 = 0xf6;

/// Encode a record header to canonical bytes.
pub fn canonical_header_bytes(header: &RecordHeader) -> Vec<u8> {
    let mut enc = Encoder::default();
    enc.map_len(6);
    enc.key(header_keys::FORMAT);
    enc.uint(header.format as u64);
    enc.key(header_keys::KIND);
    enc.uint(header.kind.to_u8() as u64);
    enc.key(header_keys::META);
    enc.meta(&header.meta);
    enc.key(header_keys::AUTHOR);
    enc.bytes(header.author.as_bytes());
    enc.key(header_keys::TIMESTAMP);
    enc.int(header.timestamp);
    enc.key(header_keys::CONTENT_DIGEST);
    enc.bytes(header.content_digest.as_bytes());
    enc.buf
}

/// The message a record signature covers: header || payload.
pub fn signed_message(header: &RecordHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = canonical_header_bytes(header);
    buf.extend_from_slice(payload);
    buf
}

/// Bytes the record id is computed over: header || payload || signature.
pub fn canonical_bytes(record: &Record) -> Vec<u8> {
    let mut buf = signed_message(&record.header, &record.payload);
    buf.extend_from_slice(record.signature.as_bytes());
    buf
}

#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn head(&mut self, major: u8, n: u64) {
        let mt = major << 5;
        match n {
            0..=23 => self.buf.push(mt | n as u8),
            24..=0xff => {
                self.buf.push(mt | 24);
                self.buf.push(n as u8);
            }
            0x100..=0xffff => {
                self.buf.push(mt | 25);
                self.buf.extend_from_slice(&(n as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.buf.push(mt | 26);
                self.buf.extend_from_slice(&(n as u32).to_be_bytes());
            }
            _ => {
                self.buf.push(mt | 27);
                self.buf.extend_from_slice(&n.to_be_bytes());
            }
        }
    }

    fn uint(&mut self, n: u64) {
        self.head(MAJOR_UINT, n);
    }

    fn int(&mut self, n: i64) {
        if n >= 0 {
            self.head(MAJOR_UINT, n as u64);
        } else {
            // -1 encodes as 0, -2 as 1, ...
            self.head(MAJOR_NEGINT, !(n as u64));
        }
    }

    fn key(&mut self, k: u64) {
        self.uint(k);
    }

    fn bytes(&mut self, b: &[u8]) {
        self.head(MAJOR_BYTES, b.len() as u64);
        self.buf.extend_from_slice(b);
    }

    fn text(&mut self, s: &str) {
        self.head(MAJOR_TEXT, s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn bool(&mut self, b: bool) {
        self.buf.push(if b { SIMPLE_TRUE } else { SIMPLE_FALSE });
    }

    fn null(&mut self) {
        self.buf.push(SIMPLE_NULL);
    }

    fn array_len(&mut self, n: usize) {
        self.head(MAJOR_ARRAY, n as u64);
    }

    fn map_len(&mut self, n: usize) {
        self.head(MAJOR_MAP, n as u64);
    }

    fn byte_list<'a>(&mut self, items: impl ExactSizeIterator<Item = &'a [u8]>) {
        self.array_len(items.len());
        for item in items {
            self.bytes(item);
        }
    }

    /// Text-keyed map of byte strings, ordered by encoded key.
    fn named_keys<'a>(&mut self, entries: impl Iterator<Item = (&'a String, &'a [u8])>) {
        let mut encoded: Vec<(Vec<u8>, &[u8])> = entries
            .map(|(name, value)| {
                let mut k = Encoder::default();
                k.text(name);
                (k.buf, value)
            })
            .collect();
        encoded.sort_by(|a, b| a.0.cmp(&b.0));

        self.map_len(encoded.len());
        for (key, value) in encoded {
            self.buf.extend_from_slice(&key);
            self.bytes(value);
        }
    }

    fn parent(&mut self, parent: Option<&ParentLink>) {
        match parent {
            Some(link) => {
                self.array_len(2);
                self.bytes(link.id.as_bytes());
                self.text(link.entity_type.as_str());
            }
            None => self.null(),
        }
    }

    fn rights(&mut self, rights: &Rights) {
        self.map_len(6);
        self.key(rights_keys::READ);
        self.byte_list(rights.read.iter().map(|k| &k.as_bytes()[..]));
        self.key(rights_keys::WRITE);
        self.byte_list(rights.write.iter().map(|k| &k.as_bytes()[..]));
        self.key(rights_keys::ALLOW_READ);
        self.named_keys(rights.allow_read.iter().map(|(n, k)| (n, &k.as_bytes()[..])));
        self.key(rights_keys::ALLOW_WRITE);
        self.named_keys(rights.allow_write.iter().map(|(n, k)| (n, &k.as_bytes()[..])));
        self.key(rights_keys::INHERIT_READ);
        self.bool(rights.inherit_read);
        self.key(rights_keys::INHERIT_WRITE);
        self.bool(rights.inherit_write);
    }

    fn meta(&mut self, meta: &EntityMeta) {
        self.map_len(10);
        self.key(meta_keys::ID);
        self.bytes(meta.id.as_bytes());
        self.key(meta_keys::TYPE);
        self.text(meta.entity_type.as_str());
        self.key(meta_keys::PARENT);
        self.parent(meta.parent.as_ref());
        self.key(meta_keys::ALLOWED_CHILDREN);
        self.array_len(meta.allowed_children.len());
        for child in &meta.allowed_children {
            self.text(child.as_str());
        }
        self.key(meta_keys::VERSION);
        self.bytes(meta.version.as_bytes());
        self.key(meta_keys::PREVIOUS_VERSION);
        match &meta.previous_version {
            Some(v) => self.bytes(v.as_bytes()),
            None => self.null(),
        }
        self.key(meta_keys::MERGE_VERSIONS);
        self.byte_list(meta.merge_versions.iter().map(|v| &v.as_bytes()[..]));
        self.key(meta_keys::IMMUTABLE);
        self.bool(meta.immutable);
        self.key(meta_keys::RIGHTS);
        self.rights(&meta.rights);
        self.key(meta_keys::CONTENT_KEY);
        match &meta.content_key {
            Some(k) => self.bytes(k.as_bytes()),
            None => self.null(),
        }
    }
}
