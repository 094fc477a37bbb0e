//! Session data: the mutable value object held per session.
//!
//! [`SessionData`] round-trips through serde (JSON for the file backend,
//! anything serde-compatible for callers). The [`Roles`] sequence and the
//! [`Items`] extension map additionally carry a compact binary encoding of
//! their own, used by size-sensitive backends that store fields
//! individually (see [`crate::store::RedisStore`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::token::TokenSource;

/// A tagged extension value.
///
/// Extension entries are tagged variants rather than an untyped "any" bag
/// so the binary encoding stays deterministic across languages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, Value>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

// Binary tags. Changing these breaks stored payloads.
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_STR: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_MAP: u8 = 5;

/// Ordered role sequence with set membership semantics.
///
/// Order is preserved for serialization; membership checks ignore it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(pub Vec<String>);

impl Roles {
    /// Check role membership.
    pub fn contains(&self, role: &str) -> bool {
        self.0.iter().any(|r| r == role)
    }

    /// Compact binary encoding: u32-LE count, then u16-LE length + UTF-8
    /// bytes per role.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        put_u32(&mut buf, self.0.len())?;
        for role in &self.0 {
            put_str16(&mut buf, role)?;
        }
        Ok(buf)
    }

    /// Decode the compact binary encoding.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let count = r.u32()?;
        let mut roles = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            roles.push(r.str16()?);
        }
        r.finish()?;
        Ok(Roles(roles))
    }
}

impl From<Vec<String>> for Roles {
    fn from(v: Vec<String>) -> Self {
        Roles(v)
    }
}

/// Open extension mapping from string keys to tagged values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Items(pub BTreeMap<String, Value>);

impl Items {
    /// Look up an extension entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert or replace an extension entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove one extension entry. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    /// Compact binary encoding: u32-LE count, then per entry a u16-LE
    /// length-prefixed key followed by a tagged value.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        encode_map(&mut buf, &self.0)?;
        Ok(buf)
    }

    /// Decode the compact binary encoding.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let map = decode_map(&mut r)?;
        r.finish()?;
        Ok(Items(map))
    }
}

fn encode_map(buf: &mut Vec<u8>, map: &BTreeMap<String, Value>) -> Result<()> {
    put_u32(buf, map.len())?;
    for (key, value) in map {
        put_str16(buf, key)?;
        encode_value(buf, value)?;
    }
    Ok(())
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Bool(v) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*v));
        }
        Value::Int(v) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(v) => {
            buf.push(TAG_STR);
            put_u32(buf, v.len())?;
            buf.extend_from_slice(v.as_bytes());
        }
        Value::Bytes(v) => {
            buf.push(TAG_BYTES);
            put_u32(buf, v.len())?;
            buf.extend_from_slice(v);
        }
        Value::Map(v) => {
            buf.push(TAG_MAP);
            encode_map(buf, v)?;
        }
    }
    Ok(())
}

fn decode_map(r: &mut Reader<'_>) -> Result<BTreeMap<String, Value>> {
    let count = r.u32()?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = r.str16()?;
        let value = decode_value(r)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn decode_value(r: &mut Reader<'_>) -> Result<Value> {
    match r.u8()? {
        TAG_BOOL => Ok(Value::Bool(r.u8()? != 0)),
        TAG_INT => Ok(Value::Int(r.i64()?)),
        TAG_STR => {
            let len = r.u32()? as usize;
            let bytes = r.take(len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| Error::Serialization(format!("invalid UTF-8 in value: {e}")))?;
            Ok(Value::Str(s.to_string()))
        }
        TAG_BYTES => {
            let len = r.u32()? as usize;
            Ok(Value::Bytes(r.take(len)?.to_vec()))
        }
        TAG_MAP => Ok(Value::Map(decode_map(r)?)),
        tag => Err(Error::Serialization(format!("unknown value tag {tag}"))),
    }
}

fn put_u32(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Serialization("length exceeds u32".to_string()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_str16(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::Serialization(format!("string too long for u16 length: {} bytes", s.len())))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Bounds-checked byte reader for the binary codecs.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| Error::Serialization("truncated payload".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    fn str16(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| Error::Serialization(format!("invalid UTF-8: {e}")))
    }

    fn finish(&self) -> Result<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(Error::Serialization(format!(
                "{} trailing bytes after payload",
                self.buf.len() - self.pos
            )))
        }
    }
}

/// Mutable per-session record: identity, roles, and extension fields bound
/// to an opaque token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Owning token. Empty until assigned by the caller or minted by a
    /// store on save.
    #[serde(default)]
    pub token: String,

    /// Numeric identity.
    #[serde(default)]
    pub id: u64,

    /// Account name.
    #[serde(default)]
    pub account: String,

    /// Application-defined state flags.
    #[serde(default)]
    pub state: u16,

    /// Ordered role sequence.
    #[serde(default)]
    pub roles: Roles,

    /// Open extension mapping.
    #[serde(default)]
    pub items: Items,
}

impl SessionData {
    /// Create an empty record with no token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty record bound to an existing token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Mint a fresh token, adopt it, and return it.
    pub fn regenerate(&mut self, tokens: &dyn TokenSource) -> String {
        self.token = tokens.generate();
        self.token.clone()
    }

    /// Reset every field to its zero value, the token included.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Check role membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Look up an extension entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    /// Insert or replace an extension entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.items.set(key, value);
    }

    /// Remove one extension entry.
    pub fn remove(&mut self, key: &str) {
        self.items.remove(key);
    }
}
