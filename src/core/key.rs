use crate::codec::{WireReader, WireWriter};
use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use uuid::Uuid;

/// Identity of a persistent object.
///
/// Keys are written with the wire codec, so two equal keys always produce
/// equal bytes; the identity map relies on this.
pub trait Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Fresh key for a brand-new object.
    fn generate() -> Self;

    fn encode(&self, writer: &mut WireWriter<'_>) -> Result<()>;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self>;

    /// Null keys are rejected wherever a stored object is addressed.
    fn is_null(&self) -> bool {
        false
    }
}

/// 128-bit random identifier, the default entity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(Uuid);

impl Identity {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for Identity {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Key for Identity {
    fn generate() -> Self {
        Self::new()
    }

    fn encode(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.write_guid(&self.0)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        reader.read_guid().map(Self)
    }

    fn is_null(&self) -> bool {
        self.0.is_nil()
    }
}

/// Opaque optimistic-concurrency token.
///
/// The core only carries it; data mappers issue and compare it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcurrencyStamp(Vec<u8>);

impl ConcurrencyStamp {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// 8-byte little-endian row version.
    pub fn from_version(version: u64) -> Self {
        Self(version.to_le_bytes().to_vec())
    }

    pub fn as_version(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.0.as_slice().try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
