//! Versions and versionstamps.

use std::fmt;

/// Logical commit timestamp assigned by the engine.
pub type Version = i64;

/// "No version": the committed version of a transaction that wrote nothing.
pub const INVALID_VERSION: Version = -1;

/// Length of a versionstamp in bytes.
pub const VERSIONSTAMP_LEN: usize = 10;

/// Commit-unique identifier: 8-byte big-endian commit version followed by a
/// 2-byte big-endian batch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Versionstamp([u8; VERSIONSTAMP_LEN]);

impl Versionstamp {
    pub fn new(version: Version, batch_order: u16) -> Self {
        let mut bytes = [0u8; VERSIONSTAMP_LEN];
        bytes[..8].copy_from_slice(&version.to_be_bytes());
        bytes[8..].copy_from_slice(&batch_order.to_be_bytes());
        Self(bytes)
    }

    /// Placeholder written into key/value templates before commit.
    pub fn incomplete() -> Self {
        Self([0xff; VERSIONSTAMP_LEN])
    }

    pub fn from_bytes(bytes: [u8; VERSIONSTAMP_LEN]) -> Self {
        Self(bytes)
    }

    pub fn version(&self) -> Version {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.0[..8]);
        Version::from_be_bytes(raw)
    }

    pub fn batch_order(&self) -> u16 {
        u16::from_be_bytes([self.0[8], self.0[9]])
    }

    pub fn as_bytes(&self) -> &[u8; VERSIONSTAMP_LEN] {
        &self.0
    }

    /// Build a versionstamped key or value operand:
    /// `prefix ++ placeholder ++ suffix ++ u32_le(prefix.len())`.
    pub fn template(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(prefix.len() + VERSIONSTAMP_LEN + suffix.len() + 4);
        out.extend_from_slice(prefix);
        out.extend_from_slice(Self::incomplete().as_bytes());
        out.extend_from_slice(suffix);
        out.extend_from_slice(&(prefix.len() as u32).to_le_bytes());
        out
    }
}

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
