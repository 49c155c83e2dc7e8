use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Stable identifier of a record's logical schema.
///
/// A `TypeHash` is the CRC-32 of a fully-qualified type name. The store
/// records it next to every record and refuses to hand bytes back under a
/// different hash, so a payload is never decoded with the wrong schema.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeHash(u32);

impl TypeHash {
    /// Hash a fully-qualified type name.
    pub fn of(type_name: &str) -> Self {
        Self(crc32fast::hash(type_name.as_bytes()))
    }

    /// Wrap a raw 32-bit value (as read from an index block).
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit value.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Big-endian byte representation, as persisted.
    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Hex-encoded string representation (8 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_be_bytes())
    }

    /// Parse from a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypeError::InvalidLength {
                expected: 4,
                actual: bytes.len(),
            })?;
        Ok(Self(u32::from_be_bytes(arr)))
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({})", self.to_hex())
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<u32> for TypeHash {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<TypeHash> for u32 {
    fn from(hash: TypeHash) -> Self {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_is_deterministic() {
        assert_eq!(TypeHash::of("mudmap.Room"), TypeHash::of("mudmap.Room"));
    }

    #[test]
    fn different_names_produce_different_hashes() {
        assert_ne!(TypeHash::of("mudmap.Room"), TypeHash::of("mudmap.Region"));
    }

    #[test]
    fn of_matches_crc32() {
        assert_eq!(TypeHash::of("abc").raw(), crc32fast::hash(b"abc"));
    }

    #[test]
    fn hex_roundtrip() {
        let hash = TypeHash::of("test");
        let parsed = TypeHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn from_hex_accepts_prefix() {
        assert_eq!(TypeHash::from_hex("0x0000002a").unwrap(), TypeHash::from_raw(42));
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = TypeHash::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn display_is_eight_hex_chars() {
        assert_eq!(format!("{}", TypeHash::from_raw(0xdeadbeef)), "deadbeef");
    }

    #[test]
    fn serde_roundtrip() {
        let hash = TypeHash::of("serde test");
        let json = serde_json::to_string(&hash).unwrap();
        let parsed: TypeHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, parsed);
    }
}
