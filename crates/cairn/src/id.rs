//! Content identifiers for blocks and file recipes.
//!
//! A `ContentId` is a 160-bit BLAKE3 digest (the first 20 bytes of its
//! extendable output), written as 40 lowercase hex characters. Blocks and
//! recipes share this family; archive manifests use SHA-256 instead.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Length of a content identifier in bytes.
pub const ID_BYTES: usize = 20;

/// Length of a content identifier in hex characters.
pub const ID_HEX_LEN: usize = ID_BYTES * 2;

/// Newtype for the 160-bit digests used as block and recipe IDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ContentId([u8; ID_BYTES]);

impl ContentId {
    /// Create a ContentId by hashing the given data.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Parse a lowercase hex identifier.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        if !is_valid_hex(hex) {
            return Err(Error::MalformedIdentity(hex.to_string()));
        }
        let mut bytes = [0u8; ID_BYTES];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|_| Error::MalformedIdentity(hex.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Get the hex-encoded representation of this ID.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Whether `hex` has the shape of a content identifier.
pub fn is_valid_hex(hex: &str) -> bool {
    hex.len() == ID_HEX_LEN
        && hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl From<[u8; ID_BYTES]> for ContentId {
    fn from(value: [u8; ID_BYTES]) -> Self {
        Self(value)
    }
}

impl FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher producing a `ContentId`.
///
/// Used for the running whole-file digest while a stream is chunked.
#[derive(Clone, Default)]
pub struct ContentHasher(blake3::Hasher);

impl ContentHasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.0.update(data);
        self
    }

    pub fn finalize(&self) -> ContentId {
        let mut out = [0u8; ID_BYTES];
        self.0.finalize_xof().fill(&mut out);
        ContentId(out)
    }
}
