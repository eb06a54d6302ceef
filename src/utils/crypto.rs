use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::error::NodeError;

/// A position in the 160 bit hash ring. Ordering follows the big-endian
/// byte order, which equals numeric order on the ring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HashPos([u8; 20]);

impl HashPos {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        HashPos(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// SHA-1 of the given bytes, interpreted big-endian.
pub fn hash(bytes: &[u8]) -> HashPos {
    HashPos(Sha1::digest(bytes).into())
}

/// Circular interval test `x ∈ (a, b]`. The degenerate interval `a == b`
/// covers the whole ring (a single member owns everything).
pub fn in_interval(x: HashPos, a: HashPos, b: HashPos) -> bool {
    if a == b {
        return true;
    }
    if a < b {
        a < x && x <= b
    } else {
        x > a || x <= b
    }
}

impl fmt::Display for HashPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HashPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for HashPos {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)
            .map_err(|e| NodeError::Protocol(format!("invalid ring position {:?}: {}", s, e)))?;
        let bytes: [u8; 20] = raw
            .try_into()
            .map_err(|_| NodeError::Protocol(format!("ring position {:?} is not 160 bits", s)))?;
        Ok(HashPos(bytes))
    }
}

// Positions travel as 40 character hex strings on the wire, both as values
// and as JSON map keys.
impl Serialize for HashPos {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HashPos {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(byte: u8) -> HashPos {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        HashPos::from_bytes(bytes)
    }

    #[test]
    fn hash_matches_sha1_test_vector() {
        assert_eq!(
            hash(b"abc").to_hex(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn interval_without_wrap_is_left_open_right_closed() {
        assert!(!in_interval(pos(10), pos(10), pos(20)));
        assert!(in_interval(pos(11), pos(10), pos(20)));
        assert!(in_interval(pos(20), pos(10), pos(20)));
        assert!(!in_interval(pos(21), pos(10), pos(20)));
    }

    #[test]
    fn interval_wraps_past_zero() {
        assert!(in_interval(pos(250), pos(200), pos(20)));
        assert!(in_interval(pos(5), pos(200), pos(20)));
        assert!(in_interval(pos(20), pos(200), pos(20)));
        assert!(!in_interval(pos(100), pos(200), pos(20)));
        assert!(!in_interval(pos(200), pos(200), pos(20)));
    }

    #[test]
    fn degenerate_interval_covers_the_whole_ring() {
        assert!(in_interval(pos(0), pos(42), pos(42)));
        assert!(in_interval(pos(42), pos(42), pos(42)));
        assert!(in_interval(pos(255), pos(42), pos(42)));
    }

    #[test]
    fn hex_round_trip() {
        let original = hash(b"127.0.0.1:5000");
        let parsed: HashPos = original.to_hex().parse().unwrap();
        assert_eq!(original, parsed);
        assert!("zz".parse::<HashPos>().is_err());
        assert!("abcd".parse::<HashPos>().is_err());
    }
}
