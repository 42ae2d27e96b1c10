//! Keyed hashes used for the challenge responses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest digest any supported algorithm produces.
pub const MAX_DIGEST_LEN: usize = 64;

/// Keyed-hash algorithm announced in `AUTH_TYPE` / `AUTH_HASH_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    #[default]
    HmacSha256,
    HmacSha512,
}

impl HashAlgorithm {
    /// Wire value.
    pub fn code(self) -> u32 {
        match self {
            HashAlgorithm::HmacSha256 => 1,
            HashAlgorithm::HmacSha512 => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(HashAlgorithm::HmacSha256),
            2 => Some(HashAlgorithm::HmacSha512),
            _ => None,
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::HmacSha256 => 32,
            HashAlgorithm::HmacSha512 => 64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::HmacSha256 => "hmac-sha256",
            HashAlgorithm::HmacSha512 => "hmac-sha512",
        }
    }

    /// Start an incremental keyed hash.
    pub fn keyed(self, key: &[u8]) -> KeyedHash {
        match self {
            HashAlgorithm::HmacSha256 => KeyedHash::Sha256(hmac_sha256::HMAC::new(key)),
            HashAlgorithm::HmacSha512 => KeyedHash::Sha512(hmac_sha512::HMAC::new(key)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-progress keyed hash.
pub enum KeyedHash {
    Sha256(hmac_sha256::HMAC),
    Sha512(hmac_sha512::HMAC),
}

impl KeyedHash {
    pub fn update(&mut self, input: &[u8]) {
        match self {
            KeyedHash::Sha256(mac) => mac.update(input),
            KeyedHash::Sha512(mac) => mac.update(input),
        }
    }

    pub fn finalize(self) -> Digest {
        let mut digest = Digest {
            bytes: [0u8; MAX_DIGEST_LEN],
            len: 0,
        };
        match self {
            KeyedHash::Sha256(mac) => {
                let out = mac.finalize();
                digest.bytes[..out.len()].copy_from_slice(&out);
                digest.len = out.len();
            }
            KeyedHash::Sha512(mac) => {
                let out = mac.finalize();
                digest.bytes[..out.len()].copy_from_slice(&out);
                digest.len = out.len();
            }
        }
        digest
    }
}

/// A finished digest.
#[derive(Clone, Copy)]
pub struct Digest {
    bytes: [u8; MAX_DIGEST_LEN],
    len: usize,
}

impl Digest {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Constant-time comparison against received bytes.
    pub fn matches(&self, other: &[u8]) -> bool {
        constant_time_eq(self.as_bytes(), other)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest(<redacted:{} bytes>)", self.len)
    }
}

/// Compare without an early exit on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_one_shot() {
        let mut mac = HashAlgorithm::HmacSha256.keyed(b"key");
        mac.update(b"hello ");
        mac.update(b"world");
        let digest = mac.finalize();
        assert_eq!(
            digest.as_bytes(),
            &hmac_sha256::HMAC::mac(b"hello world", b"key")[..]
        );
    }

    #[test]
    fn sha512_digest_length() {
        let digest = HashAlgorithm::HmacSha512.keyed(b"key").finalize();
        assert_eq!(digest.as_bytes().len(), 64);
    }

    #[test]
    fn codes_roundtrip() {
        for algo in [HashAlgorithm::HmacSha256, HashAlgorithm::HmacSha512] {
            assert_eq!(HashAlgorithm::from_code(algo.code()), Some(algo));
        }
        assert_eq!(HashAlgorithm::from_code(9), None);
    }

    #[test]
    fn constant_time_eq_rules() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn digest_debug_is_redacted() {
        let digest = HashAlgorithm::HmacSha256.keyed(b"key").finalize();
        assert_eq!(format!("{digest:?}"), "Digest(<redacted:32 bytes>)");
    }
}
