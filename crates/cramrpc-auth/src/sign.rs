//! Signing and verification of a parameter area.
//!
//! The signer appends its challenge, the signed size and a zero-filled
//! response record, hashes the whole area followed by the two challenges,
//! then overwrites the response record with the digest. The verifier
//! hashes the same bytes with the response data read as zeros.

use cramrpc_wire::ids::PARAM_AUTH_SIGNED_SIZE;
use cramrpc_wire::{record_len, Region};

use crate::error::{AuthError, Result};
use crate::hash::{Digest, HashAlgorithm, MAX_DIGEST_LEN};

const ZEROS: [u8; MAX_DIGEST_LEN] = [0u8; MAX_DIGEST_LEN];

/// Ids and challenges that make up one signature.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Signature<'a> {
    pub hash: HashAlgorithm,
    pub key: &'a [u8],
    /// Id of the record that carries the digest.
    pub response_id: u32,
    /// Challenge hashed first.
    pub first: &'a [u8],
    /// Challenge hashed second.
    pub second: &'a [u8],
}

impl Signature<'_> {
    /// Append `challenge` under `challenge_id`, then sign the area.
    pub fn append(&self, region: &mut Region, challenge_id: u32, challenge: &[u8]) -> Result<()> {
        let digest_len = self.hash.digest_len();
        region.set_bytes(challenge_id, challenge)?;
        let signed = region.len() + record_len(4) + record_len(digest_len);
        region.set_u32(PARAM_AUTH_SIGNED_SIZE, signed as u32)?;
        region.set(self.response_id, None, digest_len)?;

        let digest = self.digest(region.params(), None);
        region.set(self.response_id, Some(digest.as_bytes()), digest_len)?;
        Ok(())
    }

    /// Check the digest carried in `region`.
    pub fn verify(&self, region: &Region) -> Result<()> {
        let signed = match region.get(PARAM_AUTH_SIGNED_SIZE) {
            Some(raw) if raw.len() == 4 => region.get_u32(PARAM_AUTH_SIGNED_SIZE) as usize,
            _ => return Err(AuthError::MissingParam("AUTH_SIGNED_SIZE")),
        };
        if signed != region.len() {
            return Err(AuthError::SignedSize {
                signed,
                len: region.len(),
            });
        }
        let record = region
            .find(self.response_id)
            .ok_or(AuthError::MissingParam("AUTH_RESPONSE"))?;
        if record.data.len() != self.hash.digest_len() {
            return Err(AuthError::SignatureMismatch);
        }

        let digest = self.digest(region.params(), Some(record.data_range()));
        if digest.matches(record.data) {
            Ok(())
        } else {
            Err(AuthError::SignatureMismatch)
        }
    }

    fn digest(&self, params: &[u8], blank: Option<std::ops::Range<usize>>) -> Digest {
        let mut mac = self.hash.keyed(self.key);
        match blank {
            Some(range) => {
                mac.update(&params[..range.start]);
                mac.update(&ZEROS[..range.len()]);
                mac.update(&params[range.end..]);
            }
            None => mac.update(params),
        }
        mac.update(self.first);
        mac.update(self.second);
        mac.finalize()
    }
}

#[cfg(test)]
mod tests {
    use cramrpc_wire::ids::{PARAM_AUTH_CLIENT_CHALLENGE, PARAM_AUTH_CLIENT_RESPONSE};

    use super::*;

    fn signature<'a>(key: &'a [u8]) -> Signature<'a> {
        Signature {
            hash: HashAlgorithm::HmacSha256,
            key,
            response_id: PARAM_AUTH_CLIENT_RESPONSE,
            first: b"client-challenge",
            second: b"server-challenge",
        }
    }

    fn signed_region(key: &[u8]) -> Region {
        let mut region = Region::new(0, 512);
        region.set_str(0x2000_0007, "hello").unwrap();
        signature(key)
            .append(&mut region, PARAM_AUTH_CLIENT_CHALLENGE, b"client-challenge")
            .unwrap();
        region
    }

    #[test]
    fn signed_area_verifies() {
        let region = signed_region(b"k");
        assert!(region.validate());
        assert_eq!(
            region.get_u32(PARAM_AUTH_SIGNED_SIZE) as usize,
            region.len()
        );
        signature(b"k").verify(&region).expect("verify");
    }

    #[test]
    fn wrong_key_fails() {
        let region = signed_region(b"k");
        assert!(matches!(
            signature(b"other").verify(&region),
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[test]
    fn tampered_payload_fails() {
        let region = signed_region(b"k");
        let mut bytes = region.params().to_vec();
        // First data byte of the user string.
        bytes[12] ^= 0x20;
        let mut tampered = Region::new(0, 512);
        tampered.load(&bytes).unwrap();
        assert!(signature(b"k").verify(&tampered).is_err());
    }

    #[test]
    fn appended_record_breaks_signed_size() {
        let mut region = signed_region(b"k");
        region.set_u32(0x2000_0008, 1).unwrap();
        assert!(matches!(
            signature(b"k").verify(&region),
            Err(AuthError::SignedSize { .. })
        ));
    }

    #[test]
    fn missing_signature_fields() {
        let mut region = Region::new(0, 64);
        region.set_u32(0x2000_0001, 1).unwrap();
        assert!(matches!(
            signature(b"k").verify(&region),
            Err(AuthError::MissingParam(_))
        ));
    }
}
