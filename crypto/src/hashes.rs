use sha2::{Digest, Sha256};

/// Bytes of digest shown by [`fingerprint`].
pub const FINGERPRINT_LEN: usize = 8;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Short hex tag for logging public keys and session keys without revealing them.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(&sha256(data)[..FINGERPRINT_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_is_digest_prefix() {
        let fp = fingerprint(b"abc");
        assert_eq!(fp.len(), FINGERPRINT_LEN * 2);
        assert_eq!(fp, "ba7816bf8f01cfea");
    }
}
