//! X25519 ECIES, the classical asymmetric encryption role.
//!
//! A fresh ephemeral X25519 key is agreed with the recipient's static key,
//! HKDF-SHA-256 expands the shared point into an AES-256-GCM key, and the
//! output is `ephemeral_public || nonce || aead_ciphertext`.

use aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::traits::{EncryptionKeyPair, EncryptionPublicKey};

pub const ECIES_PUBLIC_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// Bytes added to every plaintext by `encrypt`.
pub const ECIES_OVERHEAD: usize = ECIES_PUBLIC_KEY_LEN + NONCE_LEN + TAG_LEN;

const HKDF_INFO: &[u8] = b"qssl-ecies-x25519-aes256gcm-v1";

fn derive_key(
    shared: &[u8; 32],
    ephemeral: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<Aes256Gcm, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral);
    salt[32..].copy_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(HKDF_INFO, key.as_mut_slice())
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CryptoError::InvalidKey)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EciesPublicKey {
    bytes: [u8; ECIES_PUBLIC_KEY_LEN],
}

impl EncryptionPublicKey for EciesPublicKey {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(self.bytes));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey);
        }

        let cipher = derive_key(shared.as_bytes(), ephemeral_public.as_bytes(), &self.bytes)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: ephemeral_public.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(ECIES_OVERHEAD + plaintext.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        CryptoError::check_length(ECIES_PUBLIC_KEY_LEN, bytes.len())?;
        let mut arr = [0u8; ECIES_PUBLIC_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }
}

/// Static X25519 key pair; `StaticSecret` zeroizes itself on drop.
pub struct EciesKeyPair {
    secret: StaticSecret,
    public: EciesPublicKey,
}

impl core::fmt::Debug for EciesKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EciesKeyPair")
            .field("public", &hex::encode(self.public.bytes))
            .finish_non_exhaustive()
    }
}

impl EncryptionKeyPair for EciesKeyPair {
    type PublicKey = EciesPublicKey;

    fn generate() -> Result<Self, CryptoError> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = EciesPublicKey {
            bytes: PublicKey::from(&secret).to_bytes(),
        };
        Ok(Self { secret, public })
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if ciphertext.len() < ECIES_OVERHEAD {
            return Err(CryptoError::DecryptionFailed(format!(
                "ciphertext shorter than {} byte envelope",
                ECIES_OVERHEAD
            )));
        }
        let (ephemeral_bytes, rest) = ciphertext.split_at(ECIES_PUBLIC_KEY_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let mut ephemeral = [0u8; ECIES_PUBLIC_KEY_LEN];
        ephemeral.copy_from_slice(ephemeral_bytes);
        let shared = self.secret.diffie_hellman(&PublicKey::from(ephemeral));
        if !shared.was_contributory() {
            return Err(CryptoError::DecryptionFailed(
                "non-contributory ephemeral key".to_string(),
            ));
        }

        let cipher = derive_key(shared.as_bytes(), &ephemeral, &self.public.bytes)?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &ephemeral,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }

    fn public_key(&self) -> Self::PublicKey {
        self.public.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let keypair = EciesKeyPair::generate().unwrap();
        let seed = [0x5Au8; 32];
        let ciphertext = keypair.public_key().encrypt(&seed).unwrap();
        assert_eq!(ciphertext.len(), seed.len() + ECIES_OVERHEAD);
        let recovered = keypair.decrypt(&ciphertext).unwrap();
        assert_eq!(recovered.as_slice(), &seed);
    }

    #[test]
    fn test_fresh_ephemeral_per_call() {
        let keypair = EciesKeyPair::generate().unwrap();
        let a = keypair.public_key().encrypt(b"seed").unwrap();
        let b = keypair.public_key().encrypt(b"seed").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_recipient_cannot_decrypt() {
        let alice = EciesKeyPair::generate().unwrap();
        let mallory = EciesKeyPair::generate().unwrap();
        let ciphertext = alice.public_key().encrypt(b"seed").unwrap();
        assert!(matches!(
            mallory.decrypt(&ciphertext),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let keypair = EciesKeyPair::generate().unwrap();
        let mut ciphertext = keypair.public_key().encrypt(b"seed").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(keypair.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let keypair = EciesKeyPair::generate().unwrap();
        assert!(keypair.decrypt(&[0u8; ECIES_OVERHEAD - 1]).is_err());
    }
}
