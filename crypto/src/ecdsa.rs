//! ECDSA over NIST P-256 with SHA-256, the classical signing role.
//!
//! Verification keys travel as 33-byte compressed SEC1 points and signatures
//! as fixed 64-byte `r || s`.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::CryptoError;
use crate::traits::{Signature, SigningKey, VerifyKey};

pub const ECDSA_PUBLIC_KEY_LEN: usize = 33;
pub const ECDSA_SIGNATURE_LEN: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EcdsaSignature {
    bytes: [u8; ECDSA_SIGNATURE_LEN],
}

impl Signature for EcdsaSignature {
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        CryptoError::check_length(ECDSA_SIGNATURE_LEN, bytes.len())?;
        let mut arr = [0u8; ECDSA_SIGNATURE_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EcdsaPublicKey {
    inner: VerifyingKey,
}

impl VerifyKey for EcdsaPublicKey {
    type Signature = EcdsaSignature;

    fn verify(&self, message: &[u8], signature: &Self::Signature) -> Result<(), CryptoError> {
        let sig = P256Signature::from_slice(&signature.bytes)
            .map_err(|_| CryptoError::InvalidSignature)?;
        self.inner
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_encoded_point(true).as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        CryptoError::check_length(ECDSA_PUBLIC_KEY_LEN, bytes.len())?;
        let inner = VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { inner })
    }
}

/// P-256 signing key; the underlying scalar is zeroized on drop.
pub struct EcdsaSecretKey {
    inner: P256SigningKey,
}

impl core::fmt::Debug for EcdsaSecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EcdsaSecretKey").finish_non_exhaustive()
    }
}

impl SigningKey for EcdsaSecretKey {
    type VerifyKey = EcdsaPublicKey;
    type Signature = EcdsaSignature;

    fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            inner: P256SigningKey::random(&mut OsRng),
        })
    }

    fn sign(&self, message: &[u8]) -> Result<Self::Signature, CryptoError> {
        let sig: P256Signature = self
            .inner
            .try_sign(message)
            .map_err(|_| CryptoError::InvalidSignature)?;
        EcdsaSignature::from_bytes(&sig.to_bytes())
    }

    fn verify_key(&self) -> Self::VerifyKey {
        EcdsaPublicKey {
            inner: *self.inner.verifying_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let sk = EcdsaSecretKey::generate().unwrap();
        let message = b"classical ciphertext";
        let sig = sk.sign(message).unwrap();
        assert!(sk.verify_key().verify(message, &sig).is_ok());
    }

    #[test]
    fn test_altered_message_fails() {
        let sk = EcdsaSecretKey::generate().unwrap();
        let mut message = b"classical ciphertext".to_vec();
        let sig = sk.sign(&message).unwrap();
        message[3] ^= 0x80;
        assert!(sk.verify_key().verify(&message, &sig).is_err());
    }

    #[test]
    fn test_public_key_encoding() {
        let sk = EcdsaSecretKey::generate().unwrap();
        let bytes = sk.verify_key().to_bytes();
        assert_eq!(bytes.len(), ECDSA_PUBLIC_KEY_LEN);
        assert!(bytes[0] == 0x02 || bytes[0] == 0x03);
        let decoded = EcdsaPublicKey::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, sk.verify_key());
    }

    #[test]
    fn test_off_curve_key_rejected() {
        let mut bytes = [0xFFu8; ECDSA_PUBLIC_KEY_LEN];
        bytes[0] = 0x02;
        assert_eq!(
            EcdsaPublicKey::from_bytes(&bytes),
            Err(CryptoError::InvalidKey)
        );
    }
}
