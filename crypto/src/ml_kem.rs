//! ML-KEM-768 (FIPS 203) key encapsulation.
//!
//! The decapsulation key is kept as encoded bytes in a `Zeroizing` buffer and
//! rebuilt on demand, so dropping the key pair wipes it.

use ml_kem::kem::{Decapsulate, DecapsulationKey, Encapsulate, EncapsulationKey};
use ml_kem::{EncodedSizeUser, KemCore, MlKem768, MlKem768Params};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::traits::{KemKeyPair, KemPublicKey};

pub const ML_KEM_PUBLIC_KEY_LEN: usize = 1184;
pub const ML_KEM_SECRET_KEY_LEN: usize = 2400;
pub const ML_KEM_CIPHERTEXT_LEN: usize = 1088;
pub const ML_KEM_SHARED_SECRET_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlKemCiphertext {
    bytes: [u8; ML_KEM_CIPHERTEXT_LEN],
}

impl MlKemCiphertext {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        CryptoError::check_length(ML_KEM_CIPHERTEXT_LEN, bytes.len())?;
        let mut arr = [0u8; ML_KEM_CIPHERTEXT_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// 32-byte shared secret, wiped on drop.
pub struct MlKemSharedSecret {
    bytes: Zeroizing<[u8; ML_KEM_SHARED_SECRET_LEN]>,
}

impl MlKemSharedSecret {
    pub fn as_bytes(&self) -> &[u8; ML_KEM_SHARED_SECRET_LEN] {
        &self.bytes
    }
}

impl core::fmt::Debug for MlKemSharedSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MlKemSharedSecret").finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlKemPublicKey {
    bytes: [u8; ML_KEM_PUBLIC_KEY_LEN],
}

impl MlKemPublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn to_inner(&self) -> EncapsulationKey<MlKem768Params> {
        EncapsulationKey::<MlKem768Params>::from_bytes(&self.bytes.into())
    }
}

impl KemPublicKey for MlKemPublicKey {
    type Ciphertext = MlKemCiphertext;
    type SharedSecret = MlKemSharedSecret;

    fn encapsulate(&self) -> Result<(Self::Ciphertext, Self::SharedSecret), CryptoError> {
        let (ciphertext, shared) = self
            .to_inner()
            .encapsulate(&mut OsRng)
            .map_err(|_| CryptoError::EncapsulationFailed)?;

        let ciphertext = MlKemCiphertext::from_bytes(&ciphertext[..])?;
        let mut secret = Zeroizing::new([0u8; ML_KEM_SHARED_SECRET_LEN]);
        secret.copy_from_slice(&shared[..]);
        Ok((ciphertext, MlKemSharedSecret { bytes: secret }))
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        CryptoError::check_length(ML_KEM_PUBLIC_KEY_LEN, bytes.len())?;
        let mut arr = [0u8; ML_KEM_PUBLIC_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }
}

pub struct MlKemKeyPair {
    secret: Zeroizing<[u8; ML_KEM_SECRET_KEY_LEN]>,
    public: MlKemPublicKey,
}

impl core::fmt::Debug for MlKemKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MlKemKeyPair")
            .field("public", &hex::encode(&self.public.bytes[..8]))
            .finish_non_exhaustive()
    }
}

impl KemKeyPair for MlKemKeyPair {
    type PublicKey = MlKemPublicKey;
    type Ciphertext = MlKemCiphertext;
    type SharedSecret = MlKemSharedSecret;

    fn generate() -> Result<Self, CryptoError> {
        let (dk, ek) = MlKem768::generate(&mut OsRng);
        let dk_bytes = dk.as_bytes();
        let ek_bytes = ek.as_bytes();

        CryptoError::check_length(ML_KEM_SECRET_KEY_LEN, dk_bytes.len())
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let mut secret = Zeroizing::new([0u8; ML_KEM_SECRET_KEY_LEN]);
        secret.copy_from_slice(&dk_bytes[..]);
        let public = MlKemPublicKey::from_bytes(&ek_bytes[..])
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        Ok(Self { secret, public })
    }

    fn decapsulate(
        &self,
        ciphertext: &Self::Ciphertext,
    ) -> Result<Self::SharedSecret, CryptoError> {
        let dk = DecapsulationKey::<MlKem768Params>::from_bytes(&(*self.secret).into());
        let shared = dk
            .decapsulate(&ciphertext.bytes.into())
            .map_err(|_| CryptoError::DecapsulationFailed)?;

        let mut secret = Zeroizing::new([0u8; ML_KEM_SHARED_SECRET_LEN]);
        secret.copy_from_slice(&shared[..]);
        Ok(MlKemSharedSecret { bytes: secret })
    }

    fn public_key(&self) -> Self::PublicKey {
        self.public.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encapsulate_decapsulate_agree() {
        let keypair = MlKemKeyPair::generate().unwrap();
        let (ciphertext, sent) = keypair.public_key().encapsulate().unwrap();
        let recovered = keypair.decapsulate(&ciphertext).unwrap();
        assert_eq!(sent.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn test_wrong_key_recovers_different_secret() {
        let alice = MlKemKeyPair::generate().unwrap();
        let mallory = MlKemKeyPair::generate().unwrap();
        let (ciphertext, sent) = alice.public_key().encapsulate().unwrap();
        // implicit rejection: decapsulation succeeds but yields an unrelated secret
        let recovered = mallory.decapsulate(&ciphertext).unwrap();
        assert_ne!(sent.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn test_parameter_sizes() {
        let keypair = MlKemKeyPair::generate().unwrap();
        assert_eq!(keypair.public_key().to_bytes().len(), ML_KEM_PUBLIC_KEY_LEN);
        let (ciphertext, _) = keypair.public_key().encapsulate().unwrap();
        assert_eq!(ciphertext.as_bytes().len(), ML_KEM_CIPHERTEXT_LEN);
    }

    #[test]
    fn test_public_key_length_checked() {
        let err = MlKemPublicKey::from_bytes(&[0u8; 1952]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidLength {
                expected: ML_KEM_PUBLIC_KEY_LEN,
                actual: 1952
            }
        );
    }
}
