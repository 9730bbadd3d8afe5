//! ML-DSA-65 (FIPS 204) post-quantum signatures.
//!
//! The signing key is stored as its 32-byte key-generation seed and expanded
//! per signature, keeping the long-lived secret small and easy to wipe.

use ml_dsa::signature::{Signer, Verifier};
use ml_dsa::{EncodedSignature, EncodedVerifyingKey, KeyGen, MlDsa65, B32};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::traits::{Signature as SigTrait, SigningKey as SigningKeyTrait, VerifyKey};

/// ML-DSA-65 parameter sizes (FIPS 204)
pub const ML_DSA_PUBLIC_KEY_LEN: usize = 1952;
pub const ML_DSA_SEED_LEN: usize = 32;
pub const ML_DSA_SIGNATURE_LEN: usize = 3309;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlDsaSignature {
    bytes: Vec<u8>,
}

impl SigTrait for MlDsaSignature {
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        CryptoError::check_length(ML_DSA_SIGNATURE_LEN, bytes.len())?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }
}

/// ML-DSA-65 verification key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlDsaPublicKey {
    bytes: [u8; ML_DSA_PUBLIC_KEY_LEN],
}

impl MlDsaPublicKey {
    fn to_inner(&self) -> Result<ml_dsa::VerifyingKey<MlDsa65>, CryptoError> {
        let encoded: EncodedVerifyingKey<MlDsa65> = self
            .bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(ml_dsa::VerifyingKey::<MlDsa65>::decode(&encoded))
    }
}

impl VerifyKey for MlDsaPublicKey {
    type Signature = MlDsaSignature;

    fn verify(&self, message: &[u8], signature: &Self::Signature) -> Result<(), CryptoError> {
        let vk = self.to_inner()?;

        let encoded: EncodedSignature<MlDsa65> = signature
            .bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        let sig = ml_dsa::Signature::<MlDsa65>::decode(&encoded)
            .ok_or(CryptoError::InvalidSignature)?;

        vk.verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        CryptoError::check_length(ML_DSA_PUBLIC_KEY_LEN, bytes.len())?;
        let mut arr = [0u8; ML_DSA_PUBLIC_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }
}

/// ML-DSA-65 signing key
pub struct MlDsaSecretKey {
    seed: Zeroizing<[u8; ML_DSA_SEED_LEN]>,
    public: MlDsaPublicKey,
}

impl MlDsaSecretKey {
    fn from_seed(seed: Zeroizing<[u8; ML_DSA_SEED_LEN]>) -> Result<Self, CryptoError> {
        let xi: B32 = (*seed).into();
        let keypair = MlDsa65::key_gen_internal(&xi);
        let encoded = keypair.verifying_key().encode();
        let public = MlDsaPublicKey::from_bytes(encoded.as_slice())
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self { seed, public })
    }
}

impl core::fmt::Debug for MlDsaSecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MlDsaSecretKey").finish_non_exhaustive()
    }
}

impl SigningKeyTrait for MlDsaSecretKey {
    type VerifyKey = MlDsaPublicKey;
    type Signature = MlDsaSignature;

    fn generate() -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; ML_DSA_SEED_LEN]);
        OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_seed(seed)
    }

    fn sign(&self, message: &[u8]) -> Result<Self::Signature, CryptoError> {
        let xi: B32 = (*self.seed).into();
        let keypair = MlDsa65::key_gen_internal(&xi);
        let sig = keypair.signing_key().sign(message);
        MlDsaSignature::from_bytes(sig.encode().as_slice())
    }

    fn verify_key(&self) -> Self::VerifyKey {
        self.public.clone()
    }
}
