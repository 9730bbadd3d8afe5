//! Per-endpoint key material and the public keys that cross the wire

use std::fmt;

use crypto::ecdsa::{EcdsaPublicKey, EcdsaSecretKey, ECDSA_PUBLIC_KEY_LEN};
use crypto::ecies::{EciesKeyPair, EciesPublicKey, ECIES_PUBLIC_KEY_LEN};
use crypto::hashes::fingerprint;
use crypto::ml_dsa::{MlDsaPublicKey, MlDsaSecretKey, ML_DSA_PUBLIC_KEY_LEN};
use crypto::ml_kem::{MlKemKeyPair, MlKemPublicKey, ML_KEM_PUBLIC_KEY_LEN};
use crypto::traits::{
    EncryptionKeyPair, EncryptionPublicKey, KemKeyPair, KemPublicKey, SigningKey, VerifyKey,
};

use crate::error::{KeyExchangeError, QsslError, Result};

/// Role of a key pair, in exchange order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Encryption,
    Signing,
    Kem,
    PqSigning,
}

impl KeyRole {
    /// Fixed order in which public keys are transmitted
    pub const EXCHANGE_ORDER: [KeyRole; 4] = [
        KeyRole::Encryption,
        KeyRole::Signing,
        KeyRole::Kem,
        KeyRole::PqSigning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRole::Encryption => "encryption",
            KeyRole::Signing => "signing",
            KeyRole::Kem => "kem",
            KeyRole::PqSigning => "pq-signing",
        }
    }

    /// Label frame preceding this key during the exchange
    pub fn label(&self) -> &'static str {
        match self {
            KeyRole::Encryption => "encryption-public-key",
            KeyRole::Signing => "signing-public-key",
            KeyRole::Kem => "kem-public-key",
            KeyRole::PqSigning => "pq-signing-public-key",
        }
    }

    /// Encoded public key size
    pub fn public_key_len(&self) -> usize {
        match self {
            KeyRole::Encryption => ECIES_PUBLIC_KEY_LEN,
            KeyRole::Signing => ECDSA_PUBLIC_KEY_LEN,
            KeyRole::Kem => ML_KEM_PUBLIC_KEY_LEN,
            KeyRole::PqSigning => ML_DSA_PUBLIC_KEY_LEN,
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four key pairs owned by one endpoint
///
/// Every secret type wipes itself on drop, so `destroy` only has to release
/// them. A store that was never generated, or already destroyed, is empty.
#[derive(Default)]
pub struct KeyMaterial {
    encryption: Option<EciesKeyPair>,
    signing: Option<EcdsaSecretKey>,
    kem: Option<MlKemKeyPair>,
    pq_signing: Option<MlDsaSecretKey>,
}

impl KeyMaterial {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Generate all four key pairs from the OS RNG
    ///
    /// On failure the partially filled store is dropped, which wipes every
    /// secret generated so far.
    pub fn generate() -> Result<Self> {
        let mut material = Self::empty();
        material.encryption = Some(EciesKeyPair::generate().map_err(keygen(KeyRole::Encryption))?);
        material.signing = Some(EcdsaSecretKey::generate().map_err(keygen(KeyRole::Signing))?);
        material.kem = Some(MlKemKeyPair::generate().map_err(keygen(KeyRole::Kem))?);
        material.pq_signing = Some(MlDsaSecretKey::generate().map_err(keygen(KeyRole::PqSigning))?);

        tracing::debug!("generated classical and post-quantum key pairs");
        Ok(material)
    }

    pub fn is_complete(&self) -> bool {
        self.encryption.is_some()
            && self.signing.is_some()
            && self.kem.is_some()
            && self.pq_signing.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.encryption.is_none()
            && self.signing.is_none()
            && self.kem.is_none()
            && self.pq_signing.is_none()
    }

    /// Public halves, for transmission
    pub fn public_keys(&self) -> std::result::Result<PublicKeySet, KeyExchangeError> {
        match (&self.encryption, &self.signing, &self.kem, &self.pq_signing) {
            (Some(encryption), Some(signing), Some(kem), Some(pq_signing)) => Ok(PublicKeySet {
                encryption: encryption.public_key(),
                signing: signing.verify_key(),
                kem: kem.public_key(),
                pq_signing: pq_signing.verify_key(),
            }),
            _ => Err(KeyExchangeError::MissingLocalKeys),
        }
    }

    /// Wipe every private key; safe to call repeatedly
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }
        self.encryption = None;
        self.signing = None;
        self.kem = None;
        self.pq_signing = None;
        tracing::debug!("key material destroyed");
    }

    pub(crate) fn encryption(&self) -> Option<&EciesKeyPair> {
        self.encryption.as_ref()
    }

    pub(crate) fn signing(&self) -> Option<&EcdsaSecretKey> {
        self.signing.as_ref()
    }

    pub(crate) fn kem(&self) -> Option<&MlKemKeyPair> {
        self.kem.as_ref()
    }

    pub(crate) fn pq_signing(&self) -> Option<&MlDsaSecretKey> {
        self.pq_signing.as_ref()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

fn keygen(role: KeyRole) -> impl FnOnce(crypto::CryptoError) -> QsslError {
    move |source| QsslError::KeyGen { role, source }
}

/// One endpoint's four public keys
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeySet {
    pub encryption: EciesPublicKey,
    pub signing: EcdsaPublicKey,
    pub kem: MlKemPublicKey,
    pub pq_signing: MlDsaPublicKey,
}

impl PublicKeySet {
    /// Encoded key for `role`
    pub fn encode(&self, role: KeyRole) -> Vec<u8> {
        match role {
            KeyRole::Encryption => self.encryption.to_bytes(),
            KeyRole::Signing => self.signing.to_bytes(),
            KeyRole::Kem => self.kem.to_bytes(),
            KeyRole::PqSigning => self.pq_signing.to_bytes(),
        }
    }

    /// Short digest of the key for `role`, for logs
    pub fn fingerprint(&self, role: KeyRole) -> String {
        fingerprint(&self.encode(role))
    }
}

/// Public keys received from the remote endpoint
///
/// Only built once all four roles decoded, and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerPublicKeys {
    keys: PublicKeySet,
}

impl PeerPublicKeys {
    pub fn encryption(&self) -> &EciesPublicKey {
        &self.keys.encryption
    }

    pub fn signing(&self) -> &EcdsaPublicKey {
        &self.keys.signing
    }

    pub fn kem(&self) -> &MlKemPublicKey {
        &self.keys.kem
    }

    pub fn pq_signing(&self) -> &MlDsaPublicKey {
        &self.keys.pq_signing
    }

    pub fn as_set(&self) -> &PublicKeySet {
        &self.keys
    }
}

impl From<PublicKeySet> for PeerPublicKeys {
    fn from(keys: PublicKeySet) -> Self {
        Self { keys }
    }
}

/// Accumulates peer keys as they arrive, decoding each immediately
#[derive(Debug, Default)]
pub struct PeerKeysBuilder {
    encryption: Option<EciesPublicKey>,
    signing: Option<EcdsaPublicKey>,
    kem: Option<MlKemPublicKey>,
    pq_signing: Option<MlDsaPublicKey>,
}

impl PeerKeysBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` as the public key for `role`
    pub fn accept(
        &mut self,
        role: KeyRole,
        bytes: &[u8],
    ) -> std::result::Result<(), KeyExchangeError> {
        let invalid = |source| KeyExchangeError::InvalidPublicKey {
            role,
            len: bytes.len(),
            source,
        };
        match role {
            KeyRole::Encryption => {
                self.encryption = Some(EciesPublicKey::from_bytes(bytes).map_err(invalid)?)
            }
            KeyRole::Signing => {
                self.signing = Some(EcdsaPublicKey::from_bytes(bytes).map_err(invalid)?)
            }
            KeyRole::Kem => self.kem = Some(MlKemPublicKey::from_bytes(bytes).map_err(invalid)?),
            KeyRole::PqSigning => {
                self.pq_signing = Some(MlDsaPublicKey::from_bytes(bytes).map_err(invalid)?)
            }
        }
        tracing::debug!(%role, fingerprint = %fingerprint(bytes), "accepted peer public key");
        Ok(())
    }

    /// Finish once every role is present
    pub fn build(self) -> Option<PeerPublicKeys> {
        Some(PeerPublicKeys {
            keys: PublicKeySet {
                encryption: self.encryption?,
                signing: self.signing?,
                kem: self.kem?,
                pq_signing: self.pq_signing?,
            },
        })
    }
}
