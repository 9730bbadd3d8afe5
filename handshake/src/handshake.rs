//! Hybrid establishment: a classical seed and a KEM secret, each signed over
//! its ciphertext
//!
//! The message layer (`initiate` / `accept`) is pure so it can be exercised
//! without sockets; `HybridEstablisher` drives it over a [`FrameLink`].

use async_trait::async_trait;
use crypto::ecdsa::EcdsaSignature;
use crypto::ml_dsa::MlDsaSignature;
use crypto::ml_kem::MlKemCiphertext;
use crypto::traits::{
    EncryptionKeyPair, EncryptionPublicKey, KemKeyPair, KemPublicKey, Signature, SigningKey,
    VerifyKey,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{EstablishmentError, Result};
use crate::frame::{Datagram, FrameLink};
use crate::keys::{KeyMaterial, PeerPublicKeys};
use crate::session::{Role, SESSION_KEY_LEN};

/// Length of the seed carried on the classical path
pub const CLASSICAL_SEED_LEN: usize = SESSION_KEY_LEN;

pub const CLASSICAL_CIPHERTEXT_LABEL: &str = "classical-ciphertext";
pub const CLASSICAL_SIGNATURE_LABEL: &str = "classical-signature";
pub const KEM_CIPHERTEXT_LABEL: &str = "kem-ciphertext";
pub const KEM_SIGNATURE_LABEL: &str = "kem-signature";

/// A ciphertext and the sender's signature over exactly those bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedCiphertext {
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Everything the initiator sends during establishment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EstablishmentOffer {
    pub classical: SignedCiphertext,
    pub pq: SignedCiphertext,
}

/// The two independently secured secrets
pub struct EstablishmentSecret {
    classical: Zeroizing<[u8; SESSION_KEY_LEN]>,
    pq: Zeroizing<[u8; SESSION_KEY_LEN]>,
}

impl EstablishmentSecret {
    pub fn new(classical: [u8; SESSION_KEY_LEN], pq: [u8; SESSION_KEY_LEN]) -> Self {
        Self {
            classical: Zeroizing::new(classical),
            pq: Zeroizing::new(pq),
        }
    }

    pub fn classical(&self) -> &[u8] {
        self.classical.as_slice()
    }

    pub fn pq(&self) -> &[u8] {
        self.pq.as_slice()
    }
}

impl std::fmt::Debug for EstablishmentSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishmentSecret").finish_non_exhaustive()
    }
}

fn to_secret(bytes: &[u8]) -> std::result::Result<[u8; SESSION_KEY_LEN], EstablishmentError> {
    <[u8; SESSION_KEY_LEN]>::try_from(bytes).map_err(|_| EstablishmentError::SecretLength {
        expected: SESSION_KEY_LEN,
        actual: bytes.len(),
    })
}

/// Initiator side: encrypt and sign a fresh seed, encapsulate and sign a KEM secret
pub fn initiate(
    local: &KeyMaterial,
    peer: &PeerPublicKeys,
) -> std::result::Result<(EstablishmentOffer, EstablishmentSecret), EstablishmentError> {
    let signing = local.signing().ok_or(EstablishmentError::NotReady)?;
    let pq_signing = local.pq_signing().ok_or(EstablishmentError::NotReady)?;

    // classical path
    let mut seed = Zeroizing::new([0u8; CLASSICAL_SEED_LEN]);
    OsRng.fill_bytes(seed.as_mut_slice());
    let classical_ct = peer
        .encryption()
        .encrypt(seed.as_slice())
        .map_err(EstablishmentError::Encryption)?;
    let classical_sig = signing
        .sign(&classical_ct)
        .map_err(EstablishmentError::Signing)?;

    // post-quantum path
    let (kem_ct, shared) = peer
        .kem()
        .encapsulate()
        .map_err(EstablishmentError::Encapsulation)?;
    let kem_sig = pq_signing
        .sign(kem_ct.as_bytes())
        .map_err(EstablishmentError::Signing)?;

    let offer = EstablishmentOffer {
        classical: SignedCiphertext {
            ciphertext: classical_ct,
            signature: classical_sig.to_vec(),
        },
        pq: SignedCiphertext {
            ciphertext: kem_ct.as_bytes().to_vec(),
            signature: kem_sig.to_vec(),
        },
    };
    let secret = EstablishmentSecret {
        classical: seed,
        pq: Zeroizing::new(*shared.as_bytes()),
    };
    Ok((offer, secret))
}

/// Responder side: verify each signature over the received ciphertext, then
/// recover the secret it protects
pub fn accept(
    local: &KeyMaterial,
    peer: &PeerPublicKeys,
    offer: &EstablishmentOffer,
) -> std::result::Result<EstablishmentSecret, EstablishmentError> {
    let encryption = local.encryption().ok_or(EstablishmentError::NotReady)?;
    let kem = local.kem().ok_or(EstablishmentError::NotReady)?;

    // classical path
    let classical_sig = EcdsaSignature::from_bytes(&offer.classical.signature).map_err(|source| {
        EstablishmentError::Malformed {
            field: CLASSICAL_SIGNATURE_LABEL,
            source,
        }
    })?;
    peer.signing()
        .verify(&offer.classical.ciphertext, &classical_sig)
        .map_err(|_| EstablishmentError::ClassicalSignature)?;
    let seed = encryption
        .decrypt(&offer.classical.ciphertext)
        .map_err(EstablishmentError::Decryption)?;
    let classical = to_secret(&seed)?;

    // post-quantum path
    let kem_ct = MlKemCiphertext::from_bytes(&offer.pq.ciphertext).map_err(|source| {
        EstablishmentError::Malformed {
            field: KEM_CIPHERTEXT_LABEL,
            source,
        }
    })?;
    let kem_sig = MlDsaSignature::from_bytes(&offer.pq.signature).map_err(|source| {
        EstablishmentError::Malformed {
            field: KEM_SIGNATURE_LABEL,
            source,
        }
    })?;
    peer.pq_signing()
        .verify(kem_ct.as_bytes(), &kem_sig)
        .map_err(|_| EstablishmentError::PqSignature)?;
    let shared = kem
        .decapsulate(&kem_ct)
        .map_err(EstablishmentError::Decapsulation)?;

    Ok(EstablishmentSecret::new(classical, *shared.as_bytes()))
}

/// Runs the establishment phase over a frame link
#[async_trait]
pub trait Establisher {
    async fn establish<D: Datagram>(
        &self,
        link: &mut FrameLink<D>,
        local: &KeyMaterial,
        peer: &PeerPublicKeys,
    ) -> Result<EstablishmentSecret>;
}

/// Classical plus post-quantum establishment; the initiator sends, the
/// responder verifies
pub struct HybridEstablisher {
    role: Role,
}

impl HybridEstablisher {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

#[async_trait]
impl Establisher for HybridEstablisher {
    async fn establish<D: Datagram>(
        &self,
        link: &mut FrameLink<D>,
        local: &KeyMaterial,
        peer: &PeerPublicKeys,
    ) -> Result<EstablishmentSecret> {
        match self.role {
            Role::Initiator => {
                let (offer, secret) = initiate(local, peer)?;
                link.send(CLASSICAL_CIPHERTEXT_LABEL, &offer.classical.ciphertext)
                    .await?;
                link.send(CLASSICAL_SIGNATURE_LABEL, &offer.classical.signature)
                    .await?;
                link.send(KEM_CIPHERTEXT_LABEL, &offer.pq.ciphertext).await?;
                link.send(KEM_SIGNATURE_LABEL, &offer.pq.signature).await?;
                tracing::info!(role = %self.role, "hybrid establishment sent");
                Ok(secret)
            }
            Role::Responder => {
                let offer = EstablishmentOffer {
                    classical: SignedCiphertext {
                        ciphertext: link.receive_expected(CLASSICAL_CIPHERTEXT_LABEL).await?,
                        signature: link.receive_expected(CLASSICAL_SIGNATURE_LABEL).await?,
                    },
                    pq: SignedCiphertext {
                        ciphertext: link.receive_expected(KEM_CIPHERTEXT_LABEL).await?,
                        signature: link.receive_expected(KEM_SIGNATURE_LABEL).await?,
                    },
                };
                let secret = accept(local, peer, &offer)?;
                tracing::info!(role = %self.role, "hybrid establishment verified");
                Ok(secret)
            }
        }
    }
}
