use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid length: expected {expected} bytes, found {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("verification failed")]
    VerificationFailed,

    #[error("decapsulation failed")]
    DecapsulationFailed,

    #[error("encapsulation failed")]
    EncapsulationFailed,

    #[error("invalid key")]
    InvalidKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

impl CryptoError {
    pub(crate) fn check_length(expected: usize, actual: usize) -> Result<(), CryptoError> {
        if expected == actual {
            Ok(())
        } else {
            Err(CryptoError::InvalidLength { expected, actual })
        }
    }
}
