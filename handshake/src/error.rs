//! Error types for the QSSL handshake

use thiserror::Error;

use crate::keys::KeyRole;
use crate::session::SessionState;

/// Errors that can occur during a QSSL session
#[derive(Debug, Error)]
pub enum QsslError {
    /// Frame layer failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Key pair generation failed
    #[error("key generation failed for {role}: {source}")]
    KeyGen {
        role: KeyRole,
        #[source]
        source: crypto::CryptoError,
    },

    /// Received public key rejected
    #[error("key exchange error: {0}")]
    KeyExchange(#[from] KeyExchangeError),

    /// Hybrid establishment failed
    #[error("establishment error: {0}")]
    Establishment(#[from] EstablishmentError),

    /// Protected channel failure
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session used out of order
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Socket or key file I/O
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// No acknowledgment after all retransmissions
    #[error("no acknowledgment for frame {seq} after {attempts} attempts")]
    AckTimeout { seq: u32, attempts: u32 },

    /// Nothing arrived within the receive window
    #[error("no frame received within {0:?}")]
    ReceiveTimeout(std::time::Duration),

    /// The whole handshake exceeded its deadline
    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// Datagram too short, unknown kind, or oversize
    #[error("malformed datagram: {0}")]
    Malformed(String),

    /// Frame larger than the datagram limit
    #[error("frame of {len} bytes exceeds the {max} byte datagram limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Label frame did not match what the caller expected
    #[error("unexpected frame label: expected {expected:?}, got {got:?}")]
    UnexpectedLabel { expected: String, got: String },

    /// Socket failure
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Public-key exchange errors
#[derive(Debug, Error)]
pub enum KeyExchangeError {
    /// Received key had the wrong size or failed to decode
    #[error("invalid {role} public key ({len} bytes): {source}")]
    InvalidPublicKey {
        role: KeyRole,
        len: usize,
        #[source]
        source: crypto::CryptoError,
    },

    /// Local key material was not generated
    #[error("local key material is missing")]
    MissingLocalKeys,

    /// Exchange finished without all four peer keys
    #[error("peer public key set is incomplete")]
    Incomplete,
}

/// Hybrid establishment errors
#[derive(Debug, Error)]
pub enum EstablishmentError {
    /// Classical signature over the ciphertext did not verify
    #[error("classical signature verification failed")]
    ClassicalSignature,

    /// Post-quantum signature over the KEM ciphertext did not verify
    #[error("post-quantum signature verification failed")]
    PqSignature,

    /// Classical ciphertext could not be decrypted
    #[error("classical decryption failed: {0}")]
    Decryption(crypto::CryptoError),

    /// KEM ciphertext could not be decapsulated
    #[error("decapsulation failed: {0}")]
    Decapsulation(crypto::CryptoError),

    /// Encrypting the classical seed on the initiator side failed
    #[error("classical encryption failed: {0}")]
    Encryption(crypto::CryptoError),

    /// KEM encapsulation on the initiator side failed
    #[error("encapsulation failed: {0}")]
    Encapsulation(crypto::CryptoError),

    /// Signing the outgoing ciphertext failed
    #[error("signing failed: {0}")]
    Signing(crypto::CryptoError),

    /// A field of the offer had the wrong length
    #[error("malformed {field}: {source}")]
    Malformed {
        field: &'static str,
        #[source]
        source: crypto::CryptoError,
    },

    /// Recovered secret had the wrong length
    #[error("secret length mismatch: expected {expected}, got {actual}")]
    SecretLength { expected: usize, actual: usize },

    /// Peer public keys or local key material are missing
    #[error("establishment attempted before key exchange completed")]
    NotReady,
}

/// Protected channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Key not of the required length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Ciphertext or IV malformed, or padding invalid
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Plaintext over the channel limit
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLong { len: usize, max: usize },

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(crypto::CryptoError),

    /// Peer sent a frame that is neither a message nor a close
    #[error("unexpected frame {0:?} on the protected channel")]
    UnexpectedFrame(String),
}

/// Session lifecycle errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transition not permitted from the current state
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Operation requires a different state
    #[error("session is {actual}, expected {expected}")]
    WrongState {
        expected: SessionState,
        actual: SessionState,
    },

    /// Session key was already wiped
    #[error("session key is no longer available")]
    KeyUnavailable,
}

/// Result type for QSSL operations
pub type Result<T> = std::result::Result<T, QsslError>;
