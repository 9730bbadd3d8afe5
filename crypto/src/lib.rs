//! Crypto provider for the QSSL hybrid handshake.
//!
//! Every primitive is a pure function over byte buffers with explicit
//! lengths. Nothing here keeps state between calls; key material lives in
//! typed wrappers that wipe their secret bytes on drop.
//!
//! | Role          | Primitive                                   |
//! |---------------|---------------------------------------------|
//! | encryption    | X25519 ECIES (HKDF-SHA-256, AES-256-GCM)    |
//! | signing       | ECDSA P-256 over SHA-256                    |
//! | kem           | ML-KEM-768 (FIPS 203)                       |
//! | pq-signing    | ML-DSA-65 (FIPS 204)                        |
//! | channel       | AES-256-CBC with PKCS#7 padding             |

pub mod ecdsa;
pub mod ecies;
pub mod error;
pub mod hashes;
pub mod ml_dsa;
pub mod ml_kem;
pub mod symmetric;
pub mod traits;

pub use error::CryptoError;
