//! QSSL: hybrid classical/post-quantum handshake over UDP
//!
//! Two endpoints establish one symmetric session key and then exchange
//! AES-256-CBC protected messages with it.
//!
//! # Security Properties
//!
//! The session key is `classical_secret XOR pq_secret`:
//! 1. If the classical primitives are broken but ML-KEM/ML-DSA hold, the session stays secret
//! 2. If the post-quantum primitives are broken but X25519/ECDSA hold, the session stays secret
//! 3. Both must be broken simultaneously to recover the key
//!
//! No KDF or transcript hash is applied to the combination, and the channel
//! is unauthenticated CBC; both are known weaknesses of the wire protocol.
//!
//! # Protocol Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        QSSL Handshake                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  1. Key exchange     │  encryption, signing, kem, pq-signing │
//! │  2. Classical path   │  ECIES(seed) + ECDSA(ciphertext)      │
//! │  3. PQ path          │  ML-KEM encaps + ML-DSA(ciphertext)   │
//! │  4. Session key      │  seed XOR kem_shared_secret           │
//! │  5. Channel          │  AES-256-CBC, random IV per message   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every step runs over [`frame::FrameLink`], which sends each label and
//! payload as an individually acknowledged, retransmitted datagram.
//!
//! # Example
//!
//! ```rust,ignore
//! use qssl_handshake::{QsslConfig, QsslTransport};
//!
//! let transport = QsslTransport::new(QsslConfig::default());
//! let mut session = transport.connect(socket, responder_addr).await?;
//! session.send(b"Hello, quantum world!").await?;
//! session.close().await?;
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod handshake;
pub mod keyfile;
pub mod keys;
pub mod session;
pub mod transport;

pub use channel::{CbcChannel, Channel, SealedMessage, MAX_MESSAGE_LEN};
pub use config::{QsslConfig, QsslConfigBuilder};
pub use error::{
    ChannelError, EstablishmentError, KeyExchangeError, QsslError, Result, SessionError,
    TransportError,
};
pub use exchange::{KeyExchanger, OrderedKeyExchange};
pub use frame::{Datagram, Frame, FrameLink, LinkStats};
pub use handshake::{
    EstablishmentOffer, EstablishmentSecret, Establisher, HybridEstablisher, SignedCiphertext,
};
pub use keys::{KeyMaterial, KeyRole, PeerPublicKeys, PublicKeySet};
pub use session::{derive_session_key, Role, Session, SessionKey, SessionState, SESSION_KEY_LEN};
pub use transport::{QsslTransport, SecureSession, SessionStats};
