//! Session lifecycle and session key derivation

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ChannelError, EstablishmentError, QsslError, Result, SessionError};
use crate::handshake::EstablishmentSecret;
use crate::keys::{KeyMaterial, PeerPublicKeys};

/// Symmetric key length shared by both establishment paths and the channel
pub const SESSION_KEY_LEN: usize = 32;

/// Which side of the handshake this endpoint plays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    KeysExchanged,
    Established,
    Active,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Phases advance strictly in order; any live state may fail
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Init, KeysExchanged)
            | (KeysExchanged, Established)
            | (Established, Active)
            | (Active, Closed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::KeysExchanged => "KEYS_EXCHANGED",
            SessionState::Established => "ESTABLISHED",
            SessionState::Active => "ACTIVE",
            SessionState::Closed => "CLOSED",
            SessionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Channel key, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_LEN],
}

impl SessionKey {
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, ChannelError> {
        if bytes.len() != SESSION_KEY_LEN {
            return Err(ChannelError::InvalidKeyLength {
                expected: SESSION_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = Self {
            bytes: [0u8; SESSION_KEY_LEN],
        };
        key.bytes.copy_from_slice(bytes);
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.bytes
    }

    pub fn fingerprint(&self) -> String {
        crypto::hashes::fingerprint(&self.bytes)
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionKey").field(&self.fingerprint()).finish()
    }
}

/// `classical XOR pq`, position-wise
///
/// No KDF or transcript binding is applied. Both inputs must already be
/// `SESSION_KEY_LEN` bytes.
pub fn derive_session_key(
    classical: &[u8],
    pq: &[u8],
) -> std::result::Result<SessionKey, EstablishmentError> {
    for secret in [classical, pq] {
        if secret.len() != SESSION_KEY_LEN {
            return Err(EstablishmentError::SecretLength {
                expected: SESSION_KEY_LEN,
                actual: secret.len(),
            });
        }
    }
    let mut key = SessionKey {
        bytes: [0u8; SESSION_KEY_LEN],
    };
    for (out, (a, b)) in key.bytes.iter_mut().zip(classical.iter().zip(pq)) {
        *out = a ^ b;
    }
    Ok(key)
}

/// State of one endpoint's session, owning its key material
pub struct Session {
    role: Role,
    state: SessionState,
    keys: KeyMaterial,
    peer: Option<PeerPublicKeys>,
    session_key: Option<SessionKey>,
}

impl Session {
    pub fn new(role: Role, keys: KeyMaterial) -> Self {
        Self {
            role,
            state: SessionState::Init,
            keys,
            peer: None,
            session_key: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn key_material(&self) -> &KeyMaterial {
        &self.keys
    }

    pub fn peer_keys(&self) -> std::result::Result<&PeerPublicKeys, SessionError> {
        self.peer.as_ref().ok_or(SessionError::WrongState {
            expected: SessionState::KeysExchanged,
            actual: self.state,
        })
    }

    fn transition(&mut self, next: SessionState) -> std::result::Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(role = %self.role, from = %self.state, to = %next, "session transition");
        self.state = next;
        Ok(())
    }

    /// Store the peer's public keys once the exchange completes
    pub fn record_peer_keys(
        &mut self,
        peer: PeerPublicKeys,
    ) -> std::result::Result<(), SessionError> {
        self.transition(SessionState::KeysExchanged)?;
        self.peer = Some(peer);
        Ok(())
    }

    /// Derive the session key from both confirmed secrets
    pub fn establish(&mut self, secret: &EstablishmentSecret) -> Result<()> {
        if self.state != SessionState::KeysExchanged {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Established,
            }
            .into());
        }
        let key = derive_session_key(secret.classical(), secret.pq())?;
        self.transition(SessionState::Established)?;
        tracing::info!(role = %self.role, key = %key.fingerprint(), "session key derived");
        self.session_key = Some(key);
        Ok(())
    }

    pub fn activate(&mut self) -> std::result::Result<(), SessionError> {
        self.transition(SessionState::Active)
    }

    /// Key for the protected channel; only available while active
    pub fn session_key(&self) -> std::result::Result<&SessionKey, SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::WrongState {
                expected: SessionState::Active,
                actual: self.state,
            });
        }
        self.session_key.as_ref().ok_or(SessionError::KeyUnavailable)
    }

    /// Orderly teardown from `Active`
    pub fn close(&mut self) -> std::result::Result<(), SessionError> {
        self.transition(SessionState::Closed)?;
        self.wipe();
        Ok(())
    }

    /// Move to `Failed` and wipe every secret held so far
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            tracing::warn!(role = %self.role, from = %self.state, "session failed");
            self.state = SessionState::Failed;
        }
        self.wipe();
    }

    /// Pass `result` through, failing the session on error
    pub fn guard<T, E: Into<QsslError>>(&mut self, result: std::result::Result<T, E>) -> Result<T> {
        result.map_err(|e| {
            self.fail();
            e.into()
        })
    }

    fn wipe(&mut self) {
        self.keys.destroy();
        self.session_key = None;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secret(classical: [u8; 32], pq: [u8; 32]) -> EstablishmentSecret {
        EstablishmentSecret::new(classical, pq)
    }

    fn exchanged_session() -> Session {
        let keys = KeyMaterial::generate().unwrap();
        let peer = PeerPublicKeys::from(keys.public_keys().unwrap());
        let mut session = Session::new(Role::Initiator, keys);
        session.record_peer_keys(peer).unwrap();
        session
    }

    #[test]
    fn test_derive_is_xor() {
        let key = derive_session_key(&[0xF0; 32], &[0x0F; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[0xFF; 32]);
    }

    #[test]
    fn test_derive_rejects_unequal_lengths() {
        assert!(matches!(
            derive_session_key(&[0u8; 32], &[0u8; 16]),
            Err(EstablishmentError::SecretLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_phases_in_order() {
        let mut session = exchanged_session();
        assert_eq!(session.state(), SessionState::KeysExchanged);
        assert!(session.session_key().is_err());

        session.establish(&secret([1; 32], [2; 32])).unwrap();
        assert_eq!(session.state(), SessionState::Established);
        // established but not yet active: no channel use
        assert!(matches!(
            session.session_key(),
            Err(SessionError::WrongState { .. })
        ));

        session.activate().unwrap();
        assert_eq!(session.session_key().unwrap().as_bytes(), &[3; 32]);

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.key_material().is_destroyed());
    }

    #[test]
    fn test_out_of_order_transition_rejected() {
        let keys = KeyMaterial::generate().unwrap();
        let mut session = Session::new(Role::Responder, keys);
        let err = session.activate().unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                from: SessionState::Init,
                to: SessionState::Active
            }
        ));
        assert!(session
            .establish(&secret([0; 32], [0; 32]))
            .is_err());
    }

    #[test]
    fn test_failure_wipes_everything() {
        let mut session = exchanged_session();
        session.establish(&secret([9; 32], [7; 32])).unwrap();
        let result: Result<()> = session.guard(Err(EstablishmentError::ClassicalSignature));
        assert!(matches!(
            result,
            Err(QsslError::Establishment(EstablishmentError::ClassicalSignature))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.key_material().is_destroyed());
        assert!(session.activate().is_err());
    }

    #[test]
    fn test_terminal_states_stay_put() {
        for state in [SessionState::Closed, SessionState::Failed] {
            assert!(!state.can_transition_to(SessionState::Failed));
            assert!(!state.can_transition_to(SessionState::Init));
        }
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SessionKey::from_bytes(&[0xAB; 32]).unwrap();
        assert!(!format!("{key:?}").contains("abab"));
    }

    proptest! {
        #[test]
        fn prop_xor_agreement(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let ab = derive_session_key(&a, &b).unwrap();
            let ba = derive_session_key(&b, &a).unwrap();
            prop_assert_eq!(&ab, &ba);
            let back = derive_session_key(ab.as_bytes(), &b).unwrap();
            prop_assert_eq!(back.as_bytes(), &a);
        }
    }
}
