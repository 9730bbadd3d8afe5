//! Session driver: key exchange, establishment and the protected channel
//! over one UDP peer

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::channel::{CbcChannel, Channel, SealedMessage, MAX_MESSAGE_LEN};
use crate::config::QsslConfig;
use crate::error::{ChannelError, Result, TransportError};
use crate::exchange::{KeyExchanger, OrderedKeyExchange};
use crate::frame::{Datagram, Frame, FrameLink, LinkStats};
use crate::handshake::{Establisher, HybridEstablisher};
use crate::keyfile;
use crate::keys::{KeyMaterial, KeyRole};
use crate::session::{Role, Session, SessionKey, SessionState};

/// Label of an encrypted application message
pub const MESSAGE_LABEL: &str = "message";
/// Label of the frame that ends a session
pub const CLOSE_LABEL: &str = "close";

/// Runs the hybrid handshake and hands back an active [`SecureSession`]
pub struct QsslTransport {
    config: QsslConfig,
}

impl QsslTransport {
    pub fn new(config: QsslConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QsslConfig {
        &self.config
    }

    /// Handshake as the initiator with the responder at `peer`
    pub async fn connect(&self, socket: UdpSocket, peer: SocketAddr) -> Result<SecureSession> {
        let keys = KeyMaterial::generate()?;
        let link = FrameLink::connect(socket, peer, &self.config).await?;
        self.handshake(link, Session::new(Role::Initiator, keys)).await
    }

    /// Wait for an initiator on `socket` and handshake as the responder
    ///
    /// Keys are generated before the first datagram is read so the
    /// initiator is not left waiting for an acknowledgment.
    pub async fn accept(&self, socket: UdpSocket) -> Result<SecureSession> {
        let keys = KeyMaterial::generate()?;
        let link = FrameLink::accept(socket, &self.config).await?;
        self.handshake(link, Session::new(Role::Responder, keys)).await
    }

    /// Run the handshake over an existing link with fresh key material
    pub async fn upgrade<D: Datagram>(
        &self,
        link: FrameLink<D>,
        role: Role,
    ) -> Result<SecureSession<D>> {
        let keys = KeyMaterial::generate()?;
        self.handshake(link, Session::new(role, keys)).await
    }

    /// Key exchange and establishment share one `handshake_timeout`. On any
    /// error the session moves to `Failed` and its key material is wiped
    /// before the error is returned.
    async fn handshake<D: Datagram>(
        &self,
        mut link: FrameLink<D>,
        mut session: Session,
    ) -> Result<SecureSession<D>> {
        let role = session.role();
        let handshake_timeout = self.config.handshake_timeout;
        let outcome = match timeout(
            handshake_timeout,
            self.run_handshake(&mut link, &mut session),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::HandshakeTimeout(handshake_timeout).into()),
        };
        session.guard(outcome)?;

        if self.config.verbose_logging {
            tracing::debug!(stats = ?link.stats(), "handshake link statistics");
        }
        tracing::info!(%role, "hybrid handshake complete with ML-KEM-768 and ML-DSA-65");

        Ok(SecureSession::new(link, session, &self.config))
    }

    async fn run_handshake<D: Datagram>(
        &self,
        link: &mut FrameLink<D>,
        session: &mut Session,
    ) -> Result<()> {
        let role = session.role();
        let local = session.key_material().public_keys()?;
        if self.config.verbose_logging {
            tracing::debug!(
                %role,
                signing = %local.fingerprint(KeyRole::Signing),
                pq_signing = %local.fingerprint(KeyRole::PqSigning),
                "local identity"
            );
        }

        let peer = OrderedKeyExchange::new(role).exchange(link, &local).await?;
        session.record_peer_keys(peer)?;

        let secret = HybridEstablisher::new(role)
            .establish(link, session.key_material(), session.peer_keys()?)
            .await?;
        session.establish(&secret)?;
        session.activate()?;
        Ok(())
    }
}

/// Counters for an active session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Application messages sent
    pub messages_sent: u64,
    /// Application messages received
    pub messages_received: u64,
    /// Frame-level counters, handshake included
    pub link: LinkStats,
    /// Time since the session became active, in milliseconds
    pub duration_ms: u64,
}

/// An established session carrying encrypted messages
pub struct SecureSession<D = UdpSocket> {
    link: FrameLink<D>,
    session: Session,
    channel: CbcChannel,
    linger: Duration,
    activated_at: Instant,
    messages_sent: u64,
    messages_received: u64,
}

impl<D: Datagram> SecureSession<D> {
    fn new(link: FrameLink<D>, session: Session, config: &QsslConfig) -> Self {
        Self {
            link,
            session,
            channel: CbcChannel::new(),
            linger: config.ack_timeout * 2,
            activated_at: Instant::now(),
            messages_sent: 0,
            messages_received: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.session.role()
    }

    pub fn is_initiator(&self) -> bool {
        self.session.role() == Role::Initiator
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The derived key; fails once the session is closed
    pub fn session_key(&self) -> Result<&SessionKey> {
        Ok(self.session.session_key()?)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            link: self.link.stats().clone(),
            duration_ms: self.activated_at.elapsed().as_millis() as u64,
        }
    }

    /// Encrypt and send one message
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<()> {
        if plaintext.len() > MAX_MESSAGE_LEN {
            return Err(ChannelError::MessageTooLong {
                len: plaintext.len(),
                max: MAX_MESSAGE_LEN,
            }
            .into());
        }
        let sealed = self.seal(plaintext);
        let sealed = self.session.guard(sealed)?;
        let sent = self.link.send(MESSAGE_LABEL, &sealed.to_bytes()).await;
        self.session.guard(sent)?;
        self.messages_sent += 1;
        Ok(())
    }

    /// Receive and decrypt one message; `None` once the peer has closed
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        self.session.session_key()?;
        let frame = self.link.receive().await;
        let frame = self.session.guard(frame)?;

        if frame.has_label(CLOSE_LABEL) {
            tracing::info!(role = %self.session.role(), "peer closed the session");
            // acknowledge a retransmitted close before the socket goes away
            if let Err(e) = self.link.linger(self.linger).await {
                tracing::warn!(error = %e, "error while draining after close");
            }
            self.session.close()?;
            return Ok(None);
        }

        let opened = self.open(&frame);
        let plaintext = self.session.guard(opened)?;
        self.messages_received += 1;
        Ok(Some(plaintext))
    }

    /// Send `plaintext` and wait for the reply
    pub async fn request(&mut self, plaintext: &[u8]) -> Result<Option<Vec<u8>>> {
        self.send(plaintext).await?;
        self.recv().await
    }

    /// Answer each message with `handler` until the peer closes
    ///
    /// Returns the number of messages handled. A handler returning `None`
    /// sends no reply.
    pub async fn serve<F>(&mut self, mut handler: F) -> Result<u64>
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>>,
    {
        let mut handled = 0;
        while let Some(message) = self.recv().await? {
            handled += 1;
            if let Some(reply) = handler(&message) {
                self.send(&reply).await?;
            }
        }
        Ok(handled)
    }

    /// Write the session key to `path` as raw bytes
    pub async fn persist_key(&self, path: impl AsRef<Path>) -> Result<()> {
        let key = self.session.session_key()?;
        keyfile::write_session_key(path, key).await
    }

    /// Tell the peer the session is over and wipe every secret
    ///
    /// If the close frame is not acknowledged the session fails instead.
    pub async fn close(&mut self) -> Result<()> {
        if self.session.state() != SessionState::Active {
            return Ok(());
        }
        let sent = self.link.send(CLOSE_LABEL, &[]).await;
        if let Err(e) = &sent {
            tracing::warn!(error = %e, "close frame was not acknowledged");
        }
        self.session.guard(sent)?;
        self.session.close()?;
        Ok(())
    }

    fn seal(&self, plaintext: &[u8]) -> Result<SealedMessage> {
        let key = self.session.session_key()?;
        Ok(self.channel.encrypt(key.as_bytes(), plaintext)?)
    }

    fn open(&self, frame: &Frame) -> Result<Vec<u8>> {
        if !frame.has_label(MESSAGE_LABEL) {
            return Err(ChannelError::UnexpectedFrame(frame.label_str().into_owned()).into());
        }
        let sealed = SealedMessage::from_bytes(&frame.payload)?;
        let key = self.session.session_key()?;
        let plaintext = self.channel.decrypt(key.as_bytes(), &sealed)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{QsslError, SessionError};

    async fn bound() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn session_pair() -> (SecureSession, SecureSession) {
        let (server, server_addr) = bound().await;
        let (client, _) = bound().await;
        let initiator = QsslTransport::new(QsslConfig::development());
        let responder = QsslTransport::new(QsslConfig::development());

        let (client_session, server_session) = tokio::join!(
            initiator.connect(client, server_addr),
            responder.accept(server)
        );
        (client_session.unwrap(), server_session.unwrap())
    }

    #[tokio::test]
    async fn test_handshake_agrees_on_key() {
        let (client, server) = session_pair().await;
        assert!(client.is_initiator());
        assert!(!server.is_initiator());
        assert_eq!(client.state(), SessionState::Active);
        assert_eq!(client.session_key().unwrap(), server.session_key().unwrap());
    }

    #[tokio::test]
    async fn test_message_round_trip() {
        let (mut client, mut server) = session_pair().await;
        let (sent, received) = tokio::join!(client.send(b"ping"), server.recv());
        sent.unwrap();
        assert_eq!(received.unwrap().unwrap(), b"ping");
        assert_eq!(client.stats().messages_sent, 1);
        assert_eq!(server.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_request_and_serve_until_close() {
        let (mut client, mut server) = session_pair().await;

        let (replies, handled) = tokio::join!(
            async {
                let first = client.request(b"hello").await?;
                let second = client.request(b"again").await?;
                client.close().await?;
                Ok::<_, QsslError>((first, second))
            },
            server.serve(|message| Some(message.to_ascii_uppercase()))
        );
        let (first, second) = replies.unwrap();
        assert_eq!(first.unwrap(), b"HELLO");
        assert_eq!(second.unwrap(), b"AGAIN");
        assert_eq!(handled.unwrap(), 2);
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_session_refuses_use() {
        let (mut client, mut server) = session_pair().await;
        let (closed, received) = tokio::join!(client.close(), server.recv());
        closed.unwrap();
        assert!(received.unwrap().is_none());
        assert!(matches!(
            server.send(b"late").await,
            Err(QsslError::Session(SessionError::WrongState { .. }))
        ));
        assert!(server.session_key().is_err());
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_unacknowledged_close_fails_session() {
        let (mut client, server) = session_pair().await;
        drop(server);

        assert!(matches!(
            client.close().await,
            Err(QsslError::Transport(_))
        ));
        assert_eq!(client.state(), SessionState::Failed);
        assert!(matches!(
            client.session_key(),
            Err(QsslError::Session(SessionError::WrongState { .. }))
        ));
    }

    #[tokio::test]
    async fn test_persist_key() {
        let (client, _server) = session_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.key");
        client.persist_key(&path).await.unwrap();
        let loaded = keyfile::read_session_key(&path).await.unwrap();
        assert_eq!(&loaded, client.session_key().unwrap());
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (silent, silent_addr) = bound().await;
        let (client, _) = bound().await;
        let config = QsslConfig::default().with_timeout(Duration::from_millis(50));
        let transport = QsslTransport::new(config);

        let result = transport.connect(client, silent_addr).await;
        assert!(matches!(
            result,
            Err(QsslError::Transport(TransportError::HandshakeTimeout(_)))
        ));
        drop(silent);
    }

    #[tokio::test]
    async fn test_oversize_message_rejected_without_failing_session() {
        let (mut client, _server) = session_pair().await;
        let big = vec![0u8; MAX_MESSAGE_LEN + 1];
        assert!(matches!(
            client.send(&big).await,
            Err(QsslError::Channel(ChannelError::MessageTooLong { .. }))
        ));
        assert_eq!(client.state(), SessionState::Active);
    }
}
