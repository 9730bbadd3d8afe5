//! Acknowledged frame transport over a connectionless datagram socket
//!
//! A frame is a `(label, payload)` pair sent as two data datagrams. Every
//! data datagram carries a sequence number and is acknowledged individually;
//! the sender retransmits after `ack_timeout` and gives up after
//! `max_retries` retransmissions.
//!
//! ```text
//! data: 0x01 | seq (u32 BE) | body
//! ack:  0x02 | seq (u32 BE) | "Ok"
//! ```

use std::borrow::Cow;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::QsslConfig;
use crate::error::TransportError;

/// Largest datagram in the baseline wire format
pub const MAX_DATAGRAM_LEN: usize = 4096;
/// Kind byte plus sequence number
pub const HEADER_LEN: usize = 5;
/// Smallest datagram limit that still carries an ML-DSA-65 signature frame
pub const MIN_DATAGRAM_LEN: usize = HEADER_LEN + crypto::ml_dsa::ML_DSA_SIGNATURE_LEN;
/// Fixed acknowledgment body
pub const ACK_BODY: &[u8; 2] = b"Ok";

const KIND_DATA: u8 = 0x01;
const KIND_ACK: u8 = 0x02;
const ACK_LEN: usize = HEADER_LEN + ACK_BODY.len();

/// A socket that exchanges whole datagrams with a single peer
#[async_trait]
pub trait Datagram: Send + Sync {
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl Datagram for UdpSocket {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }
}

/// One labeled unit of data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub label: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn label_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.label)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label == label.as_bytes()
    }
}

/// Counters for one link
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames sent and acknowledged
    pub frames_sent: u64,
    /// Frames delivered to the caller
    pub frames_received: u64,
    /// Data datagrams written, including retransmissions
    pub datagrams_sent: u64,
    /// Data datagrams resent after an ack timeout
    pub retransmissions: u64,
    /// Data datagrams received twice
    pub duplicates: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Packet {
    Data { seq: u32, body: Vec<u8> },
    Ack { seq: u32 },
}

fn encode_data(seq: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(KIND_DATA);
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn encode_ack(seq: u32) -> [u8; ACK_LEN] {
    let mut out = [0u8; ACK_LEN];
    out[0] = KIND_ACK;
    out[1..HEADER_LEN].copy_from_slice(&seq.to_be_bytes());
    out[HEADER_LEN..].copy_from_slice(ACK_BODY);
    out
}

fn decode(datagram: &[u8]) -> Result<Packet, TransportError> {
    if datagram.len() < HEADER_LEN {
        return Err(TransportError::Malformed(format!(
            "{} byte datagram is shorter than the header",
            datagram.len()
        )));
    }
    let mut seq_bytes = [0u8; 4];
    seq_bytes.copy_from_slice(&datagram[1..HEADER_LEN]);
    let seq = u32::from_be_bytes(seq_bytes);
    let body = &datagram[HEADER_LEN..];

    match datagram[0] {
        KIND_DATA => Ok(Packet::Data {
            seq,
            body: body.to_vec(),
        }),
        KIND_ACK if body == ACK_BODY => Ok(Packet::Ack { seq }),
        KIND_ACK => Err(TransportError::Malformed("bad acknowledgment body".into())),
        kind => Err(TransportError::Malformed(format!("unknown kind 0x{kind:02x}"))),
    }
}

/// Acknowledged, sequenced frame link to one peer
pub struct FrameLink<D = UdpSocket> {
    socket: D,
    ack_timeout: Duration,
    max_retries: u32,
    receive_timeout: Duration,
    max_datagram_len: usize,
    verbose: bool,
    send_seq: u32,
    recv_seq: u32,
    inbox: VecDeque<Vec<u8>>,
    stats: LinkStats,
}

impl FrameLink<UdpSocket> {
    /// Bind the socket to `peer` and wrap it
    pub async fn connect(
        socket: UdpSocket,
        peer: SocketAddr,
        config: &QsslConfig,
    ) -> Result<Self, TransportError> {
        socket.connect(peer).await?;
        tracing::debug!(%peer, "frame link connected");
        Ok(Self::new(socket, config))
    }

    /// Wait for the first datagram and lock the link to its sender
    ///
    /// The datagram is only peeked, so it is still delivered by the next
    /// `receive`.
    pub async fn accept(socket: UdpSocket, config: &QsslConfig) -> Result<Self, TransportError> {
        let mut probe = vec![0u8; config.max_datagram_len + 1];
        let (_, peer) = socket.peek_from(&mut probe).await?;
        socket.connect(peer).await?;
        tracing::debug!(%peer, "frame link accepted peer");
        Ok(Self::new(socket, config))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

impl<D: Datagram> FrameLink<D> {
    pub fn new(socket: D, config: &QsslConfig) -> Self {
        Self {
            socket,
            ack_timeout: config.ack_timeout,
            max_retries: config.max_retries,
            receive_timeout: config.receive_timeout,
            max_datagram_len: config.max_datagram_len,
            verbose: config.verbose_logging,
            send_seq: 0,
            recv_seq: 0,
            inbox: VecDeque::new(),
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Send `label` then `payload`, each acknowledged before continuing
    pub async fn send(&mut self, label: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.check_body_len(label.len().max(payload.len()))?;
        self.send_datagram(label.as_bytes()).await?;
        self.send_datagram(payload).await?;
        self.stats.frames_sent += 1;
        if self.verbose {
            tracing::debug!(label, len = payload.len(), "frame sent");
        }
        Ok(())
    }

    /// Block until a full label and payload pair has arrived
    pub async fn receive(&mut self) -> Result<Frame, TransportError> {
        let label = self.recv_datagram().await?;
        let payload = self.recv_datagram().await?;
        self.stats.frames_received += 1;
        let frame = Frame { label, payload };
        if self.verbose {
            tracing::debug!(label = %frame.label_str(), len = frame.len(), "frame received");
        }
        Ok(frame)
    }

    /// Receive a frame and return its payload only if the label matches
    pub async fn receive_expected(&mut self, label: &str) -> Result<Vec<u8>, TransportError> {
        let frame = self.receive().await?;
        if !frame.has_label(label) {
            return Err(TransportError::UnexpectedLabel {
                expected: label.to_string(),
                got: frame.label_str().into_owned(),
            });
        }
        Ok(frame.payload)
    }

    fn check_body_len(&self, len: usize) -> Result<(), TransportError> {
        if HEADER_LEN + len > self.max_datagram_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_datagram_len.saturating_sub(HEADER_LEN),
            });
        }
        Ok(())
    }

    async fn send_datagram(&mut self, body: &[u8]) -> Result<(), TransportError> {
        let seq = self.send_seq;
        let packet = encode_data(seq, body);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                self.stats.retransmissions += 1;
                tracing::warn!(seq, attempt, "no acknowledgment, retransmitting");
            }
            self.socket.send(&packet).await?;
            self.stats.datagrams_sent += 1;

            let deadline = Instant::now() + self.ack_timeout;
            loop {
                let datagram = match timeout_at(deadline, self.recv_raw()).await {
                    Ok(result) => result?,
                    Err(_) => break,
                };
                match decode(&datagram)? {
                    Packet::Ack { seq: acked } if acked == seq => {
                        self.send_seq = seq.wrapping_add(1);
                        return Ok(());
                    }
                    Packet::Ack { seq: stale } => {
                        tracing::debug!(stale, expected = seq, "ignoring stale acknowledgment");
                    }
                    Packet::Data { seq: peer_seq, body } => {
                        self.on_data(peer_seq, body).await?;
                    }
                }
            }
        }

        Err(TransportError::AckTimeout {
            seq,
            attempts: self.max_retries + 1,
        })
    }

    async fn recv_datagram(&mut self) -> Result<Vec<u8>, TransportError> {
        if let Some(body) = self.inbox.pop_front() {
            return Ok(body);
        }

        let deadline = Instant::now() + self.receive_timeout;
        loop {
            let datagram = timeout_at(deadline, self.recv_raw())
                .await
                .map_err(|_| TransportError::ReceiveTimeout(self.receive_timeout))??;
            match decode(&datagram)? {
                Packet::Data { seq, body } => {
                    self.on_data(seq, body).await?;
                    if let Some(body) = self.inbox.pop_front() {
                        return Ok(body);
                    }
                }
                Packet::Ack { seq } => {
                    tracing::debug!(seq, "ignoring acknowledgment while receiving");
                }
            }
        }
    }

    /// Queue an in-order datagram and acknowledge it; re-acknowledge duplicates.
    ///
    /// State is updated before the ack goes out so a cancelled caller never
    /// loses an acknowledged datagram.
    async fn on_data(&mut self, seq: u32, body: Vec<u8>) -> Result<(), TransportError> {
        if seq == self.recv_seq {
            self.recv_seq = seq.wrapping_add(1);
            self.inbox.push_back(body);
        } else if (seq.wrapping_sub(self.recv_seq) as i32) < 0 {
            self.stats.duplicates += 1;
            tracing::debug!(seq, "duplicate datagram, re-acknowledging");
        } else {
            return Err(TransportError::Malformed(format!(
                "datagram {seq} skips ahead of expected {}",
                self.recv_seq
            )));
        }
        self.socket.send(&encode_ack(seq)).await?;
        Ok(())
    }

    async fn recv_raw(&self) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; self.max_datagram_len + 1];
        let len = self.socket.recv(&mut buf).await?;
        if len > self.max_datagram_len {
            return Err(TransportError::Malformed(format!(
                "datagram exceeds {} bytes",
                self.max_datagram_len
            )));
        }
        buf.truncate(len);
        Ok(buf)
    }

    /// Wait briefly for trailing retransmissions and acknowledge them.
    ///
    /// Used after the last frame of a conversation so a lost final ack does
    /// not leave the peer retrying into a closed socket.
    pub async fn linger(&mut self, window: Duration) -> Result<(), TransportError> {
        while let Ok(datagram) = timeout(window, self.recv_raw()).await {
            if let Packet::Data { seq, body } = decode(&datagram?)? {
                self.on_data(seq, body).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Drops the first `drop_first` outgoing datagrams
    pub(crate) struct LossySocket {
        inner: UdpSocket,
        drop_first: AtomicUsize,
    }

    impl LossySocket {
        pub(crate) fn new(inner: UdpSocket, drop_first: usize) -> Self {
            Self {
                inner,
                drop_first: AtomicUsize::new(drop_first),
            }
        }
    }

    #[async_trait]
    impl Datagram for LossySocket {
        async fn send(&self, buf: &[u8]) -> io::Result<usize> {
            let remaining = self.drop_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.drop_first.store(remaining - 1, Ordering::SeqCst);
                return Ok(buf.len());
            }
            self.inner.send(buf).await
        }

        async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.recv(buf).await
        }
    }

    pub(crate) async fn socket_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        (a, b)
    }

    fn fast_config() -> QsslConfig {
        QsslConfig::builder()
            .ack_timeout(Duration::from_millis(50))
            .max_retries(3)
            .receive_timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_ack_wire_format() {
        let ack = encode_ack(7);
        assert_eq!(ack, [0x02, 0, 0, 0, 7, b'O', b'k']);
        assert_eq!(decode(&ack).unwrap(), Packet::Ack { seq: 7 });
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(&[0x01, 0]), Err(TransportError::Malformed(_))));
        assert!(matches!(
            decode(&[0x09, 0, 0, 0, 0]),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            decode(&[0x02, 0, 0, 0, 0, b'N', b'o']),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_data_body_length_is_datagram_minus_header() {
        let packet = encode_data(1, b"payload");
        assert_eq!(packet.len(), HEADER_LEN + 7);
        assert_eq!(
            decode(&packet).unwrap(),
            Packet::Data {
                seq: 1,
                body: b"payload".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (a, b) = socket_pair().await;
        let config = fast_config();
        let mut sender = FrameLink::new(a, &config);
        let mut receiver = FrameLink::new(b, &config);

        let (sent, received) = tokio::join!(
            sender.send("greeting", b"hello over udp"),
            receiver.receive()
        );
        sent.unwrap();
        let frame = received.unwrap();
        assert!(frame.has_label("greeting"));
        assert_eq!(frame.payload, b"hello over udp");
        assert_eq!(frame.len(), 14);
        assert_eq!(sender.stats().frames_sent, 1);
        assert_eq!(receiver.stats().frames_received, 1);
    }

    #[tokio::test]
    async fn test_empty_payload_frame() {
        let (a, b) = socket_pair().await;
        let config = fast_config();
        let mut sender = FrameLink::new(a, &config);
        let mut receiver = FrameLink::new(b, &config);

        let (sent, received) = tokio::join!(sender.send("close", &[]), receiver.receive());
        sent.unwrap();
        let frame = received.unwrap();
        assert!(frame.has_label("close"));
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn test_lost_datagrams_are_retransmitted() {
        let (a, b) = socket_pair().await;
        let config = fast_config();
        let mut sender = FrameLink::new(LossySocket::new(a, 2), &config);
        let mut receiver = FrameLink::new(b, &config);

        let (sent, received) = tokio::join!(sender.send("label", b"survives loss"), receiver.receive());
        sent.unwrap();
        assert_eq!(received.unwrap().payload, b"survives loss");
        assert_eq!(sender.stats().retransmissions, 2);
    }

    #[tokio::test]
    async fn test_lost_ack_produces_duplicate_not_double_delivery() {
        let (a, b) = socket_pair().await;
        let config = fast_config();
        let mut sender = FrameLink::new(a, &config);
        // first ack from the receiver is dropped
        let mut receiver = FrameLink::new(LossySocket::new(b, 1), &config);

        let (sent, received) = tokio::join!(
            async {
                sender.send("one", b"first").await?;
                sender.send("two", b"second").await
            },
            async {
                let first = receiver.receive().await?;
                let second = receiver.receive().await?;
                Ok::<_, TransportError>((first, second))
            }
        );
        sent.unwrap();
        let (first, second) = received.unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!(second.payload, b"second");
        assert_eq!(receiver.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (a, _b) = socket_pair().await;
        let config = fast_config();
        let mut sender = FrameLink::new(a, &config);

        let err = sender.send("label", b"nobody listening").await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::AckTimeout {
                seq: 0,
                attempts: 4
            }
        ));
        assert_eq!(sender.stats().datagrams_sent, 4);
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let (a, _b) = socket_pair().await;
        let config = QsslConfig::builder()
            .receive_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let mut receiver = FrameLink::new(a, &config);
        assert!(matches!(
            receiver.receive().await,
            Err(TransportError::ReceiveTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_expected_label_mismatch() {
        let (a, b) = socket_pair().await;
        let config = fast_config();
        let mut sender = FrameLink::new(a, &config);
        let mut receiver = FrameLink::new(b, &config);

        let (sent, received) = tokio::join!(
            sender.send("kem-ciphertext", b"ct"),
            receiver.receive_expected("classical-ciphertext")
        );
        sent.unwrap();
        match received {
            Err(TransportError::UnexpectedLabel { expected, got }) => {
                assert_eq!(expected, "classical-ciphertext");
                assert_eq!(got, "kem-ciphertext");
            }
            other => panic!("expected label mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected_before_sending() {
        let (a, _b) = socket_pair().await;
        let config = fast_config();
        let mut sender = FrameLink::new(a, &config);
        let payload = vec![0u8; MAX_DATAGRAM_LEN];
        assert!(matches!(
            sender.send("big", &payload).await,
            Err(TransportError::FrameTooLarge { .. })
        ));
        assert_eq!(sender.stats().datagrams_sent, 0);
    }

    #[tokio::test]
    async fn test_accept_learns_peer() {
        let config = fast_config();
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let (accepted, connected) = tokio::join!(
            async {
                let mut link = FrameLink::accept(server, &config).await?;
                let frame = link.receive().await?;
                Ok::<_, TransportError>((link.peer_addr()?, frame))
            },
            async {
                let mut link = FrameLink::connect(client, server_addr, &config).await?;
                link.send("hello", b"from client").await
            }
        );
        connected.unwrap();
        let (peer, frame) = accepted.unwrap();
        assert_eq!(peer, client_addr);
        assert_eq!(frame.payload, b"from client");
    }
}
