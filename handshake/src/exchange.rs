//! Ordered public-key exchange
//!
//! Each side transmits its encryption, signing, KEM and post-quantum
//! signing keys in that order, each behind a label frame. Incoming keys are
//! identified by position only; labels are logged but never trusted.

use async_trait::async_trait;

use crate::error::{KeyExchangeError, Result};
use crate::frame::{Datagram, FrameLink};
use crate::keys::{KeyRole, PeerKeysBuilder, PeerPublicKeys, PublicKeySet};
use crate::session::Role;

/// Runs the public-key exchange phase over a frame link
#[async_trait]
pub trait KeyExchanger {
    async fn exchange<D: Datagram>(
        &self,
        link: &mut FrameLink<D>,
        local: &PublicKeySet,
    ) -> Result<PeerPublicKeys>;
}

/// Fixed-order exchange: the initiator sends first, the responder receives first
pub struct OrderedKeyExchange {
    role: Role,
}

impl OrderedKeyExchange {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    async fn send_keys<D: Datagram>(
        &self,
        link: &mut FrameLink<D>,
        local: &PublicKeySet,
    ) -> Result<()> {
        for role in KeyRole::EXCHANGE_ORDER {
            link.send(role.label(), &local.encode(role)).await?;
            tracing::debug!(
                side = %self.role,
                %role,
                fingerprint = %local.fingerprint(role),
                "sent public key"
            );
        }
        Ok(())
    }

    async fn receive_keys<D: Datagram>(&self, link: &mut FrameLink<D>) -> Result<PeerPublicKeys> {
        let mut builder = PeerKeysBuilder::new();
        for role in KeyRole::EXCHANGE_ORDER {
            let frame = link.receive().await?;
            if !frame.has_label(role.label()) {
                tracing::debug!(
                    side = %self.role,
                    position = %role,
                    label = %frame.label_str(),
                    "label does not name the key at this position"
                );
            }
            builder.accept(role, &frame.payload)?;
        }
        Ok(builder.build().ok_or(KeyExchangeError::Incomplete)?)
    }
}

#[async_trait]
impl KeyExchanger for OrderedKeyExchange {
    async fn exchange<D: Datagram>(
        &self,
        link: &mut FrameLink<D>,
        local: &PublicKeySet,
    ) -> Result<PeerPublicKeys> {
        let peer = match self.role {
            Role::Initiator => {
                self.send_keys(link, local).await?;
                self.receive_keys(link).await?
            }
            Role::Responder => {
                let peer = self.receive_keys(link).await?;
                self.send_keys(link, local).await?;
                peer
            }
        };
        tracing::info!(
            side = %self.role,
            peer_signing = %peer.as_set().fingerprint(KeyRole::Signing),
            peer_pq_signing = %peer.as_set().fingerprint(KeyRole::PqSigning),
            "public key exchange complete"
        );
        Ok(peer)
    }
}
