//! Protected channel over the derived session key

use crypto::symmetric::{self, AES_BLOCK_LEN, AES_KEY_LEN};
use crypto::CryptoError;
use zeroize::Zeroizing;

use crate::error::ChannelError;

/// Largest plaintext accepted by the channel
pub const MAX_MESSAGE_LEN: usize = 1024;

/// IV and ciphertext of one message; travels as `iv || ciphertext`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedMessage {
    pub iv: [u8; AES_BLOCK_LEN],
    pub ciphertext: Vec<u8>,
}

impl SealedMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(AES_BLOCK_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChannelError> {
        if bytes.len() < 2 * AES_BLOCK_LEN {
            return Err(ChannelError::MalformedCiphertext(format!(
                "{} bytes is too short for an IV and one block",
                bytes.len()
            )));
        }
        let (iv_bytes, ciphertext) = bytes.split_at(AES_BLOCK_LEN);
        let mut iv = [0u8; AES_BLOCK_LEN];
        iv.copy_from_slice(iv_bytes);
        Ok(Self {
            iv,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Symmetric protection of application data
pub trait Channel {
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<SealedMessage, ChannelError>;
    fn decrypt(
        &self,
        key: &[u8],
        sealed: &SealedMessage,
    ) -> Result<Zeroizing<Vec<u8>>, ChannelError>;
}

/// AES-256-CBC with a fresh random IV per message
#[derive(Clone, Copy, Debug, Default)]
pub struct CbcChannel;

impl CbcChannel {
    pub fn new() -> Self {
        Self
    }
}

fn check_key(key: &[u8]) -> Result<(), ChannelError> {
    if key.len() != AES_KEY_LEN {
        return Err(ChannelError::InvalidKeyLength {
            expected: AES_KEY_LEN,
            actual: key.len(),
        });
    }
    Ok(())
}

impl Channel for CbcChannel {
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<SealedMessage, ChannelError> {
        check_key(key)?;
        if plaintext.len() > MAX_MESSAGE_LEN {
            return Err(ChannelError::MessageTooLong {
                len: plaintext.len(),
                max: MAX_MESSAGE_LEN,
            });
        }
        let (iv, ciphertext) =
            symmetric::encrypt(key, plaintext).map_err(ChannelError::Encryption)?;
        Ok(SealedMessage { iv, ciphertext })
    }

    fn decrypt(
        &self,
        key: &[u8],
        sealed: &SealedMessage,
    ) -> Result<Zeroizing<Vec<u8>>, ChannelError> {
        check_key(key)?;
        symmetric::decrypt(key, &sealed.iv, &sealed.ciphertext).map_err(|e| match e {
            CryptoError::DecryptionFailed(reason) => ChannelError::MalformedCiphertext(reason),
            other => ChannelError::MalformedCiphertext(other.to_string()),
        })
    }
}
