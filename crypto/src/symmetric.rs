//! AES-256-CBC channel cipher.
//!
//! Plaintext is padded with PKCS#7: every pad byte holds the pad length and a
//! whole block of padding is added to block-aligned input, so empty and
//! aligned messages survive the round trip.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const AES_KEY_LEN: usize = 32;
pub const AES_BLOCK_LEN: usize = 16;

pub type Iv = [u8; AES_BLOCK_LEN];

/// Encrypts under a fresh random IV and returns `(iv, ciphertext)`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<(Iv, Vec<u8>), CryptoError> {
    CryptoError::check_length(AES_KEY_LEN, key.len())?;

    let mut iv = [0u8; AES_BLOCK_LEN];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let ciphertext = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|_| CryptoError::InvalidKey)?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    Ok((iv, ciphertext))
}

pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    CryptoError::check_length(AES_KEY_LEN, key.len())?;
    CryptoError::check_length(AES_BLOCK_LEN, iv.len())?;
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::DecryptionFailed(format!(
            "ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            AES_BLOCK_LEN
        )));
    }

    let plaintext = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKey)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("bad padding".to_string()))?;
    Ok(Zeroizing::new(plaintext))
}
