use crate::error::CryptoError;

pub trait Signature: Sized + Clone {
    fn as_bytes(&self) -> &[u8];
    fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
}

pub trait SigningKey: Sized {
    type VerifyKey: VerifyKey<Signature = Self::Signature>;
    type Signature: Signature;

    fn generate() -> Result<Self, CryptoError>;
    fn sign(&self, message: &[u8]) -> Result<Self::Signature, CryptoError>;
    fn verify_key(&self) -> Self::VerifyKey;
}

pub trait VerifyKey: Sized + Clone {
    type Signature: Signature;

    fn verify(&self, message: &[u8], signature: &Self::Signature) -> Result<(), CryptoError>;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
}

pub trait KemPublicKey: Sized + Clone {
    type Ciphertext: Sized + Clone;
    type SharedSecret: Sized;

    fn encapsulate(&self) -> Result<(Self::Ciphertext, Self::SharedSecret), CryptoError>;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
}

pub trait KemKeyPair: Sized {
    type PublicKey: KemPublicKey<Ciphertext = Self::Ciphertext, SharedSecret = Self::SharedSecret>;
    type Ciphertext: Sized + Clone;
    type SharedSecret: Sized;

    fn generate() -> Result<Self, CryptoError>;
    fn decapsulate(&self, ciphertext: &Self::Ciphertext)
        -> Result<Self::SharedSecret, CryptoError>;
    fn public_key(&self) -> Self::PublicKey;
}

/// Public half of an asymmetric encryption key pair.
pub trait EncryptionPublicKey: Sized + Clone {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
}

pub trait EncryptionKeyPair: Sized {
    type PublicKey: EncryptionPublicKey;

    fn generate() -> Result<Self, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<zeroize::Zeroizing<Vec<u8>>, CryptoError>;
    fn public_key(&self) -> Self::PublicKey;
}
