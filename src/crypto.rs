//! Cryptographic primitives for MyCoin (secp256k1 ECDSA)

use crate::error::ChainError;
use crate::hashing;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Number of hex characters of the public key hash kept in an address.
const ADDRESS_HEX_LEN: usize = 40;

/// Derives the wallet address for a compressed public key:
/// `0x` followed by the first 20 bytes of its SHA-256, hex encoded.
pub fn address_from_public_key(public_key: &PublicKey) -> String {
    let digest = hex::encode(Sha256::digest(public_key.serialize()));
    format!("0x{}", &digest[..ADDRESS_HEX_LEN])
}

/// Checks the textual shape of an address.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(rest) => rest.len() == ADDRESS_HEX_LEN && rest.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(secret_key)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::InvalidKey(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::InvalidKey(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    /// Parses a hex encoded secret key.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(hex_str.trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidKey(format!("Secret key is not valid hex: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key)
    }

    /// Compressed public key, hex encoded.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Signs a 32-byte digest and returns the compact signature bytes.
    pub fn sign_digest(&self, digest: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], ChainError> {
        let message = Message::from_digest_slice(digest)
            .map_err(|e| ChainError::InvalidKey(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }
}

/// Output of [`sign`]: the hex signature and the hex digest it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDigest {
    pub signature: String,
    pub digest: String,
}

/// Signs the canonical digest of `payload` with a hex encoded private key.
pub fn sign<T: Serialize + ?Sized>(private_key: &str, payload: &T) -> Result<SignedDigest, ChainError> {
    let keypair = KeyPair::from_secret_hex(private_key)?;
    let digest = hashing::digest(payload)?;
    let digest_bytes = hex::decode(&digest)
        .map_err(|e| ChainError::InvalidKey(format!("Digest is not valid hex: {}", e)))?;
    let signature = keypair.sign_digest(&digest_bytes)?;

    Ok(SignedDigest {
        signature: hex::encode(signature),
        digest,
    })
}

/// Verifies a hex signature over the canonical digest of `payload`.
///
/// A well-formed signature that does not match yields `Ok(false)`; a key or
/// signature that cannot be decoded yields `InvalidSignatureEncoding`.
pub fn verify<T: Serialize + ?Sized>(
    public_key: &str,
    payload: &T,
    signature: &str,
) -> Result<bool, ChainError> {
    let public_key_bytes = hex::decode(public_key.trim_start_matches("0x")).map_err(|e| {
        ChainError::InvalidSignatureEncoding(format!("Public key is not valid hex: {}", e))
    })?;
    let public_key = PublicKey::from_slice(&public_key_bytes)
        .map_err(|e| ChainError::InvalidSignatureEncoding(format!("Invalid public key: {}", e)))?;

    let signature_bytes = hex::decode(signature).map_err(|e| {
        ChainError::InvalidSignatureEncoding(format!("Signature is not valid hex: {}", e))
    })?;
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::InvalidSignatureEncoding(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }
    let mut signature = Signature::from_compact(&signature_bytes)
        .map_err(|e| ChainError::InvalidSignatureEncoding(format!("Invalid signature: {}", e)))?;
    signature.normalize_s();

    let digest = Sha256::digest(hashing::canonical_bytes(payload)?);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| ChainError::InvalidSignatureEncoding(format!("Failed to create message: {}", e)))?;

    Ok(SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .is_ok())
}
