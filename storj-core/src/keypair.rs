//! Key material for the Storj client
//!
//! A `KeyPair` wraps a secp256k1 private scalar and derives the compressed
//! public key, the 160-bit node identifier, and the base58check payment
//! address from it. Keys are immutable for the life of the process.

use crate::crypto::{sha256_rmd160, CONTENT_HASH_SIZE};
use crate::error::{CoreError, Result};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use std::fmt;

/// WIF version byte for mainnet private keys
const WIF_VERSION: u8 = 0x80;

/// Address version byte
const ADDRESS_VERSION: u8 = 0x00;

/// A secp256k1 keypair with address derivation and message signing
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new keypair from OS randomness
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Create a keypair from a 32-byte private scalar
    pub fn from_private_key(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| CoreError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// Create a keypair from a hex-encoded private scalar
    pub fn from_private_key_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)?;
        Self::from_private_key(&bytes)
    }

    /// Decode a WIF-encoded private key (version byte 0x80, optional
    /// trailing 0x01 compression marker)
    pub fn from_wif(wif: &str) -> Result<Self> {
        let payload = bs58::decode(wif)
            .with_check(None)
            .into_vec()
            .map_err(|e| CoreError::InvalidWif(e.to_string()))?;

        if payload.first() != Some(&WIF_VERSION) {
            return Err(CoreError::InvalidWif(format!(
                "unexpected version byte: {:#04x}",
                payload.first().copied().unwrap_or(0)
            )));
        }

        let key_bytes = match payload.len() {
            33 => &payload[1..33],
            34 if payload[33] == 0x01 => &payload[1..33],
            n => {
                return Err(CoreError::InvalidWif(format!(
                    "unexpected payload length: {}",
                    n
                )))
            }
        };

        Self::from_private_key(key_bytes)
    }

    /// Encode the private key as compressed WIF
    pub fn to_wif(&self) -> String {
        let mut payload = Vec::with_capacity(34);
        payload.push(WIF_VERSION);
        payload.extend_from_slice(&self.signing_key.to_bytes());
        payload.push(0x01);
        bs58::encode(payload).with_check().into_string()
    }

    /// Hex-encoded private scalar
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// 33-byte compressed public key
    pub fn public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// Hex-encoded compressed public key (`x-pubkey` header value)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// 160-bit node identifier: `rmd160(sha256(pubkey))`, hex encoded
    pub fn node_id(&self) -> String {
        hex::encode(sha256_rmd160(&self.public_key()))
    }

    /// Base58check payment address derived from the public key
    pub fn address(&self) -> String {
        let mut payload = Vec::with_capacity(1 + CONTENT_HASH_SIZE);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(&sha256_rmd160(&self.public_key()));
        bs58::encode(payload).with_check().into_string()
    }

    /// Sign `message` (hashed with SHA-256) and return the DER signature
    /// as hex (`x-signature` header value)
    pub fn sign(&self, message: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(message);
        hex::encode(signature.to_der())
    }

    /// Sign `message` with a recoverable signature: 65 hex-encoded bytes,
    /// recovery id first, then the 64-byte compact signature
    pub fn sign_recoverable(&self, message: &[u8]) -> Result<String> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_recoverable(message)
            .map_err(|e| CoreError::Signing(e.to_string()))?;

        let mut out = Vec::with_capacity(65);
        out.push(recovery_id.to_byte());
        out.extend_from_slice(signature.to_bytes().as_slice());
        Ok(hex::encode(out))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.node_id())
    }
}

/// Recover the compressed public key from a recoverable signature
/// produced by [`KeyPair::sign_recoverable`].
pub fn recover_public_key(message: &[u8], signature_hex: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(signature_hex)?;
    if bytes.len() != 65 {
        return Err(CoreError::InvalidHashLength {
            expected: 65,
            actual: bytes.len(),
        });
    }

    let recovery_id =
        RecoveryId::from_byte(bytes[0]).ok_or(CoreError::SignatureInvalid)?;
    let signature =
        Signature::from_slice(&bytes[1..]).map_err(|_| CoreError::SignatureInvalid)?;

    let key = VerifyingKey::recover_from_msg(message, &signature, recovery_id)
        .map_err(|_| CoreError::SignatureInvalid)?;

    Ok(key.to_encoded_point(true).as_bytes().to_vec())
}

/// Verify a recoverable signature against a known compressed public key.
pub fn verify_with_key(public_key: &[u8], message: &[u8], signature_hex: &str) -> Result<()> {
    let bytes = hex::decode(signature_hex)?;
    if bytes.len() != 65 {
        return Err(CoreError::SignatureInvalid);
    }

    let signature =
        Signature::from_slice(&bytes[1..]).map_err(|_| CoreError::SignatureInvalid)?;
    let key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CoreError::SignatureInvalid)?;

    key.verify(message, &signature)
        .map_err(|_| CoreError::SignatureInvalid)
}
