//! Device identity signing for the `connect` handshake.
//!
//! The gateway rebuilds the signed payload from the `connect` params it
//! receives and checks the detached signature against the raw public key.
//! [`DeviceAuthPayload::to_canonical_string`] must therefore stay
//! byte-identical to the gateway's construction, field order included.

use {
    ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey},
    sha2::{Digest, Sha256},
};

use crate::{Error, Result, base64url};

/// A long-lived Ed25519 identity. Persistence is the caller's concern; the
/// client only reads it.
pub struct DeviceIdentity {
    device_id: String,
    signing_key: SigningKey,
}

impl DeviceIdentity {
    /// Device id is the lowercase hex SHA-256 of the raw public key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let device_id = hex::encode(Sha256::digest(signing_key.verifying_key().as_bytes()));
        Self {
            device_id,
            signing_key,
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    /// Parse a 32-byte seed given as 64 hex characters (surrounding
    /// whitespace ignored).
    pub fn from_hex_seed(hex_seed: &str) -> Result<Self> {
        let bytes = hex::decode(hex_seed.trim()).map_err(|e| Error::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey("seed must be 32 bytes".into()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Fresh random identity, for tests and throwaway clients.
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// The seed as 64 hex characters, the format [`from_hex_seed`] reads.
    ///
    /// [`from_hex_seed`]: DeviceIdentity::from_hex_seed
    pub fn to_hex_seed(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Raw 32-byte public key, unpadded base64url (no PEM/SPKI wrapping).
    pub fn public_key_base64url(&self) -> String {
        base64url::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Detached signature over the canonical payload, unpadded base64url.
    pub fn sign(&self, payload: &DeviceAuthPayload<'_>) -> String {
        let signature = self
            .signing_key
            .sign(payload.to_canonical_string().as_bytes());
        base64url::encode(signature.to_bytes())
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

/// Inputs bound into a device signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthPayload<'a> {
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: u64,
    pub token: Option<&'a str>,
    pub nonce: Option<&'a str>,
}

impl DeviceAuthPayload<'_> {
    /// `v1|device|client|mode|role|scopes|signedAtMs|token` without a nonce,
    /// `v2|...|token|nonce` with one. A missing token is the empty string;
    /// scopes are comma-joined. `Some("")` still selects `v2`.
    pub fn to_canonical_string(&self) -> String {
        let version = if self.nonce.is_some() {
            "v2"
        } else {
            "v1"
        };
        let signed_at = self.signed_at_ms.to_string();
        let scopes = self.scopes.join(",");
        let mut fields = vec![
            version,
            self.device_id,
            self.client_id,
            self.client_mode,
            self.role,
            scopes.as_str(),
            signed_at.as_str(),
            self.token.unwrap_or_default(),
        ];
        if let Some(nonce) = self.nonce {
            fields.push(nonce);
        }
        fields.join("|")
    }
}

/// Verify a base64url signature over `payload` with a base64url raw public key.
pub fn verify_device_signature(
    public_key_b64: &str,
    payload: &DeviceAuthPayload<'_>,
    signature_b64: &str,
) -> Result<()> {
    let key_bytes: [u8; 32] = base64url::decode(public_key_b64)?
        .try_into()
        .map_err(|_| Error::InvalidKey("public key must be 32 bytes".into()))?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let signature = Signature::from_slice(&base64url::decode(signature_b64)?)
        .map_err(|_| Error::InvalidSignature)?;
    key.verify(payload.to_canonical_string().as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)
}
