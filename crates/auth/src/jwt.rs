//! Minimal HS256 compact tokens (`header.claims.signature`).

use {
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
};

use crate::{Error, Result, base64url};

type HmacSha256 = Hmac<Sha256>;

const ALG_HS256: &str = "HS256";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

/// Claims carried by a proxy session token. Times are seconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

fn mac_for(secret: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret).map_err(|e| Error::InvalidKey(e.to_string()))
}

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(base64url::encode(serde_json::to_vec(value)?))
}

/// Sign `claims` under `secret` and return the compact token.
pub fn create_hs256(claims: &JwtClaims, secret: &[u8]) -> Result<String> {
    let header = JwtHeader {
        alg: ALG_HS256.into(),
        typ: "JWT".into(),
    };
    let signing_input = format!("{}.{}", encode_json(&header)?, encode_json(claims)?);
    let mut mac = mac_for(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    Ok(format!("{signing_input}.{}", base64url::encode(signature)))
}

/// Check the signature of a compact HS256 token and return its claims.
///
/// Expiry is not enforced here; callers compare `exp` against their own clock.
pub fn verify_hs256(token: &str, secret: &[u8]) -> Result<JwtClaims> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::MalformedToken("expected three segments"));
    };

    let header: JwtHeader = serde_json::from_slice(&base64url::decode(header_b64)?)?;
    if header.alg != ALG_HS256 {
        return Err(Error::UnsupportedAlgorithm(header.alg));
    }

    let signature = base64url::decode(signature_b64)?;
    let mut mac = mac_for(secret)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(claims_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    Ok(serde_json::from_slice(&base64url::decode(claims_b64)?)?)
}
