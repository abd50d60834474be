//! Credentials presented by a gateway client.
//!
//! - [`session_cookie`]: HS256-signed proxy session cookie, scoped to the
//!   tenant encoded in the gateway hostname.
//! - [`device`]: Ed25519 device identity and the canonical handshake payload
//!   it signs.

pub mod base64url;
pub mod device;
pub mod error;
pub mod jwt;
pub mod session_cookie;

pub use {
    device::{DeviceAuthPayload, DeviceIdentity, verify_device_signature},
    error::{Error, Result},
    jwt::{JwtClaims, create_hs256, verify_hs256},
    session_cookie::{
        DEFAULT_MAX_AGE_SECS, OCTOCLAW_SESSION_COOKIE_NAME, mint_session_cookie,
        tenant_from_proxy_host,
    },
};
