//! Proxy session cookie minted from a shared secret.
//!
//! Gateways reached through the hosted proxy live at
//! `<tenant>.proxy.octoclaw.ai`. The proxy admits a WebSocket upgrade when it
//! carries an `octoclaw_session` cookie whose HS256 token names that tenant.
//! The cookie is transport metadata only; the gateway never reads it.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::jwt::{JwtClaims, create_hs256};

pub const OCTOCLAW_SESSION_COOKIE_NAME: &str = "octoclaw_session";
pub const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60 * 24;

const PROXY_HOST_SUFFIX: &str = ".proxy.octoclaw.ai";

/// Extract the tenant id from a proxy hostname.
///
/// The prefix must be a single label made of hex digits and hyphens, which
/// covers both numeric ids and UUIDs.
pub fn tenant_from_proxy_host(host: &str) -> Option<&str> {
    let prefix = host.strip_suffix(PROXY_HOST_SUFFIX)?;
    if prefix.is_empty() || prefix.contains('.') {
        return None;
    }
    prefix
        .chars()
        .all(|c| c.is_ascii_hexdigit() || c == '-')
        .then_some(prefix)
}

/// Build `octoclaw_session=<token>` for `endpoint`, or `None` when there is
/// no secret or the endpoint is not a tenant proxy host.
///
/// `now_secs` defaults to the system clock.
pub fn mint_session_cookie(
    endpoint: &str,
    shared_secret: Option<&str>,
    now_secs: Option<u64>,
    max_age_secs: u64,
) -> Option<String> {
    let secret = shared_secret.filter(|s| !s.is_empty())?;
    let url = url::Url::parse(endpoint).ok()?;
    let tenant = tenant_from_proxy_host(url.host_str()?)?;

    let now = now_secs.unwrap_or_else(unix_now_secs);
    let claims = JwtClaims {
        sub: tenant.to_string(),
        iat: now,
        exp: now.saturating_add(max_age_secs),
        email: None,
    };
    let token = create_hs256(&claims, secret.as_bytes()).ok()?;
    Some(format!("{OCTOCLAW_SESSION_COOKIE_NAME}={token}"))
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
