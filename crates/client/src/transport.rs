//! WebSocket transport: cookie attachment and connection open.

use std::{
    borrow::Cow,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    clawlink_auth::{DEFAULT_MAX_AGE_SECS, OCTOCLAW_SESSION_COOKIE_NAME, mint_session_cookie},
    secrecy::ExposeSecret,
    tokio::net::TcpStream,
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream,
        tungstenite::{
            client::IntoClientRequest,
            http::{HeaderValue, Uri, header::COOKIE},
            protocol::WebSocketConfig,
        },
    },
    tracing::debug,
};

use crate::{Result, options::ClientOptions};

/// Stream type returned by `tokio_tungstenite::connect_async`.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where the `Cookie` header came from, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSource {
    Manual,
    Auto,
    None,
}

impl CookieSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::None => "none",
        }
    }
}

/// Pick the cookie for the upgrade request: an explicit cookie always wins,
/// otherwise a proxy session cookie is minted when possible.
pub fn resolve_cookie(options: &ClientOptions, now_secs: u64) -> (Option<String>, CookieSource) {
    if let Some(cookie) = &options.cookie {
        return (Some(cookie.expose_secret().clone()), CookieSource::Manual);
    }
    let minted = mint_session_cookie(
        &options.url,
        options
            .proxy_jwt_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str()),
        Some(now_secs),
        DEFAULT_MAX_AGE_SECS,
    );
    match minted {
        Some(cookie) => (Some(cookie), CookieSource::Auto),
        None => (None, CookieSource::None),
    }
}

/// Open the WebSocket, attaching the resolved cookie to the upgrade request.
pub async fn open(options: &ClientOptions, has_device_identity: bool) -> Result<WsStream> {
    let (cookie, cookie_source) = resolve_cookie(options, unix_now_secs());
    debug!(
        url = %options.url,
        cookie_source = cookie_source.as_str(),
        has_octoclaw_session = cookie
            .as_deref()
            .is_some_and(|c| c.contains(&format!("{OCTOCLAW_SESSION_COOKIE_NAME}="))),
        device_identity = has_device_identity,
        "ws connect"
    );

    let mut request = normalize_scheme(&options.url).as_ref().into_client_request()?;
    if is_tls(request.uri()) {
        // Another component may have installed a provider already.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_str(&cookie)?);
    }

    let config = WebSocketConfig::default()
        .max_message_size(Some(options.max_message_bytes))
        .max_frame_size(Some(options.max_message_bytes));
    let (stream, _response) =
        tokio_tungstenite::connect_async_with_config(request, Some(config), false).await?;
    Ok(stream)
}

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Lowercase the URL scheme; the handshake only recognizes `ws` and `wss`.
fn normalize_scheme(url: &str) -> Cow<'_, str> {
    match url.split_once("://") {
        Some((scheme, rest)) if scheme.bytes().any(|b| b.is_ascii_uppercase()) => {
            Cow::Owned(format!("{}://{rest}", scheme.to_ascii_lowercase()))
        },
        _ => Cow::Borrowed(url),
    }
}

/// `wss` in any letter case.
fn is_tls(uri: &Uri) -> bool {
    uri.scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("wss"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, secrecy::Secret};

    const PROXY_URL: &str = "wss://f47ac10b-58cc-4372-a567-0e02b2c3d479.proxy.octoclaw.ai/ws";

    #[test]
    fn explicit_cookie_wins_over_minted() {
        let opts = ClientOptions {
            cookie: Some(Secret::new("a=b".into())),
            proxy_jwt_secret: Some(Secret::new("s3cret".into())),
            ..ClientOptions::new(PROXY_URL)
        };
        let (cookie, source) = resolve_cookie(&opts, 1);
        assert_eq!(cookie.as_deref(), Some("a=b"));
        assert_eq!(source, CookieSource::Manual);
    }

    #[test]
    fn minted_cookie_for_proxy_host() {
        let opts = ClientOptions {
            proxy_jwt_secret: Some(Secret::new("s3cret".into())),
            ..ClientOptions::new(PROXY_URL)
        };
        let (cookie, source) = resolve_cookie(&opts, 1);
        assert!(cookie.unwrap().starts_with("octoclaw_session="));
        assert_eq!(source, CookieSource::Auto);
    }

    #[test]
    fn no_cookie_without_secret_or_proxy_host() {
        let (cookie, source) = resolve_cookie(&ClientOptions::new(PROXY_URL), 1);
        assert!(cookie.is_none());
        assert_eq!(source, CookieSource::None);

        let opts = ClientOptions {
            proxy_jwt_secret: Some(Secret::new("s3cret".into())),
            ..ClientOptions::new("wss://gw.example.com")
        };
        assert_eq!(resolve_cookie(&opts, 1).1, CookieSource::None);
    }

    #[tokio::test]
    async fn open_fails_for_invalid_url() {
        let err = open(&ClientOptions::new("not a url"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Transport(_)));
    }

    #[test]
    fn tls_detection_ignores_scheme_case() {
        assert!(is_tls(&"wss://gw/ws".parse().unwrap()));
        assert!(is_tls(&"WSS://gw/ws".parse().unwrap()));
        assert!(!is_tls(&"ws://gw/ws".parse().unwrap()));
    }

    #[test]
    fn scheme_is_lowercased_for_the_handshake() {
        assert_eq!(normalize_scheme("WSS://GW.example.com/ws"), "wss://GW.example.com/ws");
        assert!(matches!(normalize_scheme("ws://gw"), Cow::Borrowed("ws://gw")));
        let request = normalize_scheme("Wss://gw/ws").as_ref().into_client_request().unwrap();
        assert!(is_tls(request.uri()));
    }
}
