//! Construction of the `connect` request parameters.

use {
    clawlink_auth::{DeviceAuthPayload, DeviceIdentity},
    clawlink_protocol::{ClientInfo, ConnectAuth, ConnectParams, DeviceInfo},
};

use crate::options::ClientOptions;

/// Build `connect` params for one handshake attempt.
///
/// `nonce` is the value from a `connect.challenge` push, when one arrived in
/// time. It is bound into the device signature and echoed in the device block.
pub fn build_connect_params(
    options: &ClientOptions,
    identity: Option<&DeviceIdentity>,
    nonce: Option<&str>,
    signed_at_ms: u64,
) -> ConnectParams {
    let token = options.token_str();
    let password = options.password_str();
    let auth = (token.is_some() || password.is_some()).then(|| ConnectAuth {
        token: token.map(str::to_owned),
        password: password.map(str::to_owned),
    });

    let device = identity
        .filter(|_| !options.disable_device_identity)
        .map(|identity| {
            let payload = DeviceAuthPayload {
                device_id: identity.device_id(),
                client_id: &options.client_id,
                client_mode: &options.mode,
                role: &options.role,
                scopes: &options.scopes,
                signed_at_ms,
                token,
                nonce,
            };
            DeviceInfo {
                id: identity.device_id().to_owned(),
                public_key: identity.public_key_base64url(),
                signature: identity.sign(&payload),
                signed_at: signed_at_ms,
                nonce: nonce.map(str::to_owned),
            }
        });

    ConnectParams {
        min_protocol: options.min_protocol,
        max_protocol: options.max_protocol,
        client: ClientInfo {
            id: options.client_id.clone(),
            display_name: options.client_display_name.clone(),
            version: options.client_version.clone(),
            platform: options.platform.clone(),
            mode: options.mode.clone(),
            instance_id: options.instance_id.clone(),
        },
        caps: Some(options.caps.clone()),
        role: Some(options.role.clone()),
        scopes: Some(options.scopes.clone()),
        device,
        auth,
    }
}
