use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result, bail},
    clawlink_auth::DeviceIdentity,
    clawlink_client::ClientOptions,
    secrecy::Secret,
    tracing::debug,
};

/// Connection flags shared by every subcommand.
#[derive(clap::Args, Debug, Default)]
pub struct GatewayArgs {
    /// TOML file with client options; flags and environment override it.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Gateway WebSocket URL (ws:// or wss://).
    #[arg(long, global = true, env = "OPENCLAW_GATEWAY_URL")]
    pub url: Option<String>,

    #[arg(long, global = true, env = "OPENCLAW_GATEWAY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(
        long,
        global = true,
        env = "OPENCLAW_GATEWAY_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,

    /// Comma-separated operator scopes.
    #[arg(long, global = true, env = "OPENCLAW_GATEWAY_SCOPES")]
    pub scopes: Option<String>,

    /// Accepted for compatibility; certificate pinning is not performed.
    #[arg(long, global = true, env = "OPENCLAW_GATEWAY_TLS_FINGERPRINT")]
    pub tls_fingerprint: Option<String>,

    /// Cookie header sent on the WebSocket upgrade.
    #[arg(long, global = true, env = "OPENCLAW_GATEWAY_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Secret used to mint the proxy session cookie.
    #[arg(
        long,
        global = true,
        env = "OCTOCLAW_SESSION_JWT_SECRET",
        hide_env_values = true
    )]
    pub proxy_jwt_secret: Option<String>,

    /// Connect without a device identity (`1` or `true`).
    #[arg(
        long,
        global = true,
        env = "OPENCLAW_GATEWAY_DISABLE_DEVICE_IDENTITY",
        num_args = 0..=1,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    pub disable_device_identity: Option<String>,

    /// Hex Ed25519 seed for the device identity; created if missing.
    #[arg(
        long,
        global = true,
        env = "OPENCLAW_GATEWAY_DEVICE_KEY_FILE",
        value_name = "FILE"
    )]
    pub device_key_file: Option<PathBuf>,
}

impl GatewayArgs {
    /// Resolve client options: defaults, then the TOML profile, then flags and
    /// environment.
    pub fn client_options(&self, default_scopes: &[&str]) -> Result<ClientOptions> {
        let mut opts = match &self.config {
            Some(path) => load_profile(path)?,
            None => ClientOptions::default(),
        };

        if let Some(url) = &self.url {
            opts.url = url.clone();
        }
        if opts.url.trim().is_empty() {
            bail!("--url / OPENCLAW_GATEWAY_URL is required");
        }

        let secret = |value: &Option<String>| value.clone().map(Secret::new);
        if self.token.is_some() {
            opts.token = secret(&self.token);
        }
        if self.password.is_some() {
            opts.password = secret(&self.password);
        }
        if self.cookie.is_some() {
            opts.cookie = secret(&self.cookie);
        }
        if self.proxy_jwt_secret.is_some() {
            opts.proxy_jwt_secret = secret(&self.proxy_jwt_secret);
        }
        if is_truthy(self.disable_device_identity.as_deref()) {
            opts.disable_device_identity = true;
        }

        match parse_scopes(self.scopes.as_deref()) {
            Some(scopes) => opts.scopes = scopes,
            // A profile that sets scopes keeps them; otherwise the command decides.
            None if self.config.is_none() => {
                opts.scopes = default_scopes.iter().map(|s| (*s).to_owned()).collect();
            },
            None => {},
        }

        if self.tls_fingerprint.is_some() {
            debug!("tls fingerprint given but pinning is not supported; ignoring");
        }
        Ok(opts)
    }

    /// Device identity for the handshake, or `None` when disabled.
    ///
    /// With `--device-key-file` the identity persists across runs; without it
    /// a fresh identity is used for this process only.
    pub fn device_identity(&self, opts: &ClientOptions) -> Result<Option<Arc<DeviceIdentity>>> {
        if opts.disable_device_identity {
            return Ok(None);
        }
        let identity = match &self.device_key_file {
            Some(path) => load_or_create_identity(path)?,
            None => DeviceIdentity::generate(),
        };
        debug!(device_id = identity.device_id(), "device identity loaded");
        Ok(Some(Arc::new(identity)))
    }
}

fn load_profile(path: &Path) -> Result<ClientOptions> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn load_or_create_identity(path: &Path) -> Result<DeviceIdentity> {
    if path.exists() {
        let seed = fs::read_to_string(path)
            .with_context(|| format!("failed to read device key {}", path.display()))?;
        return DeviceIdentity::from_hex_seed(&seed)
            .with_context(|| format!("invalid device key {}", path.display()));
    }

    let identity = DeviceIdentity::generate();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, format!("{}\n", identity.to_hex_seed()))
        .with_context(|| format!("failed to write device key {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", path.display()))?;
    }
    Ok(identity)
}

/// Split a comma list, dropping blanks. `None` when nothing usable remains.
pub fn parse_scopes(raw: Option<&str>) -> Option<Vec<String>> {
    let scopes: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    (!scopes.is_empty()).then_some(scopes)
}

/// `1` or case-insensitive `true`.
pub fn is_truthy(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Raw configuration text for write commands.
#[derive(clap::Args, Debug, Default)]
pub struct RawInput {
    /// Inline configuration text.
    #[arg(long)]
    pub raw: Option<String>,

    /// File holding the configuration text.
    #[arg(long, value_name = "FILE")]
    pub raw_file: Option<PathBuf>,
}

impl RawInput {
    /// Inline text wins when non-blank, otherwise the file is read.
    pub fn read(&self) -> Result<String> {
        if let Some(raw) = self.raw.as_ref().filter(|r| !r.trim().is_empty()) {
            return Ok(raw.clone());
        }
        if let Some(path) = self
            .raw_file
            .as_ref()
            .filter(|p| !p.as_os_str().to_string_lossy().trim().is_empty())
        {
            return fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()));
        }
        bail!("missing raw config input (use --raw or --raw-file)")
    }
}
