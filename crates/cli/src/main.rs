mod gateway_args;

use std::future::Future;

use {
    anyhow::{Context, Result},
    clap::{Parser, Subcommand},
    clawlink_operator::{
        ChatAbortParams, ChatClient, ChatHistoryParams, ChatInjectParams, ChatSendParams,
        ConfigClient, ConfigPatchParams, ConfigSetParams, GatewaySession,
    },
    clawlink_protocol::scopes,
    serde::Serialize,
    tracing_subscriber::EnvFilter,
};

use crate::gateway_args::{GatewayArgs, RawInput, is_truthy};

/// Operator client for OpenClaw-compatible gateways.
///
/// Connects over WebSocket, performs the signed `connect` handshake and runs
/// one configuration or chat RPC, printing the result as JSON.
#[derive(Parser, Debug)]
#[command(name = "clawlink", version)]
struct Cli {
    #[command(flatten)]
    gateway: GatewayArgs,

    /// Log connection details at debug level (`1` or `true`).
    #[arg(
        long,
        global = true,
        env = "OPENCLAW_GATEWAY_DEBUG",
        num_args = 0..=1,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    debug: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read or change the gateway configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Chat session operations.
    #[command(subcommand)]
    Chat(ChatCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the current configuration snapshot.
    Get,
    /// Print the configuration schema.
    Schema,
    /// Replace the configuration.
    Set {
        #[command(flatten)]
        raw: RawInput,
        /// Expected current hash; fetched with `config.get` when omitted.
        #[arg(long)]
        base_hash: Option<String>,
    },
    /// Merge a partial configuration.
    Patch(PatchArgs),
    /// Write and apply a configuration, restarting as needed.
    Apply(PatchArgs),
}

#[derive(clap::Args, Debug)]
struct PatchArgs {
    #[command(flatten)]
    raw: RawInput,
    #[arg(long)]
    base_hash: Option<String>,
    #[arg(long)]
    session_key: Option<String>,
    #[arg(long)]
    note: Option<String>,
    #[arg(long)]
    restart_delay_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum ChatCommand {
    /// Print a session transcript.
    History {
        #[arg(long)]
        session_key: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Send a message and start a run.
    Send {
        #[arg(long)]
        session_key: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        thinking: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Abort the active run, or the given one.
    Abort {
        #[arg(long)]
        session_key: String,
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Append a message to the transcript without starting a run.
    Inject {
        #[arg(long)]
        session_key: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        label: Option<String>,
    },
}

const DEFAULT_SCOPES: &[&str] = &[scopes::ADMIN];

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(is_truthy(cli.debug.as_deref()));

    let opts = cli.gateway.client_options(DEFAULT_SCOPES)?;
    let mut session = GatewaySession::new(opts.clone());
    if let Some(identity) = cli.gateway.device_identity(&opts)? {
        session = session.with_device_identity(identity);
    }

    match cli.command {
        Command::Config(command) => {
            let client = ConfigClient::new(session);
            let result = run_config(&client, command).await;
            client.stop().await;
            print_json(&result?)
        },
        Command::Chat(command) => {
            let client = ChatClient::new(session);
            let result = run_chat(&client, command).await;
            client.stop().await;
            print_json(&result?)
        },
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("warn,clawlink=debug,clawlink_client=debug,clawlink_operator=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_config(client: &ConfigClient, command: ConfigCommand) -> Result<serde_json::Value> {
    let value = match command {
        ConfigCommand::Get => to_json(client.get()).await?,
        ConfigCommand::Schema => to_json(client.schema()).await?,
        ConfigCommand::Set { raw, base_hash } => {
            let raw = raw.read()?;
            let base_hash = resolve_base_hash(client, base_hash).await?;
            client
                .set(&ConfigSetParams { raw, base_hash })
                .await
                .context("config.set failed")?
        },
        ConfigCommand::Patch(args) => {
            let raw = args.raw.read()?;
            let base_hash = resolve_base_hash(client, args.base_hash).await?;
            client
                .patch(&ConfigPatchParams {
                    raw,
                    base_hash,
                    session_key: args.session_key,
                    note: args.note,
                    restart_delay_ms: args.restart_delay_ms,
                })
                .await
                .context("config.patch failed")?
        },
        ConfigCommand::Apply(args) => client
            .apply(&ConfigPatchParams {
                raw: args.raw.read()?,
                base_hash: args.base_hash,
                session_key: args.session_key,
                note: args.note,
                restart_delay_ms: args.restart_delay_ms,
            })
            .await
            .context("config.apply failed")?,
    };
    Ok(value)
}

/// The explicit hash, or the one reported by `config.get`.
async fn resolve_base_hash(
    client: &ConfigClient,
    explicit: Option<String>,
) -> Result<Option<String>> {
    match explicit {
        Some(hash) => Ok(Some(hash)),
        None => client
            .current_hash()
            .await
            .context("failed to fetch base hash"),
    }
}

async fn run_chat(client: &ChatClient, command: ChatCommand) -> Result<serde_json::Value> {
    match command {
        ChatCommand::History { session_key, limit } => {
            to_json(client.history(&ChatHistoryParams { session_key, limit })).await
        },
        ChatCommand::Send {
            session_key,
            message,
            thinking,
            idempotency_key,
        } => {
            to_json(client.send(ChatSendParams {
                session_key,
                message,
                thinking,
                idempotency_key,
                ..Default::default()
            }))
            .await
        },
        ChatCommand::Abort {
            session_key,
            run_id,
        } => {
            to_json(client.abort(&ChatAbortParams {
                session_key,
                run_id,
            }))
            .await
        },
        ChatCommand::Inject {
            session_key,
            message,
            label,
        } => {
            to_json(client.inject(&ChatInjectParams {
                session_key,
                message,
                label,
            }))
            .await
        },
    }
}

async fn to_json<T, F>(call: F) -> Result<serde_json::Value>
where
    T: Serialize,
    F: Future<Output = clawlink_operator::Result<T>>,
{
    Ok(serde_json::to_value(call.await?)?)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
