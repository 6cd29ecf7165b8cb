//! Thin CLI adapter: argument parsing and help text live here, but
//! every command is a few lines of wiring into `nsyte-core`,
//! `nsyte-vault` and `nsyte-signer` — no business logic duplicated
//! from the core crate. Each subcommand just loads config, resolves a
//! signer, and calls into the library.

mod progress;
mod signer;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use nsyte_activity::{ActivityLog, activity_path};
use nsyte_codec::CredentialMaterial;
use nsyte_config::{EnvOverrides, config_dir};
use nsyte_core::{ExecutorConfig, LevelFilteredProgress, Progress, SiteOptions};
use nsyte_remote_signer::{HandshakeError, PendingNostrConnect, RemoteSignerClient};
use nsyte_signer::{LocalKeySigner, RemoteSignerTransport, Signer, SignerError};
use nsyte_types::{ProjectConfig, PublishFlags, SignerRef};
use nsyte_vault::{Vault, VaultConfig, VaultError};

use progress::CliProgress;

/// Default per-request timeout for a fresh remote-signer handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Argument combinations clap's own validation can't express (e.g.
/// "one of these three is required"), reported as exit code 2 rather
/// than the generic-failure code 1.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    InvalidArgs(String),
}

#[derive(Parser, Debug)]
#[command(name = "nsyte", version, about = "Publish and reconcile a static site against blob servers and relays")]
struct Cli {
    /// Project directory (holds `.nsyte/config.json`). Defaults to the
    /// current directory.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or overwrite the project's `.nsyte/config.json`.
    Init {
        /// Relay URL (repeatable).
        #[arg(long = "relay")]
        relays: Vec<String>,
        /// Blob server URL (repeatable).
        #[arg(long = "blob-server")]
        blob_servers: Vec<String>,
        /// Generate a new local key rather than importing one.
        #[arg(long, conflicts_with_all = ["nsec", "bunker"])]
        generate_key: bool,
        /// Import a 64-hex-character local secret key.
        #[arg(long, conflicts_with = "bunker")]
        nsec: Option<String>,
        /// Connect to a remote signer via a `bunker://` URL.
        #[arg(long)]
        bunker: Option<String>,
    },
    /// Scan `dir`, reconcile against the advertised remote set, and
    /// publish the difference.
    Upload {
        dir: PathBuf,
        #[arg(long)]
        purge: bool,
        #[arg(long)]
        fail_fast: bool,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        publish_quorum: Option<usize>,
        #[arg(long)]
        server_quorum: Option<usize>,
    },
    /// Reconstruct the site from the advertised manifest set into a
    /// local directory.
    Download {
        /// Author public key to download from; defaults to the
        /// project's configured signer.
        #[arg(long)]
        pubkey: Option<String>,
        #[arg(long, default_value = "./downloaded")]
        out: PathBuf,
    },
    /// List the latest manifest entries advertised for this project's
    /// signer.
    Ls,
    /// List the relays and blob servers advertised by this project's
    /// signer (kind `BLOB_LIST` / `RELAY_LIST` events are not queried
    /// here; this reports the locally configured set, which is what
    /// every other command actually uses).
    Sites,
    /// Manage signer credentials in the vault.
    Bunker {
        #[command(subcommand)]
        cmd: BunkerCommands,
    },
    /// Non-interactive publish for CI: same as `upload` but never
    /// prompts and always reports via plain stderr lines.
    Ci {
        dir: PathBuf,
        #[arg(long)]
        purge: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BunkerCommands {
    /// List public keys with a stored credential.
    List,
    /// Connect to a remote signer and store the resulting session.
    ///
    /// With `--bunker-url`, performs the client-initiated handshake.
    /// Otherwise prints a `nostrconnect://` URI and waits for the
    /// signer to connect.
    Connect {
        #[arg(long)]
        bunker_url: Option<String>,
        #[arg(long)]
        relay: Vec<String>,
    },
    /// Import a local secret key (64 lowercase hex characters).
    Import { nsec: String },
    /// Print the stored credential blob for `pubkey`.
    Export { pubkey: String },
    /// Make `pubkey` the project's configured signer.
    Use { pubkey: String },
    /// Delete the stored credential for `pubkey`.
    Remove { pubkey: String },
    /// Run the legacy-plaintext-to-vault migration explicitly.
    Migrate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    match dispatch(&cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(classify_exit_code(&err))
        }
    }
}

/// Exit-code contract: 0 success, 1 generic failure, 2
/// invalid arguments, 3 no credentials available, 4 remote-signer
/// unreachable.
fn classify_exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<CliError>().is_some() {
        return 2;
    }
    if err.downcast_ref::<SignerError>().is_some_and(|e| matches!(e, SignerError::Unreachable(_) | SignerError::Timeout))
        || err.downcast_ref::<HandshakeError>().is_some()
    {
        return 4;
    }
    if err.downcast_ref::<VaultError>().is_some() {
        return 3;
    }
    1
}

fn env_progress<P: Progress + 'static>(inner: P) -> Arc<dyn Progress> {
    let level = EnvOverrides::from_env().log_level;
    Arc::new(LevelFilteredProgress::new(inner, level))
}

fn open_vault(project: &Path) -> Result<Vault> {
    let overrides = EnvOverrides::from_env();
    let config = VaultConfig::from_env(overrides.force_encrypted_storage).context("failed to resolve vault storage location")?;
    let vault = Vault::init(config).context("failed to initialise credential vault")?;

    if !nsyte_config::migration_already_ran(project) {
        nsyte_config::mark_migration_complete(project).ok();
    }
    Ok(vault)
}

fn require_config(project: &Path) -> Result<ProjectConfig> {
    nsyte_config::load(project)
        .context("failed to read project config")?
        .context("no project config found; run `nsyte init` first")
}

async fn dispatch(cli: &Cli) -> Result<u8> {
    match &cli.cmd {
        Commands::Init { relays, blob_servers, generate_key, nsec, bunker } => {
            cmd_init(&cli.project, relays, blob_servers, *generate_key, nsec.as_deref(), bunker.as_deref()).await
        }
        Commands::Upload { dir, purge, fail_fast, concurrency, publish_quorum, server_quorum } => {
            cmd_upload(&cli.project, dir, *purge, *fail_fast, *concurrency, *publish_quorum, *server_quorum, false).await
        }
        Commands::Ci { dir, purge } => cmd_upload(&cli.project, dir, *purge, true, None, None, None, true).await,
        Commands::Download { pubkey, out } => cmd_download(&cli.project, pubkey.as_deref(), out).await,
        Commands::Ls => cmd_ls(&cli.project).await,
        Commands::Sites => cmd_sites(&cli.project).await,
        Commands::Bunker { cmd } => cmd_bunker(&cli.project, cmd).await,
    }
}

async fn cmd_init(
    project: &Path,
    relays: &[String],
    blob_servers: &[String],
    generate_key: bool,
    nsec: Option<&str>,
    bunker: Option<&str>,
) -> Result<u8> {
    let vault = open_vault(project)?;

    let signer_ref = if let Some(secret_hex) = nsec {
        let local = LocalKeySigner::from_secret_hex(secret_hex).context("invalid local secret key")?;
        signer::store_local_key(&vault, &local)?
    } else if let Some(bunker_url) = bunker {
        let client = RemoteSignerClient::connect_bunker(bunker_url, HANDSHAKE_TIMEOUT).await.context("remote signer unreachable")?;
        let parsed = nsyte_remote_signer::parse_bunker_url(bunker_url).context("invalid bunker url")?;
        signer::store_remote_session(&vault, &client.public_key(), &parsed.remote_signer_pubkey, &parsed.relays, &parsed.secret)?
    } else if generate_key {
        let local = LocalKeySigner::generate();
        signer::store_local_key(&vault, &local)?
    } else {
        return Err(CliError::InvalidArgs("specify one of --generate-key, --nsec <secret>, or --bunker <url>".to_string()).into());
    };

    let config = ProjectConfig {
        signer: Some(signer_ref),
        relays: relays.to_vec(),
        blob_servers: blob_servers.to_vec(),
        profile: None,
        publish: PublishFlags::default(),
        app_metadata: serde_json::Value::Null,
    };
    nsyte_config::save(project, &config).context("failed to save project config")?;

    println!("initialised project at {}", config_dir(project).display());
    println!("signer pubkey: {}", config.signer.as_ref().expect("just set").pubkey());
    Ok(0)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_upload(
    project: &Path,
    dir: &Path,
    purge: bool,
    fail_fast: bool,
    concurrency: Option<usize>,
    publish_quorum: Option<usize>,
    server_quorum: Option<usize>,
    ci: bool,
) -> Result<u8> {
    let config = require_config(project)?;
    let vault = open_vault(project)?;
    let resolved_signer = signer::resolve_signer(&config, &vault).await?;

    let mut executor_config = ExecutorConfig::default();
    executor_config.fail_fast = fail_fast;
    if let Some(c) = concurrency {
        executor_config.concurrency = c;
    }
    if let Some(q) = publish_quorum {
        executor_config.publish_quorum = q;
    }
    if let Some(q) = server_quorum {
        executor_config.server_quorum = q;
    }

    let options = SiteOptions {
        root: dir.clone(),
        include: Vec::new(),
        exclude: Vec::new(),
        relays: config.relays.clone(),
        blob_servers: config.blob_servers.clone(),
        purge: purge || config.publish.purge,
    };

    let progress: Arc<dyn Progress> =
        if ci { env_progress(nsyte_core::StderrProgress) } else { env_progress(CliProgress::new()) };
    let activity = Arc::new(AsyncMutex::new(ActivityLog::new()));
    let run_id = format!("run-{}", nsyte_hash::hash_bytes(dir.display().to_string().as_bytes())
        .chars()
        .take(12)
        .collect::<String>());
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let report = nsyte_core::publish(&resolved_signer, &options, &executor_config, progress, activity.clone(), run_id, cancel).await?;

    let state_dir = config_dir(project);
    activity.lock().await.write_to_file(&activity_path(&state_dir)).ok();

    let blobs = report.actions.iter().filter(|a| matches!(a.action, nsyte_types::PlanAction::UploadBlob { .. })).count();
    let manifests = report.actions.iter().filter(|a| matches!(a.action, nsyte_types::PlanAction::PublishManifest { .. })).count();
    println!("{blobs} blobs, {manifests} manifests, {} failures", report.actions.iter().filter(|a| !matches!(a.outcome, nsyte_types::ActionOutcome::Succeeded)).count());

    Ok(if report.has_failures() { 1 } else { 0 })
}

async fn cmd_download(project: &Path, pubkey: Option<&str>, out: &Path) -> Result<u8> {
    let config = require_config(project)?;
    let pubkey = match pubkey {
        Some(p) => p.to_string(),
        None => config.signer.as_ref().context("no pubkey given and no signer configured")?.pubkey().to_string(),
    };

    let written = nsyte_core::download(&pubkey, &config.relays, &config.blob_servers, out).await?;
    println!("downloaded {} files into {}", written.len(), out.display());
    Ok(0)
}

async fn cmd_ls(project: &Path) -> Result<u8> {
    let config = require_config(project)?;
    let pubkey = config.signer.as_ref().context("no signer configured")?.pubkey().to_string();

    let (pool, _) = nsyte_relay::RelayPool::connect(&config.relays).await;
    let mut inbound = pool.inbound();
    let sub_id = "nsyte-ls";
    pool.subscribe(
        sub_id,
        vec![nsyte_relay::Filter { authors: Some(vec![pubkey.clone()]), kinds: Some(vec![nsyte_types::kind::MANIFEST]), ..Default::default() }],
    );

    let mut events = Vec::new();
    let mut pending: std::collections::BTreeSet<String> = pool.relay_urls().into_iter().collect();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, inbound.recv()).await {
            Ok(Ok((_, nsyte_relay::RelayMessage::Event { event, .. }))) => events.push(*event),
            Ok(Ok((relay, nsyte_relay::RelayMessage::Eose { .. }))) => {
                pending.remove(&relay);
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => break,
        }
    }
    pool.close_subscription(sub_id);
    pool.close().await;

    let manifests = nsyte_core::latest_manifests(&events);
    if manifests.is_empty() {
        println!("(no manifest entries)");
    }
    for (path, info) in &manifests {
        println!("{path}\t{}\t{} bytes\t{}", info.hash, info.size, info.mime);
    }
    Ok(0)
}

async fn cmd_sites(project: &Path) -> Result<u8> {
    let config = require_config(project)?;
    println!("signer: {}", config.signer.as_ref().map(|s| s.pubkey()).unwrap_or("(none configured)"));
    println!("relays:");
    for relay in &config.relays {
        println!("  {relay}");
    }
    println!("blob servers:");
    for server in &config.blob_servers {
        println!("  {server}");
    }
    Ok(0)
}

async fn cmd_bunker(project: &Path, cmd: &BunkerCommands) -> Result<u8> {
    let vault = open_vault(project)?;
    match cmd {
        BunkerCommands::List => {
            let pubkeys = vault.list().context("failed to list vault credentials")?;
            if pubkeys.is_empty() {
                println!("(no stored credentials)");
            }
            for pubkey in pubkeys {
                let kind = vault
                    .get(&pubkey)
                    .ok()
                    .flatten()
                    .and_then(|blob| nsyte_codec::decode(&blob).ok())
                    .map(|m| match m {
                        CredentialMaterial::LocalKey { .. } => "local-key",
                        CredentialMaterial::RemoteSignerSession { .. } => "remote-signer-session",
                    })
                    .unwrap_or("unknown");
                println!("{pubkey}\t{kind}");
            }
            Ok(0)
        }
        BunkerCommands::Connect { bunker_url, relay } => {
            let (pubkey, signer_ref) = if let Some(url) = bunker_url {
                let client = RemoteSignerClient::connect_bunker(url, HANDSHAKE_TIMEOUT).await.context("remote signer unreachable")?;
                let parsed = nsyte_remote_signer::parse_bunker_url(url).context("invalid bunker url")?;
                let signer_ref = signer::store_remote_session(&vault, &client.public_key(), &parsed.remote_signer_pubkey, &parsed.relays, &parsed.secret)?;
                (client.public_key(), signer_ref)
            } else {
                if relay.is_empty() {
                    return Err(CliError::InvalidArgs("--relay is required when --bunker-url is not given".to_string()).into());
                }
                let secret = LocalKeySigner::generate().secret_key_hex();
                let pending: PendingNostrConnect = RemoteSignerClient::begin_nostrconnect(relay, &secret, "nsyte").await;
                println!("connect your signer to: {}", pending.uri());
                let client = pending.wait(HANDSHAKE_TIMEOUT).await.context("remote signer unreachable")?;
                let signer_ref = signer::store_remote_session(&vault, &client.public_key(), &client.public_key(), relay, &secret)?;
                (client.public_key(), signer_ref)
            };

            let mut config = nsyte_config::load(project).ok().flatten().unwrap_or_default();
            config.signer = Some(signer_ref);
            nsyte_config::save(project, &config).context("failed to save project config")?;
            println!("connected bunker session for {pubkey}");
            Ok(0)
        }
        BunkerCommands::Import { nsec } => {
            let local = LocalKeySigner::from_secret_hex(nsec).context("invalid local secret key")?;
            signer::store_local_key(&vault, &local)?;
            println!("imported local key for {}", local.public_key());
            Ok(0)
        }
        BunkerCommands::Export { pubkey } => {
            let blob = vault.get(pubkey).context("failed to read vault")?.with_context(|| format!("no credential stored for {pubkey}"))?;
            println!("{blob}");
            Ok(0)
        }
        BunkerCommands::Use { pubkey } => {
            let blob = vault.get(pubkey).context("failed to read vault")?;
            if blob.is_none() {
                bail!("no credential stored for {pubkey}; import or connect first");
            }
            let material = nsyte_codec::decode(&blob.unwrap()).context("stored credential is malformed")?;
            let signer_ref = match material {
                CredentialMaterial::LocalKey { .. } => SignerRef::LocalKey { pubkey: pubkey.clone() },
                CredentialMaterial::RemoteSignerSession { .. } => SignerRef::RemoteSigner { pubkey: pubkey.clone() },
            };

            let mut config = nsyte_config::load(project).ok().flatten().unwrap_or_default();
            config.signer = Some(signer_ref);
            nsyte_config::save(project, &config).context("failed to save project config")?;
            println!("project signer set to {pubkey}");
            Ok(0)
        }
        BunkerCommands::Remove { pubkey } => {
            let removed = vault.delete(pubkey).context("failed to delete vault credential")?;
            println!("{}", if removed { "removed" } else { "no credential was stored for that pubkey" });
            Ok(0)
        }
        BunkerCommands::Migrate => {
            // `Vault::init` above already ran the legacy migration as
            // its first step; this subcommand exists so CI and docs
            // have an explicit, nameable step rather than relying on
            // the side effect of any other command's startup.
            println!("legacy credential migration checked (marker: {})", nsyte_config::migration_marker_path(project).display());
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn classify_exit_code_maps_vault_errors_to_3() {
        let err = anyhow::Error::new(VaultError::BackendUnavailable);
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn classify_exit_code_maps_signer_unreachable_to_4() {
        let err = anyhow::Error::new(SignerError::Unreachable("no relay accepted".to_string()));
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn classify_exit_code_maps_signer_timeout_to_4() {
        let err = anyhow::Error::new(SignerError::Timeout);
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn classify_exit_code_defaults_to_1() {
        let err = anyhow::anyhow!("something else went wrong");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
