//! hdrop: LAN file drop
//!
//! Commands:
//!   peers                 - list devices currently announcing on the LAN
//!   send <file>           - send a file to a discovered peer (or --to IP)
//!   receive               - announce this device and accept one file
//!   keygen                - write a fresh 32-byte transfer key
//!   checksum <file>       - print a file's SHA-256 digest
//!   config show           - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hdrop_core::{HdropConfig, HdropResult, KeyProvider, ProgressSink};
use hdrop_discovery::{DiscoveredPeer, DiscoveryOptions, DiscoverySession, PeerSelector};
use hdrop_transfer::{Receiver, ReceiverOptions, Sender, SenderOptions, TransferMode};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "hdrop",
    version,
    about = "Send files to nearby devices",
    long_about = "hdrop: discover devices on the local network and move files between them, \
                  optionally encrypted per chunk with AES-256-GCM"
)]
struct Cli {
    /// Path to hdrop.toml configuration file
    #[arg(long, short = 'c', env = "HDROP_CONFIG", default_value = "hdrop.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "HDROP_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "HDROP_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices currently announcing on the LAN
    Peers {
        /// Seconds to listen for beacons
        #[arg(long, default_value_t = 6)]
        wait: u64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a file to a peer
    ///
    /// Without --to, the only discovered peer is used; with several peers
    /// present, --to is required.
    Send {
        /// File to send
        file: PathBuf,
        /// Peer display name or IP address
        #[arg(long)]
        to: Option<String>,
        /// Encrypt chunks with the configured key
        #[arg(long)]
        encrypt: bool,
        /// Seconds to wait for the peer to appear
        #[arg(long, default_value_t = 25)]
        wait: u64,
    },

    /// Announce this device and accept one incoming file
    Receive {
        /// Directory to save into (overrides config)
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },

    /// Generate a new transfer key
    Keygen {
        /// Output path (default: crypto.key_file from config)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Print the SHA-256 digest of a file
    Checksum { file: PathBuf },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HdropConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match &cli.log_format {
        Some(f) => f.clone(),
        None => LogFormat::from_str(&config.log.format, true).unwrap_or(LogFormat::Text),
    };
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        from_file = cli.config.exists(),
        "hdrop starting"
    );

    match cli.command {
        Commands::Peers { wait, json } => cmd_peers(&config, wait, json).await,
        Commands::Send { file, to, encrypt, wait } => {
            cmd_send(&config, &file, to.as_deref(), encrypt, wait).await
        }
        Commands::Receive { save_dir } => cmd_receive(&config, save_dir).await,
        Commands::Keygen { out, force } => cmd_keygen(&config, out.as_deref(), force),
        Commands::Checksum { file } => cmd_checksum(&file),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Cancel `token` on Ctrl-C so blocking reads unwind cleanly.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Raw 32-byte key on disk. A missing file means "no key".
struct KeyFile {
    path: PathBuf,
}

impl KeyProvider for KeyFile {
    fn load_key(&self) -> HdropResult<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Picks a peer by display name or literal IP, or the sole peer when no
/// target is given.
struct NamedPeer<'a> {
    target: Option<&'a str>,
}

impl PeerSelector for NamedPeer<'_> {
    fn select(&self, peers: &[DiscoveredPeer]) -> Option<IpAddr> {
        match self.target {
            Some(target) => match target.parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => peers.iter().find(|p| p.name == target).map(|p| p.address),
            },
            None => match peers {
                [only] => Some(only.address),
                _ => None,
            },
        }
    }
}

/// Percent-scaled indicatif bar.
struct BarSink(ProgressBar);

impl ProgressSink for BarSink {
    fn report(&mut self, percent: u8) {
        self.0.set_position(u64::from(percent));
    }
}

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb
}

/// How a command treats the configured key file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyUse {
    /// Plain transfer; the key file is not read.
    Off,
    /// Use the key when the file exists.
    IfPresent,
    /// A missing key file is an error.
    Required,
}

fn transfer_mode(config: &HdropConfig, key_use: KeyUse) -> Result<TransferMode> {
    if key_use == KeyUse::Off {
        return Ok(TransferMode::Plain);
    }
    let keys = KeyFile {
        path: config.crypto.key_file.clone(),
    };
    let key = keys
        .load_key()
        .with_context(|| format!("reading key file: {}", keys.path.display()))?;
    if key_use == KeyUse::Required && key.is_none() {
        anyhow::bail!(
            "encryption requested but no key at {}\n\
             Generate one with `hdrop keygen` and copy it to the other device.",
            keys.path.display()
        );
    }
    TransferMode::from_key(key.as_deref())
        .with_context(|| format!("loading key: {}", keys.path.display()))
}

fn start_discovery(config: &HdropConfig) -> DiscoverySession {
    DiscoverySession::new(DiscoveryOptions::from_config(
        &config.discovery,
        config.transfer.service_port,
    ))
}

// ── `hdrop peers` ─────────────────────────────────────────────────────────────

async fn cmd_peers(config: &HdropConfig, wait: u64, json: bool) -> Result<()> {
    let mut session = start_discovery(config);
    session
        .start(config.discovery.broadcast_interval())
        .await
        .context("starting discovery")?;

    // Collect for the whole window so slower peers are listed too.
    let cancel = cancel_on_ctrl_c();
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
    }
    let peers = session.list_peers();
    let listener = session.listener_status();
    session.stop().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&peers)?);
        return Ok(());
    }
    if peers.is_empty() {
        println!("no peers found after {wait}s");
        if let hdrop_discovery::ActivityStatus::Failed(reason) = listener {
            println!("  (listener failed: {reason})");
        }
        return Ok(());
    }
    println!("{:<24} {:<40} {}", "NAME", "ADDRESS", "PORT");
    for peer in &peers {
        println!("{:<24} {:<40} {}", peer.name, peer.address, peer.service_port);
    }
    Ok(())
}

// ── `hdrop send` ──────────────────────────────────────────────────────────────

async fn cmd_send(
    config: &HdropConfig,
    file: &Path,
    to: Option<&str>,
    encrypt: bool,
    wait: u64,
) -> Result<()> {
    let meta = std::fs::metadata(file)
        .with_context(|| format!("reading {}", file.display()))?;
    if !meta.is_file() {
        anyhow::bail!("{} is not a regular file", file.display());
    }
    let key_use = if encrypt || config.crypto.encrypt {
        KeyUse::Required
    } else {
        KeyUse::Off
    };
    let mode = transfer_mode(config, key_use)?;

    let cancel = cancel_on_ctrl_c();
    let target = match to.and_then(|t| t.parse::<IpAddr>().ok()) {
        Some(ip) => SocketAddr::new(ip, config.transfer.service_port),
        None => find_peer(config, to, Duration::from_secs(wait), &cancel).await?,
    };

    let mut options = SenderOptions::from_config(&config.transfer);
    options.cancel = cancel;
    let sender = Sender::connect(target, options)
        .await
        .with_context(|| format!("connecting to {target}"))?;

    let pb = make_progress_bar("send");
    let mut sink = BarSink(pb.clone());
    let report = sender
        .send_file(file, &mode, Some(&mut sink))
        .await
        .with_context(|| format!("sending {}", file.display()));
    match &report {
        Ok(_) => pb.finish_with_message("done"),
        Err(_) => pb.abandon_with_message("failed"),
    }
    let report = report?;

    println!(
        "sent {} ({}, {} chunk{}{}) to {}",
        report.file_name,
        fmt_bytes(report.bytes_sent),
        report.chunks,
        if report.chunks == 1 { "" } else { "s" },
        if report.encrypted { ", encrypted" } else { "" },
        target,
    );
    println!("sha256 {}", report.sha256);
    Ok(())
}

/// Run discovery until the selector accepts a peer, `wait` runs out, or
/// `cancel` fires.
async fn find_peer(
    config: &HdropConfig,
    to: Option<&str>,
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<SocketAddr> {
    let selector = NamedPeer { target: to };
    let mut session = start_discovery(config);
    session
        .start(config.discovery.broadcast_interval())
        .await
        .context("starting discovery")?;

    let deadline = Instant::now() + wait;
    let chosen = loop {
        let peers = session.list_peers();
        if let Some(ip) = selector.select(&peers) {
            let port = peers
                .iter()
                .find(|p| p.address == ip)
                .map(|p| p.service_port)
                .unwrap_or(config.transfer.service_port);
            break Ok(SocketAddr::new(ip, port));
        }
        let now = Instant::now();
        if now >= deadline {
            break Err(no_peer_error(to, &peers));
        }
        let pause = (deadline - now).min(Duration::from_secs(1));
        tokio::select! {
            _ = cancel.cancelled() => break Err(anyhow::anyhow!("peer search interrupted")),
            _ = tokio::time::sleep(pause) => {}
        }
    };
    session.stop().await;
    chosen
}

fn no_peer_error(to: Option<&str>, peers: &[DiscoveredPeer]) -> anyhow::Error {
    match (to, peers.len()) {
        (Some(name), _) => anyhow::anyhow!("no peer named {name:?} found"),
        (None, 0) => anyhow::anyhow!("no peers found; is the other device running `hdrop receive`?"),
        (None, _) => {
            let names: Vec<&str> = peers.iter().map(|p| p.name.as_str()).collect();
            anyhow::anyhow!(
                "several peers found ({}); choose one with --to",
                names.join(", ")
            )
        }
    }
}

// ── `hdrop receive` ───────────────────────────────────────────────────────────

async fn cmd_receive(config: &HdropConfig, save_dir: Option<PathBuf>) -> Result<()> {
    let key_use = if config.crypto.encrypt {
        KeyUse::Required
    } else {
        KeyUse::IfPresent
    };
    let mode = transfer_mode(config, key_use)?;
    let mut options = ReceiverOptions::from_config(&config.transfer);
    if let Some(dir) = save_dir {
        options.save_dir = dir;
    }

    let receiver = Receiver::bind(options)
        .context("starting receiver")?
        .with_cancellation(cancel_on_ctrl_c());
    let addr = receiver.local_addr()?;

    let mut session = start_discovery(config);
    if let Err(e) = session.start(config.discovery.broadcast_interval()).await {
        warn!("discovery unavailable, senders must use --to: {e}");
    }

    println!(
        "waiting for a sender on port {} as {:?}{}",
        addr.port(),
        config.discovery.device_name(),
        if mode.is_encrypted() { " (key loaded)" } else { "" },
    );

    let result = async move {
        let pending = receiver.accept_connection().await?;
        let pb = make_progress_bar("recv");
        let mut sink = BarSink(pb.clone());
        let received = pending.receive_file(&mode, Some(&mut sink)).await;
        match &received {
            Ok(_) => pb.finish_with_message("done"),
            Err(_) => pb.abandon_with_message("failed"),
        }
        received
    }
    .await;
    session.stop().await;

    let received = result.context("receiving file")?;
    println!(
        "received {} ({}) from {}",
        received.path.display(),
        fmt_bytes(received.bytes),
        received.peer.ip(),
    );
    println!("sha256 {}", received.sha256);
    Ok(())
}

// ── `hdrop keygen` ────────────────────────────────────────────────────────────

fn cmd_keygen(config: &HdropConfig, out: Option<&Path>, force: bool) -> Result<()> {
    let path = out.unwrap_or(&config.crypto.key_file);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            path.display()
        );
    }
    let key = hdrop_crypto::generate_key();
    write_key_file(path, key.as_bytes())
        .with_context(|| format!("writing key: {}", path.display()))?;
    println!("wrote 32-byte key to {}", path.display());
    println!("copy it to every device you want to exchange encrypted files with");
    Ok(())
}

fn write_key_file(path: &Path, key: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(key)?;
    file.sync_all()
}

// ── `hdrop checksum` ──────────────────────────────────────────────────────────

fn cmd_checksum(file: &Path) -> Result<()> {
    let digest = hdrop_crypto::checksum_file(file)
        .with_context(|| format!("reading {}", file.display()))?;
    println!("{digest}  {}", file.display());
    Ok(())
}

// ── `hdrop config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &HdropConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Formatting helpers ────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
