//! Gate process entry point.
//!
//! `gate broker` and `gate mount` are two halves of the same system run as
//! separate OS processes (mirroring the original `gate_broker.py`/
//! `fuse_fs.py` split): the broker owns the durable lock store, the mount
//! talks to it exclusively over HTTP via `gate-client`. `gate status` is a
//! one-shot client call; `gate version` prints the build version.

use std::ffi::CString;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fuser::MountOption;
use gate_client::{BrokerClient, BrokerEndpoint};
use gate_core::{GateConfig, LockStore};
use gate_fuse::{GateFs, MountOptions};
use tracing::info;

#[derive(Parser)]
#[command(name = "gate")]
#[command(about = "Shared concurrency substrate for a passthrough filesystem")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lock broker, serving HTTP/JSON over the lock store.
    Broker {
        #[arg(long, env = "GATE_STATE_DIR")]
        state_dir: Option<String>,
        #[arg(long, env = "GATE_BROKER_HOST")]
        host: Option<String>,
        #[arg(long, env = "GATE_BROKER_PORT")]
        port: Option<u16>,
        #[arg(long, env = "GATE_LEASE_MS")]
        lease_ms: Option<u64>,
        #[arg(long, env = "GATE_MAX_HOLD_MS")]
        max_hold_ms: Option<u64>,
        #[arg(long, env = "GATE_ACQUIRE_TIMEOUT_MS")]
        acquire_timeout_ms: Option<u64>,
    },
    /// Mount the passthrough view at a mount point, enforcing broker locks.
    Mount {
        /// Backing directory to expose.
        #[arg(long)]
        root: PathBuf,
        /// Where to attach the view.
        #[arg(value_name = "MOUNTPOINT")]
        mountpoint: PathBuf,
        #[arg(long, env = "GATE_BROKER_HOST", default_value = "127.0.0.1")]
        broker_host: String,
        #[arg(long, env = "GATE_BROKER_PORT", default_value_t = 8787)]
        broker_port: u16,
        /// Stable identity used for every lock call from this mount;
        /// defaults to `hostname:pid`.
        #[arg(long, env = "GATE_OWNER")]
        owner: Option<String>,
        #[arg(long, env = "GATE_LEASE_MS", default_value_t = 3_600_000)]
        lease_ms: u64,
        #[arg(long, env = "GATE_ACQUIRE_TIMEOUT_MS")]
        acquire_timeout_ms: Option<u64>,
        #[arg(long, env = "GATE_MAX_HOLD_MS")]
        max_hold_ms: Option<u64>,
        #[arg(long, env = "GATE_RELEASE_ON_FLUSH", default_value_t = true)]
        release_on_flush: bool,
        /// Run in the foreground instead of daemonizing.
        #[arg(long, short = 'f', default_value_t = false)]
        foreground: bool,
        /// Allow other local users to see the mount.
        #[arg(long, default_value_t = false)]
        allow_other: bool,
    },
    /// Print a snapshot of locks and queued waiters from a running broker.
    Status {
        #[arg(long, env = "GATE_BROKER_HOST", default_value = "127.0.0.1")]
        broker_host: String,
        #[arg(long, env = "GATE_BROKER_PORT", default_value_t = 8787)]
        broker_port: u16,
        #[arg(long)]
        path: Option<String>,
    },
    /// Print the Gate version.
    Version,
}

fn default_owner() -> String {
    let mut buf = vec![0u8; 256];
    let host = unsafe {
        if libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) == 0 {
            CString::new(&buf[..buf.iter().position(|&b| b == 0).unwrap_or(buf.len())])
                .map(|c| c.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown-host".to_string())
        } else {
            "unknown-host".to_string()
        }
    };
    format!("{host}:{}", std::process::id())
}

fn run_broker(
    state_dir: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    lease_ms: Option<u64>,
    max_hold_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = GateConfig::default();
    if let Some(state_dir) = state_dir {
        config.state_dir = state_dir;
    }
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(lease_ms) = lease_ms {
        config.lease_ms = lease_ms;
    }
    if max_hold_ms.is_some() {
        config.max_hold_ms = max_hold_ms;
    }
    if acquire_timeout_ms.is_some() {
        config.acquire_timeout_ms = acquire_timeout_ms;
    }

    let db_path = config.db_path();
    info!(db = %db_path.display(), "opening lock store");
    let store = Arc::new(LockStore::open(&db_path)?);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            result = gate_broker::serve(store, config) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                Ok(())
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn run_mount(
    root: PathBuf,
    mountpoint: PathBuf,
    broker_host: String,
    broker_port: u16,
    owner: Option<String>,
    lease_ms: u64,
    acquire_timeout_ms: Option<u64>,
    max_hold_ms: Option<u64>,
    release_on_flush: bool,
    foreground: bool,
    allow_other: bool,
) -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let owner = owner.unwrap_or_else(default_owner);
    log::info!("mounting {} at {} via broker {broker_host}:{broker_port}", root.display(), mountpoint.display());
    log::info!("lock owner: {owner}");

    let client = BrokerClient::new(BrokerEndpoint {
        host: broker_host,
        port: broker_port,
    })?;

    let filesystem = GateFs::new(
        client,
        MountOptions {
            root,
            owner,
            lease_ms,
            acquire_timeout_ms,
            max_hold_ms,
            release_on_flush,
        },
    );

    let mut options = vec![
        MountOption::FSName("gate".to_string()),
        MountOption::AutoUnmount,
        MountOption::DefaultPermissions,
    ];
    if allow_other {
        options.push(MountOption::AllowOther);
    }

    if !foreground {
        log::warn!("daemonizing is not implemented; running in the foreground");
    }
    fuser::mount2(filesystem, &mountpoint, &options)?;
    log::info!("unmounted {}", mountpoint.display());
    Ok(())
}

fn run_status(broker_host: String, broker_port: u16, path: Option<String>) -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let client = BrokerClient::new(BrokerEndpoint {
        host: broker_host,
        port: broker_port,
    })?;
    let snapshot = client.status(path.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Broker {
            state_dir,
            host,
            port,
            lease_ms,
            max_hold_ms,
            acquire_timeout_ms,
        } => run_broker(state_dir, host, port, lease_ms, max_hold_ms, acquire_timeout_ms),
        Commands::Mount {
            root,
            mountpoint,
            broker_host,
            broker_port,
            owner,
            lease_ms,
            acquire_timeout_ms,
            max_hold_ms,
            release_on_flush,
            foreground,
            allow_other,
        } => run_mount(
            root,
            mountpoint,
            broker_host,
            broker_port,
            owner,
            lease_ms,
            acquire_timeout_ms,
            max_hold_ms,
            release_on_flush,
            foreground,
            allow_other,
        ),
        Commands::Status {
            broker_host,
            broker_port,
            path,
        } => run_status(broker_host, broker_port, path),
        Commands::Version => {
            println!("gate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
