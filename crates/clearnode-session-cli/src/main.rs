/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Session lifecycle commands against the ledger node
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use clearnode_adapter::{
    AuthState, EvmWalletSigner, FileStore, KeyValueStore, KeyVault, SessionManager,
    SessionSigner, WalletSigner,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clearnode_session_cli::{Cli, CliConfig, Command};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    let config = load_config(args.config_path.as_deref())?;
    info!(
        ws_url = %config.node.ws_url,
        state_path = %config.state_path.display(),
        "starting clearnode-session"
    );

    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&config.state_path).context("open state file")?,
    );
    let wallet = Arc::new(EvmWalletSigner::new(&args.wallet_key).context("load wallet key")?);
    let me = wallet.address();

    if !args.command.needs_connection() {
        return run_offline(&config, store, me, &args.command);
    }

    let mut manager = SessionManager::new(config.node.clone(), store);
    if let Some(key) = &args.counterparty_key {
        let counterparty = SessionSigner::from_hex(key).context("load counterparty key")?;
        manager = manager.with_counterparty(counterparty);
    }

    manager
        .connect(wallet.clone())
        .await
        .context("authenticate with ledger node")?;

    let outcome = run_command(&manager, wallet, &args.command).await;
    manager.disconnect().await;
    outcome
}

async fn run_command(
    manager: &SessionManager,
    wallet: Arc<EvmWalletSigner>,
    command: &Command,
) -> Result<()> {
    let me = wallet.address();
    match command {
        Command::Connect => keep_alive(manager, wallet).await,
        Command::Balance { account } => {
            let account = account.unwrap_or(me);
            let balances = manager
                .get_ledger_balance(account)
                .await
                .context("fetch ledger balances")?;
            if balances.is_empty() {
                println!("{account}: no balances");
            }
            for balance in balances {
                println!("{account}: {} {}", balance.amount, balance.asset);
            }
            Ok(())
        }
        Command::Open { deposit } => {
            let record = manager
                .create_application_session(me, deposit)
                .await
                .context("open application session")?;
            println!(
                "opened {} with {} {}",
                record.session_id, record.deposit_amount, record.asset
            );
            Ok(())
        }
        Command::Close { points } => {
            manager
                .close_application_session(me, *points)
                .await
                .context("close application session")?;
            println!("closed application session, {points} points recorded");
            Ok(())
        }
        Command::Status | Command::Keys => Err(anyhow!("command runs offline")),
    }
}

fn run_offline(
    config: &CliConfig,
    store: Arc<dyn KeyValueStore>,
    me: Address,
    command: &Command,
) -> Result<()> {
    match command {
        Command::Keys => {
            let identity = KeyVault::new(store)
                .get_or_create(&me.to_string().to_ascii_lowercase())
                .context("load session key")?;
            println!("wallet:      {me}");
            println!("session key: {}", identity.address);
            Ok(())
        }
        Command::Status => {
            let manager = SessionManager::new(config.node.clone(), store);
            match manager.active_session(me).context("read session record")? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("no open application session"),
            }
            Ok(())
        }
        _ => Err(anyhow!("command needs a connection")),
    }
}

/// Hold the connection until a shutdown signal; reconnect when it drops
async fn keep_alive(manager: &SessionManager, wallet: Arc<EvmWalletSigner>) -> Result<()> {
    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());
    info!("connected; waiting for shutdown signal");

    loop {
        let mut states = manager.auth_state();
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown signal received");
                return Ok(());
            }
            dropped = states.wait_for(|state| *state == AuthState::Disconnected) => {
                if dropped.is_err() {
                    return Err(anyhow!("session manager stopped"));
                }
            }
        }

        warn!(delay_secs = RECONNECT_DELAY.as_secs(), "connection lost, reconnecting");
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
        if let Err(err) = manager.connect(wallet.clone()).await {
            warn!(error = %err, "reconnect failed");
        }
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let path_str = path.to_str().context("config path must be valid utf-8")?;
    CliConfig::from_file(path_str).context("load config")
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
