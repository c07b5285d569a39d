/*
[INPUT]:  Command line arguments and secret environment variables
[OUTPUT]: Parsed command selection
[POS]:    CLI layer - argument definitions
[UPDATE]: When changing CLI flags or subcommands
*/

use std::path::PathBuf;

use alloy_primitives::Address;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "clearnode-session", version, about = "Ledger node application session client")]
pub struct Cli {
    /// YAML configuration; built-in defaults when omitted
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,
    /// Primary wallet private key
    #[arg(
        long = "wallet-key",
        env = "CLEARNODE_WALLET_PRIVATE_KEY",
        hide_env_values = true
    )]
    pub wallet_key: String,
    /// Counterparty signer, required by `open`
    #[arg(
        long = "counterparty-key",
        env = "CLEARNODE_COUNTERPARTY_PRIVATE_KEY",
        hide_env_values = true
    )]
    pub counterparty_key: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate and keep the connection alive until interrupted
    Connect,
    /// Fetch ledger balances
    Balance {
        /// Account to query; defaults to the wallet
        #[arg(long)]
        account: Option<Address>,
    },
    /// Open an application session
    Open {
        #[arg(long)]
        deposit: String,
    },
    /// Close the open application session
    Close {
        #[arg(long)]
        points: u64,
    },
    /// Show the recorded open session
    Status,
    /// Show the session key bound to the wallet
    Keys,
}

impl Command {
    /// Whether the command needs an authenticated connection
    pub fn needs_connection(&self) -> bool {
        !matches!(self, Command::Status | Command::Keys)
    }
}
