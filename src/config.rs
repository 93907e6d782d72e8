//! Command-line and environment configuration.

use crate::delivery::DeliveryMode;
use crate::store::LocalStore;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1:9003";
pub const DEFAULT_INTERVAL_MS: u64 = 180_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Trackium location agent
///
/// Periodically determines this device's approximate location and relays
/// it to a Minima node. Readings the node has not acknowledged are kept in
/// a local queue and retried every cycle.
///
/// Examples:
///   trackium --device-id TRACK-001-ABC
///   TRACKIUM_DEVICE_ID=TRACK-001-ABC trackium --delivery keypair
///   trackium --device-id TRACK-001-ABC --once
#[derive(Parser, Debug)]
#[command(name = "trackium", version, about, long_about = None)]
pub struct Cli {
    /// Device identifier. Prompted for on stdin when absent.
    #[arg(long, env = "TRACKIUM_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Base URL of the Minima node.
    #[arg(long, env = "MINIMA_NODE_URL", default_value = DEFAULT_NODE_URL)]
    pub node_url: String,

    /// Milliseconds between the end of one cycle and the start of the next.
    /// Zero or unparseable values fall back to 180000.
    #[arg(long, env = "UPDATE_INTERVAL")]
    pub interval_ms: Option<String>,

    /// Delivery strategy: "direct" (POST per reading) or "keypair"
    /// (append to the node's pending_location_updates key).
    #[arg(long, env = "TRACKIUM_DELIVERY", default_value = "direct", value_parser = parse_mode)]
    pub delivery: DeliveryMode,

    /// Directory for last-known state and the pending queue. Defaults to ~/.trackium.
    #[arg(long, env = "TRACKIUM_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Per-request HTTP timeout in milliseconds.
    #[arg(
        long,
        env = "TRACKIUM_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub request_timeout_ms: u64,

    /// Run a single cycle and exit.
    #[arg(long)]
    pub once: bool,
}

fn parse_mode(s: &str) -> Result<DeliveryMode, String> {
    s.parse()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no device id given and none could be read from stdin")]
    MissingDeviceId,
    #[error("could not read device id: {0}")]
    Prompt(#[from] std::io::Error),
    #[error("node URL must start with http:// or https://, got '{0}'")]
    InvalidNodeUrl(String),
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub device_id: String,
    pub node_url: String,
    pub interval: Duration,
    pub delivery: DeliveryMode,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub once: bool,
}

impl Config {
    /// Combine parsed arguments with a device id that is known to be present.
    pub fn from_cli(cli: Cli, device_id: String) -> Result<Self, ConfigError> {
        let device_id = device_id.trim().to_string();
        if device_id.is_empty() {
            return Err(ConfigError::MissingDeviceId);
        }

        let node_url = cli.node_url.trim().trim_end_matches('/').to_string();
        if !(node_url.starts_with("http://") || node_url.starts_with("https://")) {
            return Err(ConfigError::InvalidNodeUrl(cli.node_url));
        }

        let interval_ms = match cli.interval_ms.as_deref() {
            None => DEFAULT_INTERVAL_MS,
            Some(raw) => parse_interval_ms(raw).unwrap_or_else(|| {
                tracing::warn!(
                    value = raw,
                    "invalid update interval, using default of {} ms",
                    DEFAULT_INTERVAL_MS
                );
                DEFAULT_INTERVAL_MS
            }),
        };

        Ok(Self {
            device_id,
            node_url,
            interval: Duration::from_millis(interval_ms),
            delivery: cli.delivery,
            data_dir: cli.data_dir.unwrap_or_else(LocalStore::default_dir),
            request_timeout: Duration::from_millis(cli.request_timeout_ms),
            once: cli.once,
        })
    }
}

/// Leading decimal digits of `raw`, if they form a positive number.
///
/// "5000", " 5000ms" and "5000.5" all give 5000; "", "0" and "fast" give
/// `None`.
pub fn parse_interval_ms(raw: &str) -> Option<u64> {
    let digits: String = raw
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().filter(|&ms| ms > 0)
}

/// Ask for a device id interactively. EOF or a blank line is an error.
pub fn prompt_device_id<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<String, ConfigError> {
    writeln!(output)?;
    writeln!(output, "No Device ID provided!")?;
    writeln!(output, "Set TRACKIUM_DEVICE_ID or enter it now.")?;
    write!(output, "Enter Device ID (e.g., TRACK-XXX-YYY): ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let id = line.trim();
    if id.is_empty() {
        return Err(ConfigError::MissingDeviceId);
    }
    Ok(id.to_string())
}
