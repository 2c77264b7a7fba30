//! # Command Line
//!
//! `shadow-uplink [-p <seconds>] [-c <config>]`

use clap::Parser;
use std::path::PathBuf;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "shadow-uplink.toml";

#[derive(Debug, Parser)]
#[command(
    name = "shadow-uplink",
    version,
    about = "Upload buffered telemetry records to a device shadow whenever the network is up"
)]
pub struct Cli {
    /// How often to check the data directory for records to upload (in seconds).
    /// Defaults to every 60 s.
    #[arg(short = 'p', value_name = "period")]
    pub period: Option<u64>,

    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}
