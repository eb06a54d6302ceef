use std::path::PathBuf;

use clap::Parser;

use crate::utils::types::Address;

/// Startup flags for a chordify node.
#[derive(Parser, Debug)]
#[command(name = "chordify", about = "A Chord-style distributed key-value store node")]
pub struct Cli {
    /// IP address the node listens on
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,

    /// TCP port the node listens on
    #[arg(long)]
    pub port: u16,

    /// Address (ip:port) of an existing ring member to join through
    #[arg(long)]
    pub peer: Option<Address>,

    /// Path to an optional ini configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}
