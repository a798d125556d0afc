use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// The command line interface for sensor bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Serial port to read from, overrides the configuration
    #[arg(long)]
    pub device: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(long)]
    pub baud: Option<u32>,

    /// HTTP port, overrides the configuration
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Also write traces to daily rolling files in this directory
    #[arg(long)]
    pub trace_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Apply any overrides given on the command line.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(baud) = self.baud {
            config.baud = baud;
        }
        if let Some(http_port) = self.http_port {
            config.http_port = http_port;
        }
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}
