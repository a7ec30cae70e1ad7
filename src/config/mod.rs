use clap::Parser;

pub mod config;
pub mod logging_config;

pub use config::{Config, ConfigError};

#[derive(Debug, Parser)]
#[command(name = "spax", about = "Multi-tenant DICOM archive server")]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "spax.toml")]
    pub config_path: String,
}
