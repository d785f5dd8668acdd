use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "smartcasa-bridge")]
#[command(version)]
#[command(about = "Relays Home Assistant states to a SmartCasa server and runs its remote commands")]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "smartcasa.toml")]
    pub config: PathBuf,

    /// Opaque instance id; a random one is generated when omitted
    #[arg(long)]
    pub instance: Option<String>,

    /// Log filter (e.g. info, debug, smartcasa_bridge=trace); RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    pub check: bool,
}

/// The id the instance runs under.
pub fn resolve_instance_id(explicit: Option<&str>) -> String {
    match explicit {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}
