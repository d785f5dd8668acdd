use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use smartcasa_bridge::cli::{resolve_instance_id, Args};
use smartcasa_bridge::{AppConfig, HassHost, SyncBridge};

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = AppConfig::load(&args.config)?;
    if args.check {
        println!(
            "configuration OK: {} -> {}",
            config.integration.name,
            config.integration.endpoint_url()
        );
        return Ok(());
    }

    let instance_id = resolve_instance_id(args.instance.as_deref());
    let host = Arc::new(HassHost::new(&config.hub));
    let bridge = SyncBridge::new();
    let mut handle = bridge.setup(&instance_id, &config.integration, config.options, host);

    let failure = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            None
        }
        err = handle.failure() => Some(err),
    };
    match &failure {
        None => info!(instance = %instance_id, status = %handle.status().channel, "shutting down"),
        Some(e) => error!(instance = %instance_id, error = %e, "bridge job failed, shutting down"),
    }
    handle.unload().await;
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
