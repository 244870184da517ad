//! Instance manager daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────────┐
//!                   │                  INSTANCE MANAGER                     │
//!                   │                                                       │
//!   Consul  ◀───────┼── health::observer ──changes──▶ membership::client    │
//!   catalog  poll   │                                  merge loop           │
//!                   │                                   │    ▲              │
//!                   │                          add/remove│    │evictions     │
//!                   │                                   ▼    │              │
//!                   │                            eviction::holder           │
//!                   │                                                       │
//!                   │  membership::table + routing rings (RwLock)           │
//!                   │        ▲                                              │
//!   iman-cli ───────┼── admin API (reads, register/deregister)              │
//!                   │                                                       │
//!                   │  config · observability · lifecycle                   │
//!                   └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use instance_manager::admin::{setup_admin_router, AdminState};
use instance_manager::config::load_config;
use instance_manager::lifecycle::{signals, Shutdown};
use instance_manager::observability::{logging, metrics};
use instance_manager::{ConsulRegistry, MembershipClient};

#[derive(Parser)]
#[command(name = "instance-manager", version)]
#[command(about = "Tracks live instances of a registry service and routes keys to them")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "instance-manager.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        service = %config.membership.service_name,
        "instance-manager starting"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let registry = Arc::new(ConsulRegistry::with_timeout(
        &config.registry.address,
        config.registry.datacenter.clone(),
        config.registry.timeout(),
    )?);
    tracing::info!(registry = %config.registry.address, "Registry client ready");

    let client = MembershipClient::new(config.membership.clone(), registry)?;
    let shutdown = Shutdown::new();
    tokio::spawn(signals::trigger_on_signal(shutdown.clone()));

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let router = setup_admin_router(AdminState::new(
            client.clone(),
            config.admin.api_key.as_str(),
        ));
        let signal = shutdown.subscribe();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        }))
    } else {
        None
    };

    let result = client.run(shutdown.subscribe()).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Membership client failed");
    }
    shutdown.trigger();

    if let Some(handle) = admin {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Admin server error"),
            Err(e) => tracing::error!(error = %e, "Admin server task panicked"),
        }
    }

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}
