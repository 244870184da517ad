//! Tracks a service backed by the in-memory registry and prints membership
//! once per second while two hosts join and one leaves.

use std::sync::Arc;
use std::time::Duration;

use instance_manager::{MembershipClient, MembershipConfig, MemoryRegistry, Shutdown};

const SERVICE: &str = "my_awesome_service";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("instance_manager=info")
        .init();

    let config = MembershipConfig {
        poll_interval_ms: 500,
        hold_duration_ms: 3000,
        ..MembershipConfig::new(SERVICE)
    };
    let client = MembershipClient::new(config, Arc::new(MemoryRegistry::new()))?;

    let shutdown = Shutdown::new();
    let runner = tokio::spawn({
        let client = client.clone();
        let signal = shutdown.subscribe();
        async move { client.run(signal).await }
    });

    tokio::spawn({
        let client = client.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            for (host, addr) in [("host1", "http://host1:8080"), ("host2", "http://host2:8080")] {
                if let Err(e) = client.register(host, addr).await {
                    eprintln!("{}", e);
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            if let Err(e) = client.deregister("host1").await {
                eprintln!("{}", e);
            }
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for _ in 0..10 {
        ticker.tick().await;
        let mut instances = client.instances();
        instances.sort_by(|a, b| a.name().cmp(b.name()));
        for instance in &instances {
            println!("{} ({})", instance.name(), instance.status());
        }
        if let Ok(holder) = client.data_holder("user:42") {
            println!("user:42 -> {}", holder.name());
        }
        println!();
    }

    shutdown.trigger();
    runner.await??;
    Ok(())
}
