use redis_map::config::MapConfig;
use redis_map::map::MapClient;
use redis_map::server::{router, Gateway};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--redis <url> | --in-memory]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:7000 --in-memory", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:7000 --redis redis://127.0.0.1:6379",
            args[0]
        );

        std::process::exit(1);
    }

    let mut config = MapConfig::from_env()?;
    let mut bind_addr: Option<SocketAddr> = None;
    let mut in_memory = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("--bind needs a value"))?;
                bind_addr = Some(value.parse()?);
                i += 2;
            }
            "--redis" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("--redis needs a value"))?;
                config.redis_url = value.clone();
                i += 2;
            }
            "--in-memory" => {
                in_memory = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;

    // 1. Map client:
    let client = if in_memory {
        tracing::info!("Using the in-process store");
        MapClient::in_memory(config.clone())?
    } else {
        tracing::info!("Using Redis at {}", config.redis_url);
        MapClient::connect(config.clone()).await?
    };
    tracing::info!(
        "Lease ttl={:?}, renewal every {:?}, scan batch {}",
        config.ttl,
        config.renewal_period,
        config.scan_batch_size
    );

    // 2. Gateway state and routes:
    let gateway = Gateway::new(client);
    let app = router(gateway.clone());

    // 3. Spawn stats reporter:
    let stats_gateway: Arc<Gateway> = gateway.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            interval.tick().await;
            tracing::info!(
                "Gateway stats: {} open handles, {} live",
                stats_gateway.open_handles(),
                stats_gateway.client().live_handles()
            );
        }
    });

    // 4. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
