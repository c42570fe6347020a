use anyhow::{Context, Result};
use clap::Parser;
use gateway_consul::{AgentRegistration, ConsulClient, ConsulConfig, ConsulResolver, DirectoryAgent};
use gateway_core::{
    ClientPoolFactory, EventBus, NodeId, RelayConfig, SelectionPolicy, ServiceRegistry, SyncRelay,
    SYNC_TOPIC,
};
use gateway_kafka::{KafkaBus, KafkaBusConfig};
use gateway_proxy::{
    serve_connections, GatewayConfig, GatewayMetrics, HttpGateway, HttpRpcTransport,
    RegistrationServer, RegistrationService,
};
use hyper::body::Incoming;
use hyper::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Gateway node: serves registered services over HTTP and keeps its registry
/// in sync with the rest of the fleet
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP gateway bind address
    #[arg(long, env = "GATEWAY_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: SocketAddr,

    /// Registration RPC bind address
    #[arg(long, env = "GATEWAY_RPC_ADDR", default_value = "0.0.0.0:12000")]
    rpc_addr: SocketAddr,

    /// Host this node registers under in the directory
    #[arg(long, env = "GATEWAY_ADVERTISE_HOST", default_value = "127.0.0.1")]
    advertise_host: String,

    /// Consul agent used for self-registration
    #[arg(long, env = "GATEWAY_CONSUL_ADDR", default_value = "http://localhost:8500")]
    consul_addr: String,

    /// Kafka bootstrap brokers
    #[arg(long, env = "GATEWAY_KAFKA_BROKERS", default_value = "localhost:9092")]
    kafka_brokers: String,

    /// Topic carrying registry sync records
    #[arg(long, env = "GATEWAY_SYNC_TOPIC", default_value = SYNC_TOPIC)]
    sync_topic: String,

    /// TTL of this node's directory health check, in seconds
    #[arg(long, env = "GATEWAY_DIRECTORY_TTL_SECS", default_value = "5")]
    directory_ttl_secs: u64,

    /// Deadline for one backend call, in seconds
    #[arg(long, env = "GATEWAY_BACKEND_TIMEOUT_SECS", default_value = "10")]
    backend_timeout_secs: u64,

    /// Backend method invoked for gateway requests
    #[arg(long, env = "GATEWAY_BACKEND_METHOD", default_value = "Say")]
    backend_method: String,

    /// Capacity of the sync relay queue
    #[arg(long, env = "GATEWAY_RELAY_QUEUE", default_value = "1024")]
    relay_queue: usize,

    /// Endpoint selection policy (random, round-robin)
    #[arg(long, env = "GATEWAY_SELECTION", default_value = "random")]
    selection: SelectionPolicy,

    /// Output logs as JSON
    #[arg(long, env = "GATEWAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let node_id = NodeId::generate();
    let backend_timeout = Duration::from_secs(args.backend_timeout_secs);

    info!("Starting gateway-node {}", node_id);
    info!("  HTTP gateway: {}", args.http_addr);
    info!("  Registration RPC: {}", args.rpc_addr);
    info!("  Consul: {}", args.consul_addr);
    info!("  Kafka: {} (topic {})", args.kafka_brokers, args.sync_topic);
    info!("  Endpoint selection: {}", args.selection);

    let bus: Arc<dyn EventBus> = Arc::new(
        KafkaBus::new(KafkaBusConfig {
            brokers: args.kafka_brokers.clone(),
            ..KafkaBusConfig::default()
        })
        .context("Failed to create the Kafka bus")?,
    );

    let pools = ClientPoolFactory::new(
        Arc::new(ConsulResolver::default()),
        Arc::new(HttpRpcTransport::new(backend_timeout)),
        args.selection,
    );
    let registry = Arc::new(
        ServiceRegistry::new(node_id.clone(), pools, bus.clone()).with_topic(&args.sync_topic),
    );
    info!("Service registry initialized");

    let relay = SyncRelay::new(
        registry.clone(),
        bus.clone(),
        RelayConfig {
            topic: args.sync_topic.clone(),
            queue_capacity: args.relay_queue,
        },
    )
    .start()
    .await
    .context("Failed to start the sync relay")?;

    let consul = ConsulClient::new(&args.consul_addr, ConsulConfig::default())
        .context("Invalid Consul address")?;
    let agent = Arc::new(DirectoryAgent::new(
        consul,
        AgentRegistration::new(node_id.as_str(), &args.advertise_host, args.rpc_addr.port())
            .with_ttl(Duration::from_secs(args.directory_ttl_secs)),
    ));
    agent
        .register()
        .await
        .context("Failed to register with the directory")?;
    let heartbeat = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run_heartbeat().await }
    });

    let metrics = GatewayMetrics::new().context("Failed to create metrics")?;

    let rpc_server = Arc::new(RegistrationServer::new(
        args.rpc_addr,
        Arc::new(RegistrationService::new(registry.clone(), metrics.clone())),
    ));
    let mut rpc_task = tokio::spawn({
        let rpc_server = rpc_server.clone();
        async move { rpc_server.run().await }
    });

    let gateway = Arc::new(HttpGateway::new(
        registry.clone(),
        GatewayConfig {
            backend_method: args.backend_method.clone(),
            backend_timeout,
        },
        metrics,
    ));
    let listener = TcpListener::bind(args.http_addr)
        .await
        .with_context(|| format!("Failed to bind the HTTP gateway to {}", args.http_addr))?;
    info!("HTTP gateway listening on {}", args.http_addr);

    let (http_shutdown, shutdown_rx) = watch::channel(false);
    let http_task = tokio::spawn(serve_connections(
        listener,
        move |req: Request<Incoming>| {
            let gateway = gateway.clone();
            async move { gateway.handle(req).await }
        },
        shutdown_rx,
    ));

    let rpc_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for the shutdown signal")?;
            info!("Shutdown signal received");
            None
        }
        result = &mut rpc_task => Some(result),
    };

    rpc_server.stop();
    http_shutdown.send_replace(true);
    relay.abort();
    heartbeat.abort();
    relay.join().await;

    if let Err(e) = agent.deregister().await {
        warn!("Failed to deregister from the directory: {}", e);
    }
    if let Err(e) = http_task.await {
        error!("HTTP gateway task failed: {}", e);
    }

    match rpc_exit {
        Some(result) => {
            result??;
            anyhow::bail!("Registration RPC server exited unexpectedly");
        }
        None => rpc_task.await??,
    }

    info!("gateway-node {} stopped", node_id);
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
