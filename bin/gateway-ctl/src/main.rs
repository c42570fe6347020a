use anyhow::Result;
use clap::{Parser, Subcommand};
use gateway_proxy::{RegistrationClient, SendRequest};
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Operator CLI for a gateway node's registration endpoint
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Registration RPC base URL of the target node
    #[arg(long, env = "GATEWAY_RPC_URL", default_value = "http://127.0.0.1:12000")]
    server: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a service, resolved through the given directory
    Register {
        service: String,
        directory: String,

        /// Attribute the registration to another node
        #[arg(long)]
        origin: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = RegistrationClient::new(&cli.server, Duration::from_secs(cli.timeout_secs))?;

    let request = match cli.command {
        Command::Register {
            service,
            directory,
            origin,
        } => SendRequest {
            origin_node_id: origin,
            ..SendRequest::register(service, directory)
        },
    };

    debug!("Sending {:?} to {}", request, client.url());
    let response = client.send(&request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
