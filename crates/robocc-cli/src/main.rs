//! robocc CLI: run an agent or a control center.

mod shutdown;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use robocc_node::config::parse_agent_address;
use robocc_node::{setup, Agent, Config, ConnectionManager};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "robocc",
    about = "Remote control for hardware agents",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent until interrupted.
    Agent {
        /// Port to listen on for control centers (default 1976).
        port: Option<u16>,

        /// Address to bind to.
        #[arg(short, long)]
        bind: Option<String>,

        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Run a control center subscribed to the given agents until interrupted.
    Control {
        /// Agents to connect to (`host` or `host:port`), in addition to
        /// those listed in the configuration.
        addresses: Vec<String>,

        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Generate a TLS certificate for this machine.
    GenerateCert {
        /// Output directory for certificate files.
        #[arg(short, long, default_value = ".")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent { port, bind, config } => run_agent(port, bind, config.as_deref()).await,
        Commands::Control { addresses, config } => run_control(&addresses, config.as_deref()).await,
        Commands::GenerateCert { output } => {
            init_logging("info");
            generate_cert(&output)
        }
    }
}

fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config = setup::load_config(path)?;
    init_logging(&config.node.log_level);
    Ok(config)
}

async fn run_agent(
    port: Option<u16>,
    bind: Option<String>,
    config_path: Option<&str>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let mut agent_config = config.agent.clone();
    if let Some(port) = port {
        agent_config.port = port;
    }
    if let Some(bind) = bind {
        agent_config.bind = bind;
    }

    let addr = agent_config.bind_addr()?;
    let (cert_pem, key_pem) = setup::load_or_generate_certs(&setup::config_dir())?;
    let agent = Agent::new(
        addr,
        config.identity.name.clone(),
        std::process::id(),
        cert_pem,
        key_pem,
    );

    agent
        .run_until(shutdown::signal())
        .await
        .context("agent failed")?;
    Ok(())
}

async fn run_control(addresses: &[String], config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let mut targets = Vec::new();
    for entry in &config.controller.agents {
        targets.push(entry.host_port()?);
    }
    for address in addresses {
        targets.push(parse_agent_address(address)?);
    }

    let addr = config.controller.bind_addr()?;
    let (cert_pem, key_pem) = setup::load_or_generate_certs(&setup::config_dir())?;
    let manager = ConnectionManager::new(addr, cert_pem, key_pem);
    manager.start().context("failed to start callback service")?;

    for (host, port) in &targets {
        if manager.connect(host, *port).await.is_none() {
            warn!(host = %host, port, "agent not connected");
        }
    }
    info!(
        connected = manager.len(),
        requested = targets.len(),
        "control center running"
    );

    shutdown::signal().await;
    manager.stop().await?;
    Ok(())
}

fn generate_cert(output: &str) -> anyhow::Result<()> {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "robocc".to_string());

    info!(hostname = %hostname, output = %output, "generating TLS certificate");

    let cert = robocc_certgen::generate_certificate(&hostname)?;
    let (cert_path, key_path) = cert.write_to(&PathBuf::from(output))?;

    println!("Certificate: {}", cert_path.display());
    println!("Private key: {}", key_path.display());
    println!("Fingerprint: {}", cert.fingerprint);
    Ok(())
}
