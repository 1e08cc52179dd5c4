//! NAT1 Traversal CLI
//!
//! Opens a port behind a full-cone NAT: keeps the public mapping alive,
//! publishes it to DNS and forwards traffic to a local service.

mod config;
mod dns;
mod liveness;
mod log_filter;
mod supervisor;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddrV4;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, DEFAULT_LOCAL_IP, DEFAULT_REMOTE_IP, WriteBack, parse_endpoint};
use dns::DnsCredentials;
use nat1_stun::{MappingResolver, NatClassifier, StunProbe, Transport};
use supervisor::{RecordTemplate, Supervisor};

/// NAT1 Traversal - expose a local port through a full-cone NAT
#[derive(Parser)]
#[command(name = "nat1-traversal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Local address to map, `[ip]:[port]`
    #[arg(short, long, num_args = 0..=1, default_missing_value = ":")]
    local: Option<String>,

    /// Forward target, `[ip]:[port]`; omit for shared-port mode
    #[arg(short, long, num_args = 0..=1, default_missing_value = ":")]
    remote: Option<String>,

    /// Use UDP instead of TCP
    #[arg(short, long)]
    udp: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Test the NAT type and exit
    #[arg(short = 't', long)]
    nat_type_test: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = Path::new(&cli.config);
    let (mut config, write_back) = if cli.nat_type_test && !config_path.exists() {
        (Config::default(), WriteBack::Unchanged)
    } else {
        Config::load_normalised(config_path)?
    };

    // Initialize logging
    let level = if cli.debug {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match write_back {
        WriteBack::Unchanged => {}
        WriteBack::Rewritten => info!(path = %config_path.display(), "config file normalised"),
        WriteBack::Failed(e) => {
            warn!(path = %config_path.display(), "cannot write back config file: {e:#}");
        }
    }

    // Command line overrides the file
    if let Some(local) = cli.local {
        config.forward.local = Some(local);
    }
    if let Some(remote) = cli.remote {
        config.forward.remote = Some(remote);
    }
    if cli.udp {
        config.forward.transport = Transport::Udp.to_string();
    }
    config.validate()?;

    let transport: Transport = config
        .forward
        .transport
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let probe = StunProbe::new()
        .with_timeout(Duration::from_secs(config.stun.timeout_secs))
        .with_retries(config.stun.retries);

    let local = config
        .local_addr()?
        .or_else(|| cli.nat_type_test.then_some(SocketAddrV4::new(DEFAULT_LOCAL_IP, 0)))
        .context("no local address configured (use -l or forward.local)")?;
    debug!(%local, %transport, server_tcp = %config.stun.tcp_server, server_udp = %config.stun.udp_server, "effective configuration");

    if cli.nat_type_test {
        return nat_type_test(&config, transport, local, probe).await;
    }

    let remote = match config.forward.remote.as_deref() {
        Some(remote) => parse_endpoint(remote, DEFAULT_REMOTE_IP)?,
        None => None,
    };
    if remote.is_none() {
        if transport == Transport::Udp {
            anyhow::bail!("shared-port mode supports TCP only; set a remote address for UDP");
        }
        if local.port() == 0 {
            anyhow::bail!("shared-port mode needs a fixed local port");
        }
    }

    nat1_stun::socket::check_available(local)
        .with_context(|| format!("local address {local} is not available"))?;

    let server = match transport {
        Transport::Tcp => config.stun.tcp_server.clone(),
        Transport::Udp => config.stun.udp_server.clone(),
    };
    let credentials = DnsCredentials {
        id: config.dns.id.clone(),
        token: config.dns.token.clone(),
    };
    let provider = dns::create_provider(&config.dns.provider, credentials)?;
    let template = RecordTemplate {
        srv_prefix: config::srv_prefix(&config.dns.service)
            .unwrap_or_default()
            .to_string(),
        sub_domain: config.dns.sub_domain.clone(),
        domain: config.dns.domain.clone(),
    };
    let supervisor = Supervisor::new(
        local,
        MappingResolver::new(transport, server, probe),
        provider,
        template,
    );

    tokio::select! {
        () = async {
            match remote {
                Some(target) => supervisor.run_forward(target).await,
                None => supervisor.run_shared().await,
            }
        } => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for ctrl-c")?;
            info!("interrupted, exiting");
        }
    }

    Ok(())
}

async fn nat_type_test(
    config: &Config,
    transport: Transport,
    local: SocketAddrV4,
    probe: StunProbe,
) -> anyhow::Result<()> {
    let classifier = NatClassifier::new(
        config.stun.tcp_server.clone(),
        config.stun.udp_server.clone(),
        probe,
    );
    let classification = classifier.classify(transport, local).await;

    println!(
        "{} NAT{}: {}",
        classification.transport,
        classification.nat_type.code(),
        classification.nat_type.verdict()
    );
    if let Some(mapped) = classification.mapped_addr {
        println!("Public address: {mapped}");
    }
    if let Some(error) = &classification.error {
        anyhow::bail!("NAT type test failed: {error}");
    }
    Ok(())
}
