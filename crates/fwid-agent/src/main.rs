//! Identity agent daemon
//!
//! Runs in the user's session and logs the user in to the firewall
//! identity service with their Kerberos credentials.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fwid_agent::client::{HelperNegotiator, HttpSessionService};
use fwid_agent::ipc::IpcServer;
use fwid_agent::krbmon::{CCacheMonitor, ConfMonitor};
use fwid_agent::notifier::default_notifier;
use fwid_agent::sleep::SleepMonitor;
use fwid_agent::tnd::ProbeDetector;
use fwid_agent::{Agent, AgentParts};
use fwid_core::config::{self, AgentConfig, TndServer};

#[derive(Parser)]
#[command(name = "fwid-agent")]
#[command(about = "Kerberos identity agent for firewall user identification")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identity service URL
    #[arg(long, env = "FWID_SERVICE_URL")]
    service_url: Option<String>,

    /// Kerberos realm
    #[arg(long, env = "FWID_REALM")]
    realm: Option<String>,

    /// Default keep-alive interval in minutes
    #[arg(long)]
    keep_alive: Option<u64>,

    /// Login timeout in seconds
    #[arg(long)]
    login_timeout: Option<u64>,

    /// Logout timeout in seconds
    #[arg(long)]
    logout_timeout: Option<u64>,

    /// Login retry timer in seconds
    #[arg(long)]
    retry_timer: Option<u64>,

    /// Trusted network servers as comma separated `url=hash` pairs
    #[arg(long, value_delimiter = ',', value_parser = parse_tnd_server)]
    tnd_servers: Option<Vec<TndServer>>,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,

    /// Seconds to wait before starting the agent
    #[arg(long)]
    start_delay: Option<u64>,

    /// Show desktop notifications
    #[arg(long)]
    notifications: Option<bool>,

    /// Credential cache file (overrides KRB5CCNAME)
    #[arg(long)]
    ccache: Option<PathBuf>,

    /// Control socket path
    #[arg(long)]
    socket: Option<PathBuf>,
}

impl Args {
    /// Apply command line overrides on top of the loaded configuration
    fn apply(self, config: &mut AgentConfig) {
        if let Some(url) = self.service_url {
            config.service_url = url;
        }
        if let Some(realm) = self.realm {
            config.realm = realm;
        }
        if let Some(minutes) = self.keep_alive {
            config.keep_alive = Duration::from_secs(minutes.saturating_mul(60));
        }
        if let Some(secs) = self.login_timeout {
            config.login_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.logout_timeout {
            config.logout_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.retry_timer {
            config.retry_timer = Duration::from_secs(secs);
        }
        if let Some(servers) = self.tnd_servers {
            config.tnd.https_servers = servers;
        }
        if self.verbose {
            config.verbose = true;
        }
        if let Some(secs) = self.start_delay {
            config.start_delay = Duration::from_secs(secs);
        }
        if let Some(enabled) = self.notifications {
            config.notifications = enabled;
        }
        if let Some(path) = self.ccache {
            config.ccache_file = Some(path);
        }
        if let Some(path) = self.socket {
            config.ipc_socket = Some(path);
        }
    }
}

fn parse_tnd_server(value: &str) -> Result<TndServer, String> {
    let (url, hash) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("expected url=hash, got '{}'", value))?;
    Ok(TndServer {
        url: url.to_string(),
        hash: hash.to_string(),
    })
}

fn load_config(args: Args) -> Result<AgentConfig> {
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path)
                .with_context(|| format!("Failed to load config from {:?}", default_path))?
        } else {
            AgentConfig::default()
        }
    };

    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_parts(config: &AgentConfig) -> Result<AgentParts> {
    let negotiator = HelperNegotiator::new(config.negotiate_helper.clone());
    let service = HttpSessionService::new(config, Arc::new(negotiator))
        .context("Failed to create identity service client")?;

    Ok(AgentParts {
        control: Box::new(IpcServer::new(config.ipc_socket_path())),
        ccache: Box::new(CCacheMonitor::for_user(config.ccache_file.clone())),
        krb5_conf: Box::new(ConfMonitor::for_file(config.krb5_conf.clone())),
        detector: Box::new(ProbeDetector::new(config.tnd.probe_interval)),
        sleep: Box::new(SleepMonitor::default()),
        notifier: default_notifier(),
        service: Arc::new(service),
    })
}

/// Wait for Ctrl+C or SIGTERM, returning the signal name
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install signal handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                Ok("Ctrl+C")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        Ok("Ctrl+C")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args)?;

    // Initialize logging
    let log_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !config.start_delay.is_zero() {
        tracing::info!("Waiting {}s before starting", config.start_delay.as_secs());
        tokio::time::sleep(config.start_delay).await;
    }

    tracing::info!("Identity agent starting...");
    let parts = build_parts(&config)?;
    let mut agent = Agent::new(config, parts);
    agent.start().await.context("Failed to start agent")?;

    let result = tokio::select! {
        signal = shutdown_signal() => signal.map(|name| {
            tracing::info!("Received {}, initiating shutdown...", name);
        }),
        Some(e) = agent.errors().recv() => Err(e.into()),
    };

    agent.stop().await;
    result?;

    tracing::info!("Identity agent shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tnd_server() {
        let server = parse_tnd_server("https://tnd.example.com:8443/?a=b=0123abcd").unwrap();
        assert_eq!(server.url, "https://tnd.example.com:8443/?a=b");
        assert_eq!(server.hash, "0123abcd");
        assert!(parse_tnd_server("https://tnd.example.com").is_err());
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "fwid-agent",
            "--service-url",
            "https://id.example.com",
            "--realm",
            "EXAMPLE.COM",
            "--keep-alive",
            "10",
            "--tnd-servers",
            "https://a.example.com=aa,https://b.example.com=bb",
            "--notifications",
            "false",
        ]);
        let mut config = AgentConfig::default();
        args.apply(&mut config);

        assert_eq!(config.service_url, "https://id.example.com");
        assert_eq!(config.realm, "EXAMPLE.COM");
        assert_eq!(config.keep_alive, Duration::from_secs(600));
        assert_eq!(config.tnd.https_servers.len(), 2);
        assert_eq!(config.tnd.https_servers[1].hash, "bb");
        assert!(!config.notifications);
        assert_eq!(config.retry_timer, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }
}
