//! ss-relay: Shadowsocks relay server
//!
//! Accepts `none`-method tunnels on one TCP/UDP port and connects every
//! destination directly.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration path
//! ./ss-relay
//!
//! # Run with custom configuration
//! ./ss-relay -c /path/to/config.json
//!
//! # Run with environment overrides
//! SS_RELAY_LOG_LEVEL=debug ./ss-relay
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use ss_relay::config::{load_config_with_env, Config};
use ss_relay::relay::{DirectHandler, NoneService, RelayListener};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/ss-relay/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("ss-relay v{}", ss_relay::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r"ss-relay v{}

Shadowsocks relay server for the `none` method.

USAGE:
    ss-relay [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/ss-relay/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    SS_RELAY_LISTEN_ADDR    Override listen address
    SS_RELAY_LOG_LEVEL      Override log level (trace, debug, info, warn, error)
    SS_RELAY_METHOD         Override method name
    SS_RELAY_PASSWORD       Override password
    RUST_LOG                Additional tracing filter directives
",
        ss_relay::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "tokio=warn".parse() {
        filter = filter.add_directive(directive);
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        ss_relay::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("ss-relay v{}", ss_relay::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let method = config.method.build()?;
    info!(method = method.name(), "Method ready");

    let handler = Arc::new(DirectHandler::new(
        config.outbound.connect_timeout(),
        config.listen.udp_timeout(),
    ));
    let service = Arc::new(NoneService::new(config.listen.udp_timeout(), handler));

    let listener = Arc::new(
        RelayListener::bind(&config.listen, Arc::clone(&service))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind relay listener: {e}"))?,
    );

    info!(
        "ss-relay ready on {} (UDP: {})",
        listener.local_addr()?,
        config.listen.udp_enabled
    );
    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    let runner = Arc::clone(&listener);
    let run_handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    listener.shutdown();
    match tokio::time::timeout(std::time::Duration::from_secs(5), run_handle).await {
        Ok(Ok(Err(e))) => warn!("Listener exited with error: {}", e),
        Ok(Err(e)) => warn!("Listener task failed: {}", e),
        Err(_) => warn!("Listener did not stop within 5s"),
        Ok(Ok(Ok(()))) => {}
    }

    let stats = listener.stats_snapshot();
    info!(
        "Final TCP stats: {} accepted, {} active, {} protocol errors",
        stats.connections_accepted, stats.active_connections, stats.protocol_errors
    );
    let udp = service.udp_stats();
    info!(
        "Final UDP stats: {} packets, {} rejected, {} sessions created, {} dropped",
        stats.packets_received, stats.packet_errors, udp.sessions_created, udp.packets_dropped
    );

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
