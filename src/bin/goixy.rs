//! Goixy binary

use clap::Parser;
use goixy::config::Config;
use goixy::server::Server;
use goixy::{logging, stats, Error, Registry};
use std::sync::Arc;
use tracing::info;

/// Encrypted forwarding proxy
#[derive(Parser, Debug)]
#[command(name = "goixy")]
#[command(about = "SOCKS5/HTTP proxy that relays traffic to encrypted upstream tunnels")]
#[command(version = goixy::VERSION)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Listen port
    #[arg(long, default_value_t = 1080)]
    port: u16,

    /// Increase verbosity (-v for debug, -vv for payload traces)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    logging::init(args.verbose);

    let config = match Config::load() {
        Ok(config) => config,
        Err(e @ Error::KeyFile(_)) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    info!("goixy {}", goixy::VERSION);
    if config.routed.host.is_empty() && config.direct.host.is_empty() {
        info!("no upstreams configured; tunnels will fail until config.json exists");
    } else {
        info!(
            "upstreams: routed {} / direct {} ({} whitelist patterns)",
            config.routed.addr(),
            config.direct.addr(),
            config.whitelist.len()
        );
    }

    let registry = Arc::new(Registry::default());
    tokio::spawn(stats::report_loop(Arc::clone(&registry)));

    let server = Server::new(Arc::new(config), registry);
    if let Err(e) = server.run(&args.host, args.port).await {
        eprintln!("Error: cannot listen on {}:{}: {e}", args.host, args.port);
        std::process::exit(2);
    }
}
