//! rndc-cli - one-shot control commands for BIND name servers.

mod conf;

use clap::Parser;
use colored::Colorize;
use rndc_client::{RndcClient, RndcConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rndc-cli")]
#[command(about = "Send control commands to a BIND name server")]
#[command(version)]
struct Cli {
    /// Server host name or address
    #[arg(short, long, default_value = "127.0.0.1", env = "RNDC_SERVER")]
    server: String,

    /// Control-channel port
    #[arg(short, long, default_value_t = rndc_protocol::DEFAULT_PORT, env = "RNDC_PORT")]
    port: u16,

    /// Base64-encoded HMAC-MD5 key
    #[arg(short, long, env = "RNDC_KEY")]
    key: Option<String>,

    /// Read the key from an rndc.conf-style file instead
    #[arg(short, long, env = "RNDC_CONF", conflicts_with = "key")]
    conf: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// The command to send, e.g. `status` or `reload example.org`
    #[arg(required = true)]
    command: Vec<String>,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", "Error".red(), message);
    std::process::exit(1);
}

fn resolve_key(cli: &Cli) -> String {
    if let Some(key) = &cli.key {
        return key.clone();
    }
    if let Some(path) = &cli.conf {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => fail(format_args!("{}: {}", path.display(), err)),
        };
        match conf::parse_key(&text) {
            Ok(key) => return key.secret,
            Err(err) => fail(format_args!("{}: {}", path.display(), err)),
        }
    }
    fail("a key is required: pass --key or --conf")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let key = resolve_key(&cli);
    let command = cli.command.join(" ");

    let config = RndcConfig::new(cli.server.clone(), key)
        .with_port(cli.port)
        .with_request_timeout(Duration::from_secs(cli.timeout));
    let client = RndcClient::new(config);

    match client.command(&command).await {
        Ok(response) => println!("{}", response),
        Err(err) => fail(err),
    }
}
