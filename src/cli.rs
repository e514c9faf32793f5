//! Command line interface for the `tablestream` receiver binary.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `tablestream` binary.
#[derive(Debug, Parser)]
#[command(
    name = "tablestream",
    version,
    about = "Receive table streams and log the messages delivered to each session"
)]
pub struct Cli {
    /// Address to accept streaming connections on.
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    pub listen: SocketAddr,

    /// TOML file with inbound pipeline settings.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to serve Prometheus metrics on.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_listen_and_config() {
        let cli = Cli::parse_from([
            "tablestream",
            "--listen",
            "0.0.0.0:7001",
            "--config",
            "inbound.toml",
        ]);
        assert_eq!(cli.listen.port(), 7001);
        assert_eq!(cli.config.as_deref(), Some("inbound.toml".as_ref()));
        assert!(cli.metrics_addr.is_none());
    }

    #[test]
    fn defaults_listen_address() {
        let cli = Cli::parse_from(["tablestream"]);
        assert_eq!(cli.listen, "127.0.0.1:7000".parse().expect("address"));
    }
}
