use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use vpnctl::cli::{self, Cli, Commands};
use vpnctl::config::{Config, LoggingConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let explicit = cli.config.as_deref().map(Path::new);

    // `config` and `paths` work even when the config file does not parse.
    match cli.command {
        Commands::Config(args) => {
            init_logging(&LoggingConfig::default(), cli.verbose);
            return cli::config::run(args, explicit);
        }
        Commands::Paths => {
            init_logging(&LoggingConfig::default(), cli.verbose);
            return cli::paths::run();
        }
        _ => {}
    }

    let config = Config::load_from(explicit)?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Serve(args) => cli::serve::run(args, &config).await,
        Commands::Ipsec(args) => cli::ipsec::run(args, &config).await,
        Commands::Openvpn(args) => cli::openvpn::run(args, &config).await,
        Commands::Restart(args) => cli::system::restart(args, &config).await,
        Commands::Audit(args) => cli::system::audit(args, &config),
        Commands::Config(_) | Commands::Paths => Ok(()),
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = if verbose {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
