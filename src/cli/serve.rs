use anyhow::Result;
use clap::Args;

use super::context::orchestrator;
use crate::config::Config;
use crate::server::Server;

#[derive(Args)]
pub struct ServeArgs {
    /// Override server.port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override server.bind
    #[arg(short, long)]
    pub bind: Option<String>,
}

pub async fn run(args: ServeArgs, config: &Config) -> Result<()> {
    let mut config = config.clone();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let admin = orchestrator(&config).await?;
    let server = Server::new(&config, admin)?;
    server.run().await
}
