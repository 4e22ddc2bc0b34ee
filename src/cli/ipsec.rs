use anyhow::Result;
use clap::{Args, Subcommand};

use super::context::{orchestrator, report};
use crate::config::Config;

#[derive(Args)]
pub struct IpsecArgs {
    #[command(subcommand)]
    pub command: IpsecCommands,
}

#[derive(Subcommand)]
pub enum IpsecCommands {
    /// List IPSec usernames
    List,

    /// Add an IPSec user
    Add {
        username: String,

        /// Password to set (generated when omitted)
        #[arg(short, long, env = "VPNCTL_IPSEC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Remove every record for a user
    Remove { username: String },
}

pub async fn run(args: IpsecArgs, config: &Config) -> Result<()> {
    let admin = orchestrator(config).await?;

    match args.command {
        IpsecCommands::List => {
            let users = admin.list_ipsec_users().await.map_err(report)?;
            if users.is_empty() {
                println!("No IPSec users.");
            }
            for user in users {
                println!("{}", user);
            }
        }
        IpsecCommands::Add { username, password } => {
            let used = admin
                .add_ipsec_user(&username, password.as_deref())
                .await
                .map_err(report)?;
            println!("Added {}", username);
            if password.is_none() {
                println!("Password: {}", used);
            }
        }
        IpsecCommands::Remove { username } => {
            admin.remove_ipsec_user(&username).await.map_err(report)?;
            println!("Removed {}", username);
        }
    }
    Ok(())
}
