use anyhow::Result;
use clap::{Args, Subcommand};
use std::fs;
use std::path::PathBuf;

use super::context::{orchestrator, report};
use crate::config::Config;

#[derive(Args)]
pub struct OpenvpnArgs {
    #[command(subcommand)]
    pub command: OpenvpnCommands,
}

#[derive(Subcommand)]
pub enum OpenvpnCommands {
    /// List client profiles
    List {
        /// Output format: text (default) or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Create one or more client profiles
    Create {
        #[arg(required = true)]
        names: Vec<String>,

        /// Copy each new profile into this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Revoke a client and delete its profile
    Delete { name: String },
}

pub async fn run(args: OpenvpnArgs, config: &Config) -> Result<()> {
    let admin = orchestrator(config).await?;

    match args.command {
        OpenvpnCommands::List { format } => {
            let profiles = admin.list_openvpn_profiles(false).await.map_err(report)?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&profiles)?);
                return Ok(());
            }
            if profiles.is_empty() {
                println!("No OpenVPN profiles in {}", config.openvpn.profile_dir);
            }
            for profile in profiles {
                println!(
                    "{:<24} {:>8} bytes  {}",
                    profile.client_name,
                    profile.file_size,
                    profile.file_path.display()
                );
            }
        }
        OpenvpnCommands::Create { names, output_dir } => {
            let created = admin
                .create_openvpn_profiles(&names)
                .await
                .map_err(report)?;
            for c in created {
                println!(
                    "Created {} ({} bytes)",
                    c.profile.file_path.display(),
                    c.profile.file_size
                );
                if let (Some(dir), Some(content)) = (&output_dir, &c.profile.content) {
                    fs::create_dir_all(dir)?;
                    let dest = dir.join(format!("{}.ovpn", c.profile.client_name));
                    fs::write(&dest, content)?;
                    println!("  copied to {}", dest.display());
                }
            }
        }
        OpenvpnCommands::Delete { name } => {
            admin.delete_openvpn_profile(&name).await.map_err(report)?;
            println!("Deleted {}", name);
        }
    }
    Ok(())
}
