use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};

use super::context::{orchestrator, report};
use crate::config::Config;
use crate::security::AuditLog;

#[derive(Args)]
pub struct RestartArgs {
    /// What to restart
    #[arg(value_enum, default_value_t = RestartTarget::All)]
    pub target: RestartTarget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RestartTarget {
    /// IPSec container, then the OpenVPN service
    All,
    /// IPSec container only
    Ipsec,
    /// OpenVPN service only
    Openvpn,
}

pub async fn restart(args: RestartArgs, config: &Config) -> Result<()> {
    let admin = orchestrator(config).await?;

    match args.target {
        RestartTarget::All => {
            admin.restart_all().await.map_err(report)?;
            println!("IPSec and OpenVPN services restarted");
        }
        RestartTarget::Ipsec => {
            admin.restart_ipsec().await.map_err(report)?;
            println!("IPSec container {} restarted", config.ipsec.container);
        }
        RestartTarget::Openvpn => {
            let output = admin.restart_openvpn().await.map_err(report)?;
            println!("OpenVPN service restarted");
            if !output.trim().is_empty() {
                println!("{}", output.trim_end());
            }
        }
    }
    Ok(())
}

#[derive(Args)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommands,
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Check the audit log hash chain
    Verify,

    /// Show the most recent audit entries
    Show {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

pub fn audit(args: AuditArgs, config: &Config) -> Result<()> {
    let log = AuditLog::new(config.paths.audit_log());

    match args.command {
        AuditCommands::Verify => {
            let entries = log.read()?;
            let broken = log.verify()?;
            if broken.is_empty() {
                println!(
                    "Audit chain intact: {} entries in {}",
                    entries.len(),
                    log.path().display()
                );
                return Ok(());
            }
            for line in &broken {
                println!("Chain broken at entry {}", line);
            }
            anyhow::bail!("{} broken link(s) in {}", broken.len(), log.path().display());
        }
        AuditCommands::Show { limit } => {
            let entries = log.read()?;
            let skip = entries.len().saturating_sub(limit);
            for entry in entries.into_iter().skip(skip) {
                let exit = entry
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {:<12} {:<9} {:<24} exit={} {}ms  {}",
                    entry.ts,
                    format!("{:?}", entry.action),
                    entry.mode,
                    entry.target,
                    exit,
                    entry.elapsed_ms,
                    entry.command.join(" ")
                );
            }
        }
    }
    Ok(())
}
