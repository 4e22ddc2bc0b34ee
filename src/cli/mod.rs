pub mod config;
pub mod context;
pub mod ipsec;
pub mod openvpn;
pub mod paths;
pub mod serve;
pub mod system;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vpnctl")]
#[command(author, version, about = "Control plane for IPSec and OpenVPN servers")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "VPNCTL_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve(serve::ServeArgs),

    /// Manage IPSec users
    Ipsec(ipsec::IpsecArgs),

    /// Manage OpenVPN client profiles
    Openvpn(openvpn::OpenvpnArgs),

    /// Restart VPN services
    Restart(system::RestartArgs),

    /// Inspect the audit log
    Audit(system::AuditArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}
