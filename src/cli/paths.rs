//! CLI subcommand: `vpnctl paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;

use crate::admin::{CREDENTIALS_LOCK, PROFILES_LOCK};
use crate::paths::Paths;

pub fn run() -> Result<()> {
    let paths = Paths::resolve()?;

    println!("vpnctl Paths (XDG Base Directory)");
    println!("=================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:      {}", paths.config_file().display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  audit log:        {}", paths.audit_log().display());
    println!();
    match paths.runtime_dir {
        Some(ref dir) => println!("Runtime:    {}", dir.display()),
        None => println!("Runtime:    (not available, locks fall back to state)"),
    }
    println!(
        "  credentials lock: {}",
        paths.resource_lock(CREDENTIALS_LOCK).display()
    );
    println!(
        "  profiles lock:    {}",
        paths.resource_lock(PROFILES_LOCK).display()
    );

    Ok(())
}
