//! vpnctl - control plane for IPSec (L2TP) and OpenVPN servers
//!
//! This crate provides:
//! - Privileged command execution through a container engine, with
//!   timeouts, exit-status policy and a hash-chained audit log
//! - IPSec credential management (CHAP secrets file)
//! - OpenVPN client profile provisioning and revocation
//! - An authenticated HTTP API and a CLI over the same operations

pub mod admin;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod exec;
pub mod paths;
pub mod security;
pub mod server;
pub mod store;

pub use admin::{AdminError, LifecycleOrchestrator};
pub use config::Config;
