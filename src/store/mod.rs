//! Persistent VPN state owned by the host: IPSec accounts in the CHAP
//! secrets file and OpenVPN client profiles on disk.

mod credentials;
mod profiles;

pub use credentials::CredentialStore;
pub use profiles::{CreatedProfile, OpenVpnProfile, ProfileStore};
