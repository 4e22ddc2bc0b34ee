//! Security primitives for the control plane: the operator audit trail and
//! validation of every value that crosses into a privileged command.

pub mod audit;
pub mod validate;

pub use audit::{AuditAction, AuditEntry, AuditLog, AuditRecord};
pub use validate::{
    InvalidInput, generate_secret, validate_client_name, validate_secret, validate_username,
};
