//! Input validation for values that end up in privileged command arguments
//! or in line-oriented secrets files.
//!
//! Commands are always built as argument vectors, so shell quoting is never
//! the defense. The rules here keep records parseable (no field separators,
//! no comment markers) and keep values from being read as options or as
//! regex syntax by the remote tools.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use thiserror::Error;

pub const MAX_NAME_LEN: usize = 64;
const MAX_SECRET_LEN: usize = 128;
const GENERATED_SECRET_BYTES: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidInput(pub String);

/// IPSec usernames: `[A-Za-z0-9._@-]`, 1-64 chars, no leading `-`.
pub fn validate_username(username: &str) -> Result<(), InvalidInput> {
    if username.is_empty() {
        return Err(InvalidInput("username is required".into()));
    }
    if username.len() > MAX_NAME_LEN {
        return Err(InvalidInput(format!(
            "username must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    if username.starts_with('-') {
        return Err(InvalidInput("username must not start with '-'".into()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'))
    {
        return Err(InvalidInput(
            "invalid username: only letters, digits, '.', '_', '@' and '-' allowed".into(),
        ));
    }
    Ok(())
}

/// Caller-supplied secrets: printable ASCII without whitespace, quotes or
/// backslashes, so the record stays one line of four fields.
pub fn validate_secret(secret: &str) -> Result<(), InvalidInput> {
    if secret.is_empty() {
        return Err(InvalidInput("password must not be empty".into()));
    }
    if secret.len() > MAX_SECRET_LEN {
        return Err(InvalidInput(format!(
            "password must be at most {} characters",
            MAX_SECRET_LEN
        )));
    }
    if !secret
        .chars()
        .all(|c| c.is_ascii_graphic() && !matches!(c, '"' | '\'' | '\\' | '`'))
    {
        return Err(InvalidInput(
            "invalid password: whitespace, quotes, backquotes and backslashes are not allowed"
                .into(),
        ));
    }
    Ok(())
}

/// OpenVPN client names: `[A-Za-z0-9_-]`, 1-64 chars.
pub fn validate_client_name(name: &str) -> Result<(), InvalidInput> {
    if name.is_empty() {
        return Err(InvalidInput("client_name is required".into()));
    }
    if name.len() > MAX_NAME_LEN
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(InvalidInput(
            "invalid client_name: only alphanumeric, hyphen, and underscore allowed (max 64)"
                .into(),
        ));
    }
    Ok(())
}

/// High-entropy secret for accounts created without a password.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; GENERATED_SECRET_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Escape extended-regex metacharacters for a `sed -E` address.
pub fn escape_sed_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '.' | '*' | '+' | '?' | '(' | ')' | '{' | '}' | '|' | '[' | ']' | '^' | '$' | '\\' | '/'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob.smith@corp").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("-rf").is_err());
        assert!(validate_username("alice bob").is_err());
        assert!(validate_username("alice'; rm -rf / #").is_err());
        assert!(validate_username("a$(id)").is_err());
        assert!(validate_username(&"a".repeat(65)).is_err());
    }

    #[test]
    fn secrets() {
        assert!(validate_secret("S3cure!pass#word").is_ok());
        assert!(validate_secret("").is_err());
        assert!(validate_secret("two words").is_err());
        assert!(validate_secret("it's").is_err());
        assert!(validate_secret("back\\slash").is_err());
        assert!(validate_secret("line\nbreak").is_err());
    }

    #[test]
    fn client_names() {
        assert!(validate_client_name("bob_2").is_ok());
        assert!(validate_client_name("laptop-01").is_ok());
        assert!(validate_client_name(&"x".repeat(64)).is_ok());
        assert!(validate_client_name(&"x".repeat(65)).is_err());
        assert!(validate_client_name("").is_err());
        assert!(validate_client_name("../etc/passwd").is_err());
        assert!(validate_client_name("bob.ovpn").is_err());
        assert!(validate_client_name("bob;reboot").is_err());
    }

    #[test]
    fn generated_secrets_are_distinct_and_valid() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(validate_secret(&a).is_ok());
    }

    #[test]
    fn sed_escaping() {
        assert_eq!(escape_sed_pattern("bob.smith"), "bob\\.smith");
        assert_eq!(escape_sed_pattern("alice"), "alice");
        assert_eq!(escape_sed_pattern("a+b|c"), "a\\+b\\|c");
    }
}
