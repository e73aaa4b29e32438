//! Password decoding.
//!
//! Passwords may be stored plain, obfuscated (`PW:` followed by base64), or
//! as a reference to an environment variable (`%env{NAME}`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;

/// Prefix of an obfuscated password.
pub const OBFUSCATED_PREFIX: &str = "PW:";

const ENV_EXPR_START: &str = "%env{";

/// Turns a configured password into plain text.
pub trait PasswordDecoder: Send + Sync {
    /// Resolve external references (environment, secret stores).
    fn resolve(&self, raw: &str) -> String;

    /// Decode an encoded password.
    fn decode(&self, encoded: &str) -> String;

    /// `decode(resolve(raw))`.
    fn plaintext(&self, raw: &str) -> String {
        self.decode(&self.resolve(raw))
    }
}

/// Default decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPasswordDecoder;

impl PasswordDecoder for DefaultPasswordDecoder {
    fn resolve(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match trimmed
            .strip_prefix(ENV_EXPR_START)
            .and_then(|s| s.strip_suffix('}'))
        {
            Some(name) => std::env::var(name).unwrap_or_else(|_| {
                warn!(variable = %name, "Password references an unset environment variable");
                String::new()
            }),
            None => raw.to_string(),
        }
    }

    fn decode(&self, encoded: &str) -> String {
        let Some(data) = encoded.strip_prefix(OBFUSCATED_PREFIX) else {
            return encoded.to_string();
        };
        match STANDARD.decode(data.trim()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(error = %e, "Obfuscated password is not valid base64, using it as-is");
                encoded.to_string()
            }
        }
    }
}

/// Produce the obfuscated form of a password.
pub fn obfuscate(plain: &str) -> String {
    format!("{}{}", OBFUSCATED_PREFIX, STANDARD.encode(plain))
}
