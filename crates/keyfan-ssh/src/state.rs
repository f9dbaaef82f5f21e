// ABOUTME: State tokens that tag issued keys, and random passphrases.
// ABOUTME: Both draw from the 62-symbol alphanumeric alphabet.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;

/// Prefix used when the broker configuration does not set one.
pub const DEFAULT_STATE_PREFIX: &str = "TTS_";

/// Number of random characters following the prefix.
pub const STATE_TOKEN_LEN: usize = 32;

/// Length of generated private key passphrases.
pub const PASSPHRASE_LEN: usize = 16;

/// Opaque handle embedded in a deployed key's comment.
///
/// Revocation only needs this value: remote hosts locate the installed key
/// by its comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateToken(String);

impl StateToken {
    /// Issue a fresh token: `prefix` followed by 32 random alphanumerics.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}{}", prefix, random_alphanumeric(STATE_TOKEN_LEN)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Wraps a token previously issued and handed back by the caller.
impl From<String> for StateToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for StateToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random passphrase for a generated private key.
pub fn generate_passphrase() -> String {
    random_alphanumeric(PASSPHRASE_LEN)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_format() {
        let token = StateToken::generate(DEFAULT_STATE_PREFIX);
        let s = token.as_str();

        assert!(s.starts_with("TTS_"));
        assert_eq!(s.len(), 4 + STATE_TOKEN_LEN);
        assert!(s["TTS_".len()..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_token_custom_prefix() {
        let token = StateToken::generate("LAB_");
        assert!(token.as_str().starts_with("LAB_"));
        assert_eq!(token.as_str().len(), 4 + STATE_TOKEN_LEN);
    }

    #[test]
    fn test_token_empty_prefix() {
        let token = StateToken::generate("");
        assert_eq!(token.as_str().len(), STATE_TOKEN_LEN);
    }

    #[test]
    fn test_tokens_pairwise_distinct() {
        let tokens: HashSet<String> = (0..10_000)
            .map(|_| StateToken::generate(DEFAULT_STATE_PREFIX).into_string())
            .collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn test_passphrase_format() {
        let pass = generate_passphrase();
        assert_eq!(pass.len(), PASSPHRASE_LEN);
        assert!(pass.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(pass, generate_passphrase());
    }

    #[test]
    fn test_display_matches_inner() {
        let token = StateToken::from("TTS_abc".to_string());
        assert_eq!(token.to_string(), "TTS_abc");
        assert_eq!(token.as_ref(), "TTS_abc");
    }
}
