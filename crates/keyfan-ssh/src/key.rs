// ABOUTME: Public key records tagged with a state token.
// ABOUTME: Parses "<type> <material> <comment>" lines and swaps the comment for the token.

use crate::error::{KeyError, Result};
use crate::state::StateToken;
use ssh_key::{HashAlg, PublicKey};
use std::fmt;

/// An OpenSSH public key line whose comment is the issuing state token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRecord {
    key_type: String,
    key_material: String,
    state: StateToken,
}

impl PublicKeyRecord {
    /// Validate a raw public key line and replace its comment with `state`.
    ///
    /// The line is split on the first two spaces. It must yield three fields,
    /// the first starting with `ssh-` and the second at least four
    /// characters long. The third field is discarded.
    ///
    /// # Errors
    /// Returns `KeyError::InvalidKey` naming the failed check.
    pub fn validate_and_tag(raw: &str, state: &StateToken) -> Result<Self> {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.len() < 3 {
            return Err(KeyError::InvalidKey("key line is too short"));
        }

        let mut parts = line.splitn(3, ' ');
        let (key_type, key_material) = match (parts.next(), parts.next(), parts.next()) {
            (Some(key_type), Some(key_material), Some(_comment)) => (key_type, key_material),
            _ => {
                return Err(KeyError::InvalidKey(
                    "expected '<type> <material> <comment>'",
                ))
            }
        };

        if !key_type.starts_with("ssh-") {
            return Err(KeyError::InvalidKey("key type must start with 'ssh-'"));
        }
        if key_material.len() < 4 {
            return Err(KeyError::InvalidKey("key material is too short"));
        }

        Ok(Self {
            key_type: key_type.to_string(),
            key_material: key_material.to_string(),
            state: state.clone(),
        })
    }

    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    pub fn key_material(&self) -> &str {
        &self.key_material
    }

    pub fn state(&self) -> &StateToken {
        &self.state
    }

    /// SHA256 fingerprint of the key, if the material decodes as OpenSSH.
    ///
    /// Only used for logging; opaque material that merely passes the shape
    /// checks yields `None`.
    pub fn fingerprint(&self) -> Option<String> {
        let encoded = format!("{} {}", self.key_type, self.key_material);
        PublicKey::from_openssh(&encoded)
            .ok()
            .map(|key| key.fingerprint(HashAlg::Sha256).to_string())
    }
}

impl fmt::Display for PublicKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.key_type, self.key_material, self.state)
    }
}
