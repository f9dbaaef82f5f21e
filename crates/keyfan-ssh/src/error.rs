// ABOUTME: Error types for key material operations using thiserror.
// ABOUTME: Separates caller-supplied key validation failures from generation failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while validating or generating key material.
#[derive(Error, Debug)]
pub enum KeyError {
    /// A public key line did not have the `<type> <material> <comment>` shape.
    #[error("invalid public key: {0}")]
    InvalidKey(&'static str),

    /// A freshly generated public key failed validation.
    #[error("generated public key is not valid: {0}")]
    InvalidGeneratedKey(String),

    /// Failed to read a key file from disk.
    #[error("failed to read key from {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a key file to disk.
    #[error("failed to write key to {path}: {source}")]
    WriteKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the working directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to clear a stale working directory.
    #[error("failed to remove directory {path}: {source}")]
    RemoveDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set file permissions.
    #[error("failed to set permissions on {path}: {source}")]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external key generator could not be started.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external key generator ran but reported failure.
    #[error("{program} exited with {status}: {stderr}")]
    GeneratorExit {
        program: String,
        status: String,
        stderr: String,
    },

    /// Failed to generate a key in-process.
    #[error("failed to generate SSH key: {0}")]
    GenerateKey(#[source] ssh_key::Error),

    /// Failed to encrypt a private key with its passphrase.
    #[error("failed to encrypt private key: {0}")]
    EncryptKey(#[source] ssh_key::Error),

    /// Failed to serialize a key.
    #[error("failed to serialize key: {0}")]
    SerializeKey(#[source] ssh_key::Error),
}

impl KeyError {
    /// True when the error comes from validating a caller-supplied key rather
    /// than from generating one.
    pub fn is_validation(&self) -> bool {
        matches!(self, KeyError::InvalidKey(_))
    }
}

/// Result type alias using KeyError.
pub type Result<T> = std::result::Result<T, KeyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_invalid_key_display() {
        let err = KeyError::InvalidKey("key type must start with ssh-");
        let display = err.to_string();
        assert!(display.contains("invalid public key"));
        assert!(display.contains("ssh-"));
    }

    #[test]
    fn test_generator_exit_display() {
        let err = KeyError::GeneratorExit {
            program: "ssh-keygen".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "Saving key failed".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("ssh-keygen"));
        assert!(display.contains("exit status: 1"));
        assert!(display.contains("Saving key failed"));
    }

    #[test]
    fn test_create_directory_error_display() {
        let err = KeyError::CreateDirectory {
            path: PathBuf::from("/path/to/dir"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        };
        let display = err.to_string();
        assert!(display.contains("failed to create directory"));
        assert!(display.contains("/path/to/dir"));
    }

    #[test]
    fn test_is_validation() {
        assert!(KeyError::InvalidKey("too short").is_validation());
        assert!(!KeyError::InvalidGeneratedKey("bad".to_string()).is_validation());
        assert!(!KeyError::GenerateKey(ssh_key::Error::AlgorithmUnknown).is_validation());
    }

    #[test]
    fn test_error_source_spawn() {
        use std::error::Error;

        let err = KeyError::Spawn {
            program: "ssh-keygen".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_no_source_generator_exit() {
        use std::error::Error;

        let err = KeyError::GeneratorExit {
            program: "ssh-keygen".to_string(),
            status: "signal: 9".to_string(),
            stderr: String::new(),
        };
        assert!(err.source().is_none());
    }
}
