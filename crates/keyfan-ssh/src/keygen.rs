// ABOUTME: Key-pair generation into a scoped work directory.
// ABOUTME: Supports the external ssh-keygen utility and an in-process ed25519 generator.

use crate::error::{KeyError, Result};
use crate::key::PublicKeyRecord;
use crate::state::{generate_passphrase, StateToken};
use crate::workdir::WorkDir;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use std::path::Path;
use std::process::Command;

/// File name of the private key inside the work directory.
pub const KEY_FILE_NAME: &str = "keyfan_ssh_key";

/// Something that can write an encrypted key pair to disk.
///
/// Implementations write the private key to `key_path` and the public key
/// to `key_path` with a `.pub` extension, using `comment` as the key comment.
pub trait KeyGenerator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn write_key_pair(&self, key_path: &Path, passphrase: &str, comment: &str) -> Result<()>;
}

/// Output of a successful generation.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Public key tagged with the state token.
    pub public_key: PublicKeyRecord,
    /// OpenSSH private key, encrypted with `passphrase`.
    pub private_key: String,
    pub passphrase: String,
}

/// Generate a key pair for `user_id` tagged with `state`.
///
/// The work directory `work_root/<user_id>` exists only for the duration of
/// this call.
///
/// # Errors
/// Returns an error if the directory cannot be prepared, the generator
/// fails, the key files cannot be read, or the public key is invalid.
pub fn generate(
    generator: &dyn KeyGenerator,
    work_root: &Path,
    user_id: &str,
    state: &StateToken,
) -> Result<GeneratedKey> {
    let passphrase = generate_passphrase();
    let work_dir = WorkDir::create(work_root, user_id)?;
    let key_path = work_dir.path().join(KEY_FILE_NAME);
    let pub_key_path = key_path.with_extension("pub");

    tracing::debug!(generator = generator.name(), path = %key_path.display(), "Generating key pair");
    generator.write_key_pair(&key_path, &passphrase, state.as_str())?;

    let private_key = read_key_file(&key_path)?;
    let raw_public = read_key_file(&pub_key_path)?;
    let public_key = PublicKeyRecord::validate_and_tag(&raw_public, state)
        .map_err(|e| KeyError::InvalidGeneratedKey(format!("{e}: '{}'", raw_public.trim_end())))?;

    Ok(GeneratedKey {
        public_key,
        private_key,
        passphrase,
    })
}

fn read_key_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| KeyError::ReadKey {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Runs the external `ssh-keygen` utility.
#[derive(Debug, Clone)]
pub struct SshKeygen {
    /// Path or name of the binary.
    pub binary: String,
    /// Value for `-t`; the utility's default when unset.
    pub key_type: Option<String>,
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self {
            binary: "ssh-keygen".to_string(),
            key_type: None,
        }
    }
}

impl KeyGenerator for SshKeygen {
    fn name(&self) -> &'static str {
        "ssh-keygen"
    }

    fn write_key_pair(&self, key_path: &Path, passphrase: &str, comment: &str) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-q");
        if let Some(ref key_type) = self.key_type {
            cmd.arg("-t").arg(key_type);
        }
        cmd.arg("-N")
            .arg(passphrase)
            .arg("-C")
            .arg(comment)
            .arg("-f")
            .arg(key_path);

        let output = cmd.output().map_err(|e| KeyError::Spawn {
            program: self.binary.clone(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(KeyError::GeneratorExit {
                program: self.binary.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Generates ed25519 keys in-process with the `ssh-key` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinKeygen;

impl KeyGenerator for BuiltinKeygen {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn write_key_pair(&self, key_path: &Path, passphrase: &str, comment: &str) -> Result<()> {
        let mut private_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .map_err(KeyError::GenerateKey)?;
        private_key.set_comment(comment);

        let public_key_str = private_key
            .public_key()
            .to_openssh()
            .map_err(KeyError::SerializeKey)?;

        let encrypted = private_key
            .encrypt(&mut rand::thread_rng(), passphrase)
            .map_err(KeyError::EncryptKey)?;
        let private_key_str = encrypted
            .to_openssh(LineEnding::LF)
            .map_err(KeyError::SerializeKey)?;

        std::fs::write(key_path, private_key_str.as_bytes()).map_err(|e| KeyError::WriteKey {
            path: key_path.to_path_buf(),
            source: e,
        })?;

        // Set restrictive permissions on Unix (0600 = rw-------)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600)).map_err(
                |e| KeyError::SetPermissions {
                    path: key_path.to_path_buf(),
                    source: e,
                },
            )?;
        }

        let pub_key_path = key_path.with_extension("pub");
        std::fs::write(&pub_key_path, format!("{public_key_str}\n")).map_err(|e| {
            KeyError::WriteKey {
                path: pub_key_path.clone(),
                source: e,
            }
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Writes fixed content instead of generating anything.
    struct FixedKeygen {
        public: &'static str,
    }

    impl KeyGenerator for FixedKeygen {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn write_key_pair(&self, key_path: &Path, _passphrase: &str, _comment: &str) -> Result<()> {
            std::fs::write(key_path, "PRIVATE").unwrap();
            std::fs::write(key_path.with_extension("pub"), self.public).unwrap();
            Ok(())
        }
    }

    struct FailingKeygen;

    impl KeyGenerator for FailingKeygen {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn write_key_pair(&self, key_path: &Path, _passphrase: &str, _comment: &str) -> Result<()> {
            std::fs::write(key_path, "partial").unwrap();
            Err(KeyError::GeneratorExit {
                program: "failing".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "boom".to_string(),
            })
        }
    }

    fn is_empty(root: &Path) -> bool {
        std::fs::read_dir(root).unwrap().next().is_none()
    }

    fn state() -> StateToken {
        StateToken::generate("TTS_")
    }

    #[test]
    fn test_generate_with_builtin() {
        let root = TempDir::new().expect("should create temp dir");
        let state = state();

        let key = generate(&BuiltinKeygen, root.path(), "alice", &state).expect("should generate");

        assert_eq!(key.public_key.key_type(), "ssh-ed25519");
        assert!(key.public_key.to_string().ends_with(state.as_str()));
        assert!(key.private_key.contains("BEGIN OPENSSH PRIVATE KEY"));
        assert_eq!(key.passphrase.len(), 16);
        assert!(key.public_key.fingerprint().is_some());
        assert!(is_empty(root.path()), "work dir must be removed");
    }

    #[test]
    fn test_builtin_private_key_is_encrypted() {
        let root = TempDir::new().expect("should create temp dir");
        let key = generate(&BuiltinKeygen, root.path(), "alice", &state()).unwrap();

        let parsed = PrivateKey::from_openssh(&key.private_key).expect("should parse");
        assert!(parsed.is_encrypted());
        let decrypted = parsed.decrypt(&key.passphrase).expect("passphrase should decrypt");
        assert!(decrypted.public_key().key_data().is_ed25519());
    }

    #[test]
    fn test_generate_rejects_invalid_public_key() {
        let root = TempDir::new().expect("should create temp dir");
        let generator = FixedKeygen {
            public: "garbage",
        };

        let err = generate(&generator, root.path(), "bob", &state()).expect_err("should fail");
        assert!(matches!(err, KeyError::InvalidGeneratedKey(_)));
        assert!(is_empty(root.path()), "work dir must be removed");
    }

    #[test]
    fn test_generate_cleans_up_after_generator_failure() {
        let root = TempDir::new().expect("should create temp dir");

        let err = generate(&FailingKeygen, root.path(), "carol", &state()).expect_err("should fail");
        assert!(matches!(err, KeyError::GeneratorExit { .. }));
        assert!(is_empty(root.path()), "work dir must be removed");
    }

    #[test]
    fn test_generate_uses_fixed_public_key() {
        let root = TempDir::new().expect("should create temp dir");
        let state = state();
        let generator = FixedKeygen {
            public: "ssh-rsa AAAAB3NzaC1yc2E old-comment\n",
        };

        let key = generate(&generator, root.path(), "dave", &state).unwrap();
        assert_eq!(
            key.public_key.to_string(),
            format!("ssh-rsa AAAAB3NzaC1yc2E {state}")
        );
        assert_eq!(key.private_key, "PRIVATE");
    }

    #[test]
    fn test_ssh_keygen_missing_binary() {
        let root = TempDir::new().expect("should create temp dir");
        let generator = SshKeygen {
            binary: "/nonexistent/ssh-keygen".to_string(),
            key_type: None,
        };

        let err = generate(&generator, root.path(), "erin", &state()).expect_err("should fail");
        assert!(matches!(err, KeyError::Spawn { .. }));
        assert!(is_empty(root.path()));
    }

    #[cfg(unix)]
    mod fake_ssh_keygen {
        use super::*;

        /// Write an executable shell script standing in for ssh-keygen.
        fn script(dir: &TempDir, body: &str) -> String {
            use std::os::unix::fs::PermissionsExt;

            let path = dir.path().join("fake-ssh-keygen");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        #[test]
        fn test_ssh_keygen_writes_key_pair() {
            let bin_dir = TempDir::new().expect("should create temp dir");
            let args_log = bin_dir.path().join("args");
            let binary = script(
                &bin_dir,
                &format!(
                    r#"printf '%s\n' "$*" > '{}'
while [ $# -gt 0 ]; do
  case "$1" in
    -N) pass="$2"; shift 2;;
    -C) comment="$2"; shift 2;;
    -f) file="$2"; shift 2;;
    *) shift;;
  esac
done
printf 'PRIVATE %s\n' "$pass" > "$file"
printf 'ssh-ed25519 AAAAC3NzaFake %s\n' "$comment" > "$file.pub""#,
                    args_log.display()
                ),
            );
            let generator = SshKeygen {
                binary,
                key_type: Some("ed25519".to_string()),
            };
            let root = TempDir::new().expect("should create temp dir");
            let state = state();

            let key = generate(&generator, root.path(), "frank", &state).expect("should generate");

            assert_eq!(
                key.public_key.to_string(),
                format!("ssh-ed25519 AAAAC3NzaFake {state}")
            );
            assert_eq!(key.private_key, format!("PRIVATE {}\n", key.passphrase));

            let args = std::fs::read_to_string(&args_log).unwrap();
            assert!(args.starts_with(&format!("-q -t ed25519 -N {} ", key.passphrase)));
            assert!(args.contains(&format!("-C {state} -f ")));
            assert!(args.trim_end().ends_with(KEY_FILE_NAME));
            assert!(is_empty(root.path()), "work dir must be removed");
        }

        #[test]
        fn test_ssh_keygen_nonzero_exit() {
            let bin_dir = TempDir::new().expect("should create temp dir");
            let binary = script(&bin_dir, "echo 'Saving key failed: disk full' >&2\nexit 1");
            let generator = SshKeygen {
                binary: binary.clone(),
                key_type: None,
            };
            let root = TempDir::new().expect("should create temp dir");

            let err = generate(&generator, root.path(), "grace", &state()).expect_err("should fail");
            match err {
                KeyError::GeneratorExit {
                    program,
                    status,
                    stderr,
                } => {
                    assert_eq!(program, binary);
                    assert!(status.contains('1'));
                    assert_eq!(stderr, "Saving key failed: disk full");
                }
                other => panic!("expected generator exit, got {other:?}"),
            }
            assert!(is_empty(root.path()), "work dir must be removed");
        }
    }
}
