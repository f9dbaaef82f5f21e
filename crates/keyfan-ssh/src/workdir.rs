// ABOUTME: Per-user scratch directory for key generation.
// ABOUTME: Created fresh on acquire and removed on drop, whatever the exit path.

use crate::error::{KeyError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Exclusively owned working directory under a configured root.
///
/// Any stale directory with the same name is removed before creation. The
/// directory and its contents are removed when the value is dropped.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Acquire `root/<directory_name(user_id)>`.
    ///
    /// # Errors
    /// Returns an error if a stale directory cannot be removed or the new
    /// one cannot be created.
    pub fn create(root: &Path, user_id: &str) -> Result<Self> {
        let path = root.join(directory_name(user_id));

        if path.exists() {
            tracing::debug!(path = %path.display(), "Removing stale work directory");
            std::fs::remove_dir_all(&path).map_err(|e| KeyError::RemoveDirectory {
                path: path.clone(),
                source: e,
            })?;
        }

        std::fs::create_dir_all(&path).map_err(|e| KeyError::CreateDirectory {
            path: path.clone(),
            source: e,
        })?;

        // Private key material lands here: owner only (0700)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).map_err(
                |e| KeyError::SetPermissions {
                    path: path.clone(),
                    source: e,
                },
            )?;
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove work directory");
            }
        }
    }
}

/// Longest sanitized prefix kept in a directory name.
const NAME_PREFIX_LEN: usize = 64;

/// Map a user id onto a single path component, unique per user id.
///
/// Characters outside `[A-Za-z0-9._-]` become `_` and the result is cut to
/// 64 characters. A hex suffix taken from the SHA256 of the raw id keeps ids
/// that sanitize alike (`a/b`, `a_b`) apart, and means the name is never `.`
/// or `..`.
pub fn directory_name(user_id: &str) -> String {
    let prefix: String = user_id
        .chars()
        .take(NAME_PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let digest = Sha256::digest(user_id.as_bytes());
    format!("{prefix}-{}", hex::encode(&digest[..6]))
}
