// ABOUTME: Local operator settings for keyfan, loaded from TOML.
// ABOUTME: Transport, key generation, and work directory options; the broker supplies the rest.

use anyhow::{Context, Result};
use keyfan_ssh::{BuiltinKeygen, KeyGenerator, SshKeygen};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::executor::SshExecutorConfig;

/// Which generator produces key pairs when the user supplies none.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum KeygenKind {
    /// External `ssh-keygen` utility
    #[default]
    SshKeygen,
    /// In-process ed25519 generation
    Builtin,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Root for per-user key generation directories
    pub work_dir: PathBuf,

    pub keygen: KeygenKind,

    /// ssh-keygen binary (ssh-keygen generator only)
    pub keygen_binary: String,

    /// Key type passed to ssh-keygen as `-t`; utility default when unset
    pub key_type: Option<String>,

    /// ssh client binary used to reach hosts
    pub ssh_binary: String,

    /// Identity file for authenticating to hosts
    pub ssh_identity: Option<PathBuf>,

    /// Extra `-o` options for the ssh client (e.g. "StrictHostKeyChecking=yes")
    pub ssh_options: Vec<String>,

    /// Account to log in as on every host
    pub remote_user: String,

    /// Command run on each host; the encoded request is appended as its last argument
    pub remote_command: String,

    /// Upper bound on one host call, connection included
    pub host_timeout_secs: u64,

    /// ssh ConnectTimeout
    pub connect_timeout_secs: u64,

    /// How many hosts are contacted at once
    pub max_parallel: usize,

    /// Accepted `acr` values when the broker asks for LOA checks
    pub allowed_loa: Vec<String>,

    /// Timeout for identity registry HTTP calls
    pub registry_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: xdg_config_dir()
                .map(|p| p.join("ssh"))
                .unwrap_or_else(|| std::env::temp_dir().join("keyfan")),
            keygen: KeygenKind::default(),
            keygen_binary: "ssh-keygen".to_string(),
            key_type: None,
            ssh_binary: "ssh".to_string(),
            ssh_identity: dirs::home_dir().map(|h| h.join(".ssh").join("id_rsa")),
            ssh_options: Vec::new(),
            remote_user: "tts".to_string(),
            remote_command: "sudo /home/tts/.config/tts/ssh_idh_vm.py".to_string(),
            host_timeout_secs: 60,
            connect_timeout_secs: 15,
            max_parallel: 16,
            allowed_loa: vec!["https://aai.egi.eu/LoA#Substantial".to_string()],
            registry_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;
        Ok(settings)
    }

    /// Load from `path`, or from the default location if none is given.
    ///
    /// A missing default file means defaults; a missing explicit file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save settings to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    /// Default settings file (~/.config/keyfan/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        xdg_config_dir().map(|p| p.join("config.toml"))
    }

    pub fn key_generator(&self) -> Arc<dyn KeyGenerator> {
        match self.keygen {
            KeygenKind::SshKeygen => Arc::new(SshKeygen {
                binary: self.keygen_binary.clone(),
                key_type: self.key_type.clone(),
            }),
            KeygenKind::Builtin => Arc::new(BuiltinKeygen),
        }
    }

    pub fn executor_config(&self) -> SshExecutorConfig {
        SshExecutorConfig {
            binary: self.ssh_binary.clone(),
            identity: self.ssh_identity.clone(),
            options: self.ssh_options.clone(),
            remote_user: self.remote_user.clone(),
            remote_command: self.remote_command.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
            timeout: Duration::from_secs(self.host_timeout_secs),
        }
    }

    pub fn is_allowed_loa(&self, acr: Option<&str>) -> bool {
        acr.is_some_and(|acr| self.allowed_loa.iter().any(|allowed| allowed == acr))
    }
}

/// XDG-style config directory (~/.config/keyfan).
///
/// Uses `XDG_CONFIG_HOME` if set, otherwise falls back to `~/.config`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("keyfan"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            remote_user = "deploy"
            max_parallel = 4
            keygen = "builtin"
        "#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.remote_user, "deploy");
        assert_eq!(settings.max_parallel, 4);
        assert_eq!(settings.keygen, KeygenKind::Builtin);
        assert_eq!(settings.ssh_binary, "ssh");
        assert_eq!(settings.host_timeout_secs, 60);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let settings = Settings {
            work_dir: PathBuf::from("/var/lib/keyfan"),
            ssh_options: vec!["StrictHostKeyChecking=yes".to_string()],
            key_type: Some("ed25519".to_string()),
            ..Settings::default()
        };
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load_or_default(Some(&dir.path().join("absent.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_parallel = \"many\"").unwrap();
        let err = Settings::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings"));
    }

    #[test]
    fn test_keygen_kind_names() {
        assert_eq!(
            toml::from_str::<Settings>("keygen = \"ssh-keygen\"").unwrap().keygen,
            KeygenKind::SshKeygen
        );
        assert_eq!(Settings::default().key_generator().name(), "ssh-keygen");

        let builtin = Settings {
            keygen: KeygenKind::Builtin,
            ..Settings::default()
        };
        assert_eq!(builtin.key_generator().name(), "builtin");
    }

    #[test]
    fn test_allowed_loa() {
        let settings = Settings::default();
        assert!(settings.is_allowed_loa(Some("https://aai.egi.eu/LoA#Substantial")));
        assert!(!settings.is_allowed_loa(Some("https://aai.egi.eu/LoA#Low")));
        assert!(!settings.is_allowed_loa(None));
    }

    #[test]
    fn test_executor_config_carries_timeouts() {
        let settings = Settings {
            host_timeout_secs: 5,
            ..Settings::default()
        };
        let config = settings.executor_config();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.remote_user, "tts");
    }
}
