// ABOUTME: Command-line surface of the keyfan binary.
// ABOUTME: Flags and env vars layered over the TOML settings file.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use keyfan_core::{KeygenKind, Settings};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "keyfan")]
#[command(about = "Install and revoke SSH keys on a fleet of hosts for a credential broker")]
#[command(version)]
pub struct Cli {
    /// Base64url-encoded JSON request from the broker
    #[arg(env = "WATTS_PARAMETER")]
    pub input: Option<String>,

    /// Settings file (default: ~/.config/keyfan/config.toml)
    #[arg(long, env = "KEYFAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log to a file instead of stderr (default: ~/.config/keyfan/keyfan.log)
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    pub log_file: Option<Option<PathBuf>>,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    pub write_config: bool,

    /// Root for per-user key generation directories
    #[arg(long, env = "KEYFAN_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Key pair generator
    #[arg(long, value_enum, env = "KEYFAN_KEYGEN")]
    pub keygen: Option<KeygenArg>,

    /// Identity file used to reach the hosts
    #[arg(long, env = "KEYFAN_SSH_IDENTITY")]
    pub ssh_identity: Option<PathBuf>,

    /// Account to log in as on every host
    #[arg(long, env = "KEYFAN_REMOTE_USER")]
    pub remote_user: Option<String>,

    /// Hosts contacted at once
    #[arg(long, env = "KEYFAN_MAX_PARALLEL")]
    pub max_parallel: Option<usize>,

    /// Seconds before a host call is abandoned
    #[arg(long, env = "KEYFAN_HOST_TIMEOUT")]
    pub host_timeout: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeygenArg {
    SshKeygen,
    Builtin,
}

impl From<KeygenArg> for KeygenKind {
    fn from(arg: KeygenArg) -> Self {
        match arg {
            KeygenArg::SshKeygen => KeygenKind::SshKeygen,
            KeygenArg::Builtin => KeygenKind::Builtin,
        }
    }
}

impl Cli {
    /// Settings from the file (or defaults) with command-line overrides applied.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load_or_default(self.config.as_deref())?;
        self.apply_overrides(&mut settings);
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(ref dir) = self.work_dir {
            settings.work_dir = dir.clone();
        }
        if let Some(keygen) = self.keygen {
            settings.keygen = keygen.into();
        }
        if let Some(ref identity) = self.ssh_identity {
            settings.ssh_identity = Some(identity.clone());
        }
        if let Some(ref user) = self.remote_user {
            settings.remote_user = user.clone();
        }
        if let Some(n) = self.max_parallel {
            settings.max_parallel = n;
        }
        if let Some(secs) = self.host_timeout {
            settings.host_timeout_secs = secs;
        }
    }

    /// Where `--write-config` writes.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Settings::default_path)
    }
}
