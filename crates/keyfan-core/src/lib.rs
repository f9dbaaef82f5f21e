// ABOUTME: Core library for keyfan: fan SSH keys out to a host fleet and revoke them.
// ABOUTME: Exposes the protocol types, executor seam, coordinator, orchestrator, and plugin boundary.

pub mod error;
pub mod executor;
pub mod fanout;
pub mod orchestrator;
pub mod plugin;
pub mod protocol;
pub mod registry;
pub mod settings;

pub use error::{ConfigError, ProtocolError};
pub use executor::{HostOutcome, HostResult, RemoteExecutor, SshExecutor, SshExecutorConfig};
pub use fanout::{AggregateOutcome, FanoutCoordinator};
pub use orchestrator::{CredentialOrchestrator, OrchestratorConfig, ProvisionOutcome, RevokeOutcome};
pub use plugin::{Plugin, PluginConfig, INTERNAL_ERROR_MSG};
pub use protocol::{CredentialField, FieldType, PluginRequest, PluginResponse};
pub use registry::{HttpRegistry, IdentityRegistry, RegistryConfig, RegistryError};
pub use settings::{KeygenKind, Settings};
