// ABOUTME: Plugin boundary: one encoded broker invocation in, exactly one response out.
// ABOUTME: Validates configuration, gates on LOA, registers the user, then dispatches to the orchestrator.

use keyfan_ssh::{KeyGenerator, StateToken, DEFAULT_STATE_PREFIX};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigError, ProtocolError};
use crate::executor::{RemoteExecutor, SshExecutor};
use crate::fanout::FanoutCoordinator;
use crate::orchestrator::{CredentialOrchestrator, OrchestratorConfig, ProvisionOutcome};
use crate::protocol::{
    configured, ConfParams, CredentialRequest, PluginRequest, PluginResponse, UNDEFINED_STATE,
};
use crate::registry::{HttpRegistry, IdentityRegistry, RegistryConfig};
use crate::settings::Settings;

/// User-facing message for every failure that is not the user's doing.
pub const INTERNAL_ERROR_MSG: &str = "Internal error, please contact the administrator";

pub const LOA_TOO_LOW_MSG: &str = "sorry, your level of assurance (loa) is too low";

/// Broker configuration after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub hosts: Vec<String>,
    pub state_prefix: String,
    pub registry: RegistryConfig,
    pub check_loa: bool,
}

impl PluginConfig {
    /// Check that every required parameter is present.
    ///
    /// # Errors
    /// Returns the first missing parameter, in the order hosts,
    /// credentials, registry URL, service URL.
    pub fn from_conf_params(conf: &ConfParams) -> Result<Self, ConfigError> {
        let hosts: Vec<String> = configured(&conf.host_list)
            .ok_or(ConfigError::MissingHosts)?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if hosts.is_empty() {
            return Err(ConfigError::MissingHosts);
        }

        let (username, password) =
            match (configured(&conf.auth_username), configured(&conf.auth_password)) {
                (Some(u), Some(p)) => (u.to_string(), p.to_string()),
                _ => return Err(ConfigError::MissingAuth),
            };
        let url = configured(&conf.idh_url).ok_or(ConfigError::MissingIdhUrl)?;
        let service_url =
            configured(&conf.idh_service_url).ok_or(ConfigError::MissingIdhServiceUrl)?;

        // An empty prefix is legitimate; only the placeholder falls back
        let state_prefix = match conf.state_prefix.as_deref() {
            Some(prefix) if prefix != crate::protocol::NOT_CONFIGURED => prefix.to_string(),
            _ => DEFAULT_STATE_PREFIX.to_string(),
        };

        Ok(Self {
            hosts,
            state_prefix,
            registry: RegistryConfig {
                url: url.to_string(),
                service_url: service_url.to_string(),
                username,
                password,
            },
            check_loa: conf.check_loa.unwrap_or(true),
        })
    }
}

/// The whole plugin, wired from local settings.
///
/// The remote executor, key generator and identity registry can be replaced
/// for testing or embedding.
pub struct Plugin {
    settings: Settings,
    executor: Arc<dyn RemoteExecutor>,
    keygen: Arc<dyn KeyGenerator>,
    registry: Option<Arc<dyn IdentityRegistry>>,
}

impl Plugin {
    pub fn new(settings: Settings) -> Self {
        let executor = Arc::new(SshExecutor::new(settings.executor_config()));
        let keygen = settings.key_generator();
        Self {
            settings,
            executor,
            keygen,
            registry: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn RemoteExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_key_generator(mut self, keygen: Arc<dyn KeyGenerator>) -> Self {
        self.keygen = keygen;
        self
    }

    /// Use `registry` instead of an HTTP client built from the broker configuration.
    pub fn with_registry(mut self, registry: Arc<dyn IdentityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Handle one raw invocation. `input` is the encoded envelope, if any.
    pub async fn run(&self, input: Option<&str>) -> PluginResponse {
        let Some(input) = input else {
            return PluginResponse::error(INTERNAL_ERROR_MSG, ProtocolError::MissingAction.to_string());
        };

        match PluginRequest::decode(input) {
            Ok(request) => self.handle(request).await,
            Err(e @ (ProtocolError::MissingAction | ProtocolError::UnknownAction(_))) => {
                tracing::warn!(error = %e, "Rejected invocation");
                PluginResponse::error(INTERNAL_ERROR_MSG, e.to_string())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to decode plugin input");
                PluginResponse::error(INTERNAL_ERROR_MSG, format!("failed to decode plugin input: {e}"))
            }
        }
    }

    /// Like `run`, but a panic anywhere inside becomes an error response.
    pub async fn run_guarded(self: Arc<Self>, input: Option<String>) -> PluginResponse {
        let handle = tokio::spawn(async move { self.run(input.as_deref()).await });
        match handle.await {
            Ok(response) => response,
            Err(e) => {
                let detail = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                tracing::error!(error = %detail, "Plugin failed");
                PluginResponse::error(INTERNAL_ERROR_MSG, format!("the plugin failed with {detail}"))
            }
        }
    }

    pub async fn handle(&self, request: PluginRequest) -> PluginResponse {
        match request {
            PluginRequest::Parameter => PluginResponse::parameters(),
            PluginRequest::Request(req) => self.handle_request(req).await,
            PluginRequest::Revoke(req) => self.handle_revoke(req).await,
        }
    }

    async fn handle_request(&self, req: CredentialRequest) -> PluginResponse {
        let config = match self.validated(&req) {
            Ok(config) => config,
            Err(response) => return response,
        };

        if config.check_loa && !self.settings.is_allowed_loa(req.user_info.acr.as_deref()) {
            let loa = req.user_info.acr.as_deref().unwrap_or("");
            tracing::info!(iss = %req.user_info.iss, sub = %req.user_info.sub, loa = %loa, "LOA too low");
            return ProvisionOutcome::Denied {
                user_msg: LOA_TOO_LOW_MSG.to_string(),
                log_msg: format!(
                    "user {} - {} with loa {} is not allowed",
                    req.user_info.iss, req.user_info.sub, loa
                ),
            }
            .into();
        }

        let registry = match self.registry_for(&config) {
            Ok(registry) => registry,
            Err(log_msg) => return PluginResponse::error(INTERNAL_ERROR_MSG, log_msg),
        };
        if let Err(e) = registry.ensure_registered(&req.watts_userid).await {
            tracing::error!(user_id = %req.watts_userid, error = %e, "Identity registry failed");
            return PluginResponse::error(INTERNAL_ERROR_MSG, format!("error: {e}"));
        }

        self.orchestrator(&config)
            .provision(&req.watts_userid, req.params.supplied_key(), &config.hosts)
            .await
            .into()
    }

    async fn handle_revoke(&self, req: CredentialRequest) -> PluginResponse {
        // Only a token this plugin issued selects keys to remove
        if !is_issued_state(&req.cred_state) {
            tracing::error!(user_id = %req.watts_userid, cred_state = %req.cred_state, "Revoke without a state token");
            return PluginResponse::error(
                INTERNAL_ERROR_MSG,
                format!(
                    "cannot revoke without a credential state, got '{}'",
                    req.cred_state
                ),
            );
        }

        let config = match self.validated(&req) {
            Ok(config) => config,
            Err(response) => return response,
        };

        let state = StateToken::from(req.cred_state);
        self.orchestrator(&config)
            .revoke(&req.watts_userid, &state, &config.hosts)
            .await
            .into()
    }

    fn validated(&self, req: &CredentialRequest) -> Result<PluginConfig, PluginResponse> {
        PluginConfig::from_conf_params(&req.conf_params).map_err(|e| {
            tracing::error!(error = %e, "Plugin is not configured");
            PluginResponse::error(INTERNAL_ERROR_MSG, e.to_string())
        })
    }

    fn registry_for(&self, config: &PluginConfig) -> Result<Arc<dyn IdentityRegistry>, String> {
        if let Some(ref registry) = self.registry {
            return Ok(Arc::clone(registry));
        }
        let timeout = Duration::from_secs(self.settings.registry_timeout_secs);
        HttpRegistry::new(config.registry.clone(), timeout)
            .map(|r| Arc::new(r) as Arc<dyn IdentityRegistry>)
            .map_err(|e| format!("error: {e}"))
    }

    fn orchestrator(&self, config: &PluginConfig) -> CredentialOrchestrator {
        CredentialOrchestrator::new(
            OrchestratorConfig {
                state_prefix: config.state_prefix.clone(),
                work_dir: self.settings.work_dir.clone(),
            },
            Arc::clone(&self.keygen),
            FanoutCoordinator::new(Arc::clone(&self.executor), self.settings.max_parallel),
        )
    }
}

fn is_issued_state(cred_state: &str) -> bool {
    let state = cred_state.trim();
    !state.is_empty() && state != UNDEFINED_STATE
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "a panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf() -> ConfParams {
        ConfParams {
            state_prefix: Some("LAB_".to_string()),
            host_list: Some("h1  h2\nh3".to_string()),
            idh_url: Some("https://idh".to_string()),
            idh_service_url: Some("https://idh/svc".to_string()),
            auth_username: Some("admin".to_string()),
            auth_password: Some("secret".to_string()),
            check_loa: Some(false),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = PluginConfig::from_conf_params(&conf()).unwrap();
        assert_eq!(config.hosts, vec!["h1", "h2", "h3"]);
        assert_eq!(config.state_prefix, "LAB_");
        assert!(!config.check_loa);
        assert_eq!(config.registry.username, "admin");
    }

    #[test]
    fn test_missing_hosts() {
        let mut c = conf();
        c.host_list = Some("_not_configured".to_string());
        assert_eq!(PluginConfig::from_conf_params(&c), Err(ConfigError::MissingHosts));
        c.host_list = None;
        assert_eq!(PluginConfig::from_conf_params(&c), Err(ConfigError::MissingHosts));
    }

    #[test]
    fn test_missing_auth() {
        let mut c = conf();
        c.auth_password = Some("_not_configured".to_string());
        assert_eq!(PluginConfig::from_conf_params(&c), Err(ConfigError::MissingAuth));
    }

    #[test]
    fn test_missing_urls() {
        let mut c = conf();
        c.idh_url = None;
        assert_eq!(PluginConfig::from_conf_params(&c), Err(ConfigError::MissingIdhUrl));

        let mut c = conf();
        c.idh_service_url = None;
        assert_eq!(
            PluginConfig::from_conf_params(&c),
            Err(ConfigError::MissingIdhServiceUrl)
        );
    }

    #[test]
    fn test_defaults() {
        let mut c = conf();
        c.state_prefix = None;
        c.check_loa = None;
        let config = PluginConfig::from_conf_params(&c).unwrap();
        assert_eq!(config.state_prefix, "TTS_");
        assert!(config.check_loa);
    }

    #[test]
    fn test_is_issued_state() {
        assert!(is_issued_state("TTS_abc"));
        assert!(!is_issued_state(""));
        assert!(!is_issued_state("   "));
        assert!(!is_issued_state("undefined"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "a panic");
    }
}
