// ABOUTME: Provision and revoke use cases on top of key material and the fan-out coordinator.
// ABOUTME: Maps every outcome, including failures, to the broker response contract.

use keyfan_ssh::{GeneratedKey, KeyGenerator, PublicKeyRecord, StateToken};
use std::path::PathBuf;
use std::sync::Arc;

use crate::fanout::FanoutCoordinator;
use crate::protocol::{CredentialField, PluginResponse, RemoteRequest};

pub const INVALID_KEY_MSG: &str = "sorry, the public key was not valid";
pub const KEYGEN_FAILED_MSG: &str = "sorry, the key generation failed";
pub const DEPLOY_FAILED_MSG: &str =
    "the deployment failed, the error has been logged, please contact the administrator";
pub const REVOKE_FAILED_MSG: &str =
    "the revocation failed and has been logged, please contact the administrator";

/// Per-invocation settings for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Prefix for issued state tokens
    pub state_prefix: String,
    /// Root of the per-user key generation directories
    pub work_dir: PathBuf,
}

/// Terminal states of a provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Issued {
        credential: Vec<CredentialField>,
        state: StateToken,
    },
    Denied {
        user_msg: String,
        log_msg: String,
    },
    Failed {
        user_msg: String,
        log_msg: String,
    },
}

/// Terminal states of a revocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    Failed { user_msg: String, log_msg: String },
}

impl From<ProvisionOutcome> for PluginResponse {
    fn from(outcome: ProvisionOutcome) -> Self {
        match outcome {
            ProvisionOutcome::Issued { credential, state } => PluginResponse::issued(credential, &state),
            ProvisionOutcome::Denied { user_msg, log_msg }
            | ProvisionOutcome::Failed { user_msg, log_msg } => PluginResponse::error(user_msg, log_msg),
        }
    }
}

impl From<RevokeOutcome> for PluginResponse {
    fn from(outcome: RevokeOutcome) -> Self {
        match outcome {
            RevokeOutcome::Revoked => PluginResponse::revoked(),
            RevokeOutcome::Failed { user_msg, log_msg } => PluginResponse::error(user_msg, log_msg),
        }
    }
}

pub struct CredentialOrchestrator {
    config: OrchestratorConfig,
    keygen: Arc<dyn KeyGenerator>,
    fanout: FanoutCoordinator,
}

impl CredentialOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        keygen: Arc<dyn KeyGenerator>,
        fanout: FanoutCoordinator,
    ) -> Self {
        Self {
            config,
            keygen,
            fanout,
        }
    }

    /// Issue a key for `user_id` and install it on every host.
    ///
    /// With `supplied_key` the user's public key is tagged and deployed;
    /// otherwise a key pair is generated and returned along with the
    /// per-host account names.
    pub async fn provision(
        &self,
        user_id: &str,
        supplied_key: Option<&str>,
        hosts: &[String],
    ) -> ProvisionOutcome {
        let state = StateToken::generate(&self.config.state_prefix);

        let (public_key, mut credential) = match supplied_key {
            Some(raw) => match PublicKeyRecord::validate_and_tag(raw, &state) {
                Ok(key) => (key, Vec::new()),
                Err(e) => {
                    tracing::info!(user_id = %user_id, error = %e, "Rejected supplied public key");
                    return ProvisionOutcome::Failed {
                        user_msg: INVALID_KEY_MSG.to_string(),
                        log_msg: format!("the key given by the user '{raw}' is not valid: {e}"),
                    };
                }
            },
            None => match self.generate(user_id, &state).await {
                Ok(generated) => {
                    let fields = generated_fields(&generated);
                    (generated.public_key, fields)
                }
                Err(log_msg) => {
                    tracing::error!(user_id = %user_id, error = %log_msg, "Key generation failed");
                    return ProvisionOutcome::Failed {
                        user_msg: KEYGEN_FAILED_MSG.to_string(),
                        log_msg,
                    };
                }
            },
        };

        let fingerprint = public_key
            .fingerprint()
            .unwrap_or_else(|| "-".to_string());
        tracing::info!(
            user_id = %user_id,
            state = %state,
            fingerprint = %fingerprint,
            hosts = hosts.len(),
            "Deploying key"
        );

        let encoded = match RemoteRequest::deploy(user_id, &public_key).encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                return ProvisionOutcome::Failed {
                    user_msg: DEPLOY_FAILED_MSG.to_string(),
                    log_msg: format!("failed to encode deploy request: {e}"),
                }
            }
        };

        let outcome = self.fanout.run_batch(hosts, &encoded).await;
        if outcome.ok {
            credential.extend(outcome.per_host_outputs);
            return ProvisionOutcome::Issued { credential, state };
        }

        // No compensating revoke: successful hosts keep the key until an explicit revoke
        let mut log_msg = format!(
            "key deployment did fail on at least one host: '{}'",
            outcome.failure_log
        );
        if !outcome.succeeded_hosts.is_empty() {
            tracing::warn!(
                state = %state,
                hosts = ?outcome.succeeded_hosts,
                "Key left installed on hosts that succeeded"
            );
            log_msg.push_str(&format!(
                " (key with state {state} remains installed on: {})",
                outcome.succeeded_hosts.join(", ")
            ));
        }

        ProvisionOutcome::Failed {
            user_msg: DEPLOY_FAILED_MSG.to_string(),
            log_msg,
        }
    }

    /// Remove the key tagged with `state` from every host.
    pub async fn revoke(&self, user_id: &str, state: &StateToken, hosts: &[String]) -> RevokeOutcome {
        tracing::info!(user_id = %user_id, state = %state, hosts = hosts.len(), "Revoking key");

        let encoded = match RemoteRequest::revoke(user_id, state).encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                return RevokeOutcome::Failed {
                    user_msg: REVOKE_FAILED_MSG.to_string(),
                    log_msg: format!("failed to encode revoke request: {e}"),
                }
            }
        };

        let outcome = self.fanout.run_batch(hosts, &encoded).await;
        if outcome.ok {
            RevokeOutcome::Revoked
        } else {
            RevokeOutcome::Failed {
                user_msg: REVOKE_FAILED_MSG.to_string(),
                log_msg: format!(
                    "key revocation did fail on at least one host: '{}'",
                    outcome.failure_log
                ),
            }
        }
    }

    /// Run the blocking generator off the async runtime.
    async fn generate(&self, user_id: &str, state: &StateToken) -> Result<GeneratedKey, String> {
        let keygen = Arc::clone(&self.keygen);
        let work_dir = self.config.work_dir.clone();
        let user_id = user_id.to_string();
        let state = state.clone();

        tokio::task::spawn_blocking(move || {
            keyfan_ssh::generate(keygen.as_ref(), &work_dir, &user_id, &state)
        })
        .await
        .map_err(|e| format!("the key generation task failed: {e}"))?
        .map_err(|e| format!("the key generation failed: {e}"))
    }
}

fn generated_fields(generated: &GeneratedKey) -> Vec<CredentialField> {
    vec![
        CredentialField::textfile("Private Key", generated.private_key.clone())
            .with_rows(30)
            .with_cols(64),
        CredentialField::text("Passphrase (for Private Key)", generated.passphrase.clone()),
        CredentialField::textfile("Public Key", generated.public_key.to_string()).with_rows(4),
    ]
}
