// ABOUTME: Identity registry client: creates the user account and registers it with the service.
// ABOUTME: HTTP basic auth against <idh_url>/users and <idh_url>/registries.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to create user: {status}; {body}")]
    Create { status: u16, body: String },

    #[error("created user but the response has no self link: {body}")]
    MissingUserLink { body: String },

    #[error("failed to register user: {status}; {body}")]
    Register { status: u16, body: String },
}

/// Makes sure a user exists in the identity registry before keys are issued.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    async fn ensure_registered(&self, user_id: &str) -> Result<(), RegistryError>;
}

/// Connection details taken from the broker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub url: String,
    pub service_url: String,
    pub username: String,
    pub password: String,
}

pub struct HttpRegistry {
    client: reqwest::Client,
    config: RegistryConfig,
}

impl HttpRegistry {
    pub fn new(config: RegistryConfig, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(u16, String), RegistryError> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl IdentityRegistry for HttpRegistry {
    async fn ensure_registered(&self, user_id: &str) -> Result<(), RegistryError> {
        let creation = json!({"persistentId": user_id, "genericStore": {}});
        let (status, body) = self.post("users", &creation).await?;

        match status {
            201 => {
                let user_uri = user_link(&body).ok_or_else(|| RegistryError::MissingUserLink {
                    body: body.clone(),
                })?;
                let registration = json!({"user": user_uri, "service": self.config.service_url});
                let (status, body) = self.post("registries", &registration).await?;
                if matches!(status, 200 | 201) {
                    tracing::info!(user_id = %user_id, "Registered user with identity registry");
                    Ok(())
                } else {
                    Err(RegistryError::Register { status, body })
                }
            }
            404 if is_already_assigned(&body, user_id) => {
                tracing::debug!(user_id = %user_id, "User already known to identity registry");
                Ok(())
            }
            _ => Err(RegistryError::Create { status, body }),
        }
    }
}

/// `_links.self.href` of a created user.
fn user_link(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/_links/self/href")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Whether a 404 body says the persistent id is taken, i.e. the user exists.
///
/// The registry answers with a list of messages; only the first is checked.
fn is_already_assigned(body: &str, user_id: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let first = match &value {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    let expected = format!("persistent id {user_id} already assigned");
    first
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .is_some_and(|message| message == expected)
}
