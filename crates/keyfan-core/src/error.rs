// ABOUTME: Error types for envelope decoding and broker configuration.
// ABOUTME: Both are boundary errors, converted to error responses before any work starts.

use thiserror::Error;

/// Errors decoding broker input or encoding remote requests.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Input was not valid base64url.
    #[error("input is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Input or output could not be (de)serialized as JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope has no string `action` field.
    #[error("the plugin was run without an action")]
    MissingAction,

    /// The envelope names an action this plugin does not implement.
    #[error("the plugin was run with an unknown action '{0}'")]
    UnknownAction(String),
}

/// A required broker configuration parameter is absent.
///
/// Checked before any operation starts and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the plugin has no hosts configured, use the 'host_list' parameter")]
    MissingHosts,

    #[error("the plugin has no authentication configured, use the 'auth_username' and 'auth_password' parameters")]
    MissingAuth,

    #[error("the plugin has no idh url configured, use the 'idh_url' parameter")]
    MissingIdhUrl,

    #[error("the plugin has no idh service url configured, use the 'idh_service_url' parameter")]
    MissingIdhServiceUrl,
}
