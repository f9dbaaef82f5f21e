// ABOUTME: Typed broker and per-host envelopes with their base64url JSON encoding.
// ABOUTME: Input is validated here once; everything downstream works on these types.

use crate::error::ProtocolError;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use keyfan_ssh::{PublicKeyRecord, StateToken, DEFAULT_STATE_PREFIX};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// base64url decoder that accepts input with or without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Placeholder the broker uses for configuration values nobody set.
pub const NOT_CONFIGURED: &str = "_not_configured";

/// `cred_state` sent with deploy requests, before any state exists.
pub const UNDEFINED_STATE: &str = "undefined";

/// `result` field shared by broker responses and remote responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Ok,
    Error,
}

/// How the broker should display a credential field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Textfile,
}

/// One piece of issued material shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
}

impl CredentialField {
    pub fn new(name: impl Into<String>, field_type: FieldType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type,
            value: value.into(),
            rows: None,
            cols: None,
            save_as: None,
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text, value)
    }

    pub fn textfile(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, FieldType::Textfile, value)
    }

    pub fn with_rows(mut self, rows: u32) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn with_cols(mut self, cols: u32) -> Self {
        self.cols = Some(cols);
        self
    }
}

// ============================================================================
// Broker input
// ============================================================================

/// A decoded broker invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginRequest {
    /// Describe the plugin's configuration and request parameters.
    Parameter,
    /// Issue a credential.
    Request(CredentialRequest),
    /// Revoke a previously issued credential.
    Revoke(CredentialRequest),
}

impl PluginRequest {
    /// Decode a base64url JSON envelope (padding optional).
    ///
    /// # Errors
    /// Returns an error for bad base64, bad JSON, a missing or unknown
    /// `action`, or request fields of the wrong shape.
    pub fn decode(encoded: &str) -> Result<Self, ProtocolError> {
        let bytes = URL_SAFE_LENIENT.decode(encoded.trim())?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingAction)?
            .to_string();

        match action.as_str() {
            "parameter" => Ok(Self::Parameter),
            "request" => Ok(Self::Request(serde_json::from_value(value)?)),
            "revoke" => Ok(Self::Revoke(serde_json::from_value(value)?)),
            _ => Err(ProtocolError::UnknownAction(action)),
        }
    }
}

/// Fields shared by `request` and `revoke` invocations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CredentialRequest {
    pub watts_userid: String,
    #[serde(default = "undefined_state")]
    pub cred_state: String,
    #[serde(default, deserialize_with = "lenient_params")]
    pub params: RequestParams,
    #[serde(default)]
    pub conf_params: ConfParams,
    pub user_info: UserInfo,
}

fn undefined_state() -> String {
    UNDEFINED_STATE.to_string()
}

/// Per-request parameters chosen by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RequestParams {
    #[serde(default)]
    pub pub_key: Option<String>,
}

impl RequestParams {
    /// The supplied public key, ignoring blank values.
    pub fn supplied_key(&self) -> Option<&str> {
        self.pub_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Revoke invocations may carry `params` as an empty string.
fn lenient_params<'de, D>(deserializer: D) -> Result<RequestParams, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(_) => serde_json::from_value(value).map_err(serde::de::Error::custom),
        _ => Ok(RequestParams::default()),
    }
}

/// Plugin configuration as delivered by the broker. Unchecked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfParams {
    #[serde(default)]
    pub state_prefix: Option<String>,
    #[serde(default)]
    pub host_list: Option<String>,
    #[serde(default)]
    pub idh_url: Option<String>,
    #[serde(default)]
    pub idh_service_url: Option<String>,
    #[serde(default)]
    pub auth_username: Option<String>,
    #[serde(default)]
    pub auth_password: Option<String>,
    #[serde(default, deserialize_with = "bool_or_string")]
    pub check_loa: Option<bool>,
}

/// Treat absent values and the broker placeholder alike.
pub fn configured(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .filter(|v| *v != NOT_CONFIGURED && !v.trim().is_empty())
}

fn bool_or_string<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got '{other}'"
            ))),
        },
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a boolean, got {other}"
        ))),
    }
}

/// OpenID Connect user information forwarded by the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    pub iss: String,
    #[serde(default)]
    pub acr: Option<String>,
    #[serde(default, deserialize_with = "group_list")]
    pub groups: Vec<String>,
}

/// Groups arrive either as a list or as one comma-separated string.
fn group_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let groups = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s
            .split(',')
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect(),
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    Ok(groups)
}

// ============================================================================
// Broker output
// ============================================================================

/// Configuration parameter advertised by the `parameter` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfParamSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub param_type: &'static str,
    pub default: &'static str,
}

/// Request parameter advertised by the `parameter` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestParamSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub param_type: &'static str,
    pub mandatory: bool,
}

/// The single JSON document written to stdout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PluginResponse {
    Parameters {
        result: ResultKind,
        version: &'static str,
        conf_params: Vec<ConfParamSpec>,
        request_params: Vec<Vec<RequestParamSpec>>,
    },
    Issued {
        result: ResultKind,
        credential: Vec<CredentialField>,
        state: String,
    },
    Revoked {
        result: ResultKind,
    },
    Error {
        result: ResultKind,
        user_msg: String,
        log_msg: String,
    },
}

impl PluginResponse {
    /// Description of the plugin's configuration surface.
    ///
    /// The two request parameter sets mean "upload your own public key" and
    /// "let the plugin generate a key pair".
    pub fn parameters() -> Self {
        let conf = |name, param_type, default| ConfParamSpec {
            name,
            param_type,
            default,
        };
        Self::Parameters {
            result: ResultKind::Ok,
            version: env!("CARGO_PKG_VERSION"),
            conf_params: vec![
                conf("state_prefix", "string", DEFAULT_STATE_PREFIX),
                conf("host_list", "string", NOT_CONFIGURED),
                conf("idh_url", "string", NOT_CONFIGURED),
                conf("idh_service_url", "string", NOT_CONFIGURED),
                conf("auth_username", "string", NOT_CONFIGURED),
                conf("auth_password", "string", NOT_CONFIGURED),
                conf("check_loa", "boolean", "true"),
            ],
            request_params: vec![
                vec![RequestParamSpec {
                    key: "pub_key",
                    name: "public key",
                    description: "the public key to upload to the service",
                    param_type: "textarea",
                    mandatory: true,
                }],
                vec![],
            ],
        }
    }

    pub fn issued(credential: Vec<CredentialField>, state: &StateToken) -> Self {
        Self::Issued {
            result: ResultKind::Ok,
            credential,
            state: state.to_string(),
        }
    }

    pub fn revoked() -> Self {
        Self::Revoked {
            result: ResultKind::Ok,
        }
    }

    pub fn error(user_msg: impl Into<String>, log_msg: impl Into<String>) -> Self {
        Self::Error {
            result: ResultKind::Error,
            user_msg: user_msg.into(),
            log_msg: log_msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }
}

// ============================================================================
// Per-host protocol
// ============================================================================

/// Action understood by the remote per-host handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteAction {
    Request,
    Revoke,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<String>,
}

/// Request passed to the remote handler as a single argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub action: RemoteAction,
    pub watts_userid: String,
    pub cred_state: String,
    pub params: RemoteParams,
}

impl RemoteRequest {
    /// Install `key` for `user_id`.
    pub fn deploy(user_id: &str, key: &PublicKeyRecord) -> Self {
        Self {
            action: RemoteAction::Request,
            watts_userid: user_id.to_string(),
            cred_state: UNDEFINED_STATE.to_string(),
            params: RemoteParams {
                state: Some(key.state().to_string()),
                pub_key: Some(key.to_string()),
            },
        }
    }

    /// Remove the key tagged with `state`.
    pub fn revoke(user_id: &str, state: &StateToken) -> Self {
        Self {
            action: RemoteAction::Revoke,
            watts_userid: user_id.to_string(),
            cred_state: state.to_string(),
            params: RemoteParams {
                state: Some(state.to_string()),
                pub_key: None,
            },
        }
    }

    /// JSON, base64url-encoded with padding.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self, ProtocolError> {
        let bytes = URL_SAFE_LENIENT.decode(encoded.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Credential entry reported by a remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteField {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub value: String,
}

impl RemoteField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: Some("text".to_string()),
            value: value.into(),
        }
    }
}

/// What the remote handler prints on stdout.
///
/// A `host` field, if present, is ignored; the executor knows which host it
/// talked to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteResponse {
    pub result: ResultKind,
    #[serde(default)]
    pub credential: Vec<RemoteField>,
    #[serde(default)]
    pub log_msg: Option<String>,
}
