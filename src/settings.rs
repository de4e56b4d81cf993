use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Upstream identity providers; the first entry is the active one.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Downstream OIDC clients allowed to start login/logout flows.
    #[serde(default)]
    pub clients: Vec<OidcClient>,
    #[serde(default)]
    pub claims: ClaimKeys,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub authorization: AuthorizationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub end_session_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub client_id: String,
    pub client_secret: String,
    /// Scopes requested on the authorization leg.
    #[serde(default = "default_scopes")]
    pub scopes: String,
}

fn default_scopes() -> String {
    "openid profile email".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcClient {
    pub client_id: String,
    pub client_secret: String,
    pub valid_redirect_uris: Vec<String>,
}

/// Which claim keys carry which identity attributes, plus how the group
/// claim string is parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimKeys {
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_email")]
    pub email: String,
    #[serde(default = "default_given_name")]
    pub given_name: String,
    #[serde(default = "default_family_name")]
    pub family_name: String,
    #[serde(default = "default_groups")]
    pub groups: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    /// Separator between entries in the groups claim.
    #[serde(default = "default_group_delimiter")]
    pub group_delimiter: String,
    /// Separator between a group's base name and its role suffix.
    #[serde(default = "default_role_separator")]
    pub role_separator: String,
}

fn default_subject() -> String {
    "sub".to_string()
}
fn default_email() -> String {
    "email".to_string()
}
fn default_given_name() -> String {
    "given_name".to_string()
}
fn default_family_name() -> String {
    "family_name".to_string()
}
fn default_groups() -> String {
    "groups".to_string()
}
fn default_tenant() -> String {
    "training_id".to_string()
}
fn default_group_delimiter() -> String {
    ",".to_string()
}
fn default_role_separator() -> String {
    ":".to_string()
}

impl Default for ClaimKeys {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            email: default_email(),
            given_name: default_given_name(),
            family_name: default_family_name(),
            groups: default_groups(),
            tenant: default_tenant(),
            group_delimiter: default_group_delimiter(),
            role_separator: default_role_separator(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// TTL of single-use state tokens, seconds.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: i64,
    /// TTL of issued sessions, seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
    /// Timeout for upstream token-endpoint calls, seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Absolute URI of this broker's own logout-callback endpoint, sent
    /// upstream as `post_logout_redirect_uri` so the provider can return the
    /// browser after ending its session.
    #[serde(default)]
    pub logout_callback_uri: Option<String>,
}

fn default_state_ttl() -> i64 {
    600
}
fn default_session_ttl() -> i64 {
    3600
}
fn default_http_timeout() -> u64 {
    10
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl(),
            session_ttl_secs: default_session_ttl(),
            http_timeout_secs: default_http_timeout(),
            logout_callback_uri: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthorizationSettings {
    /// Principals that bypass authorization entirely.
    #[serde(default)]
    pub super_admins: Vec<String>,
    /// Verb -> capability overrides, e.g. `PUT = "read"`. Capability names:
    /// create, read, update, delete.
    #[serde(default)]
    pub verb_overrides: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Layered load: defaults, then an optional file, then `LATCHKEY__*`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: LATCHKEY__BROKER__STATE_TTL_SECS=300, etc.
        builder = builder.add_source(config::Environment::with_prefix("LATCHKEY").separator("__"));

        let cfg = builder.build()?;
        let settings: Settings = cfg.try_deserialize()?;
        Ok(settings)
    }
}
