pub mod builders;

pub use builders::{GroupBuilder, UserBuilder};

use async_trait::async_trait;
use base64ct::Encoding;
use latchkey::broker::{Broker, ProviderDirectory, TokenExchanger, TokenResponse};
use latchkey::errors::{Error, Result};
use latchkey::hierarchy::HierarchyManager;
use latchkey::roles::RoleRegistry;
use latchkey::session::{StoreTokenService, TokenService};
use latchkey::settings::{BrokerSettings, ClaimKeys, OidcClient, ProviderConfig};
use latchkey::store::MemoryStore;
use latchkey::{Guard, GuardConfig, PermissionResolver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

pub const TEST_CLIENT_ID: &str = "web-app";
pub const TEST_REDIRECT_URI: &str = "https://app.test/callback";
pub const TEST_LOGOUT_CALLBACK: &str = "https://broker.test/logout/callback";

/// Shared wiring for cross-module tests.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub roles: Arc<RoleRegistry>,
    pub hierarchy: Arc<HierarchyManager>,
}

impl TestEnv {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let hierarchy = Arc::new(HierarchyManager::new(store.clone()));
        Self {
            store,
            roles: Arc::new(RoleRegistry::with_defaults()),
            hierarchy,
        }
    }

    pub fn resolver(&self) -> PermissionResolver {
        PermissionResolver::new(self.store.clone(), self.roles.clone())
    }

    pub fn guard(&self, config: GuardConfig) -> Guard {
        Guard::new(self.store.clone(), self.roles.clone(), self.resolver(), config)
    }

    pub fn broker(&self, exchanger: Arc<dyn TokenExchanger>) -> Broker {
        let providers = Arc::new(ProviderDirectory::new(vec![test_provider()]));
        let tokens: Arc<dyn TokenService> =
            Arc::new(StoreTokenService::new(self.store.clone(), 3600));
        Broker::new(
            self.store.clone(),
            self.hierarchy.clone(),
            providers,
            exchanger,
            tokens,
            vec![OidcClient {
                client_id: TEST_CLIENT_ID.to_string(),
                client_secret: "app-secret".to_string(),
                valid_redirect_uris: vec![TEST_REDIRECT_URI.to_string()],
            }],
            ClaimKeys::default(),
            BrokerSettings {
                logout_callback_uri: Some(TEST_LOGOUT_CALLBACK.to_string()),
                ..BrokerSettings::default()
            },
        )
    }
}

pub fn test_provider() -> ProviderConfig {
    ProviderConfig {
        issuer: "https://idp.test".to_string(),
        authorization_endpoint: "https://idp.test/authorize".to_string(),
        token_endpoint: "https://idp.test/token".to_string(),
        end_session_endpoint: "https://idp.test/logout".to_string(),
        userinfo_endpoint: "https://idp.test/userinfo".to_string(),
        jwks_uri: "https://idp.test/jwks".to_string(),
        client_id: "latchkey".to_string(),
        client_secret: "s3cret".to_string(),
        scopes: "openid profile email".to_string(),
    }
}

/// Compact-JWT encode a payload (unsigned; the broker decodes, it does not
/// verify).
pub fn encode_jwt(payload: &serde_json::Value) -> String {
    let header = base64ct::Base64UrlUnpadded::encode_string(b"{\"alg\":\"RS256\"}");
    let body = base64ct::Base64UrlUnpadded::encode_string(payload.to_string().as_bytes());
    format!("{header}.{body}.signature")
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Stub upstream provider: hands back a canned ID token, or a canned
/// failure.
pub struct FakeExchanger {
    id_claims: serde_json::Value,
    fail_with: Option<(u16, String)>,
    pub calls: AtomicUsize,
}

impl FakeExchanger {
    pub fn returning(id_claims: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            id_claims,
            fail_with: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(status: u16, message: &str) -> Arc<Self> {
        Arc::new(Self {
            id_claims: serde_json::Value::Null,
            fail_with: Some((status, message.to_string())),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TokenExchanger for FakeExchanger {
    async fn exchange_code(
        &self,
        _provider: &ProviderConfig,
        _code: &str,
        _redirect_uri: &str,
    ) -> Result<TokenResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((status, message)) = &self.fail_with {
            return Err(Error::Upstream {
                status: *status,
                message: message.clone(),
            });
        }
        Ok(TokenResponse {
            access_token: "opaque-access-token".to_string(),
            id_token: Some(encode_jwt(&self.id_claims)),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(300),
        })
    }
}
