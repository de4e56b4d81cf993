//! External-identity broker: OIDC authorization-code exchange against an
//! upstream provider, single-use state tokens, claim-driven provisioning and
//! broker-mediated logout.

pub mod claims;
pub mod sync;

use crate::accounts::{Accounts, Profile};
use crate::errors::{Error, Result};
use crate::hierarchy::HierarchyManager;
use crate::session::TokenService;
use crate::settings::{BrokerSettings, ClaimKeys, OidcClient, ProviderConfig};
use crate::store::{now, random_id, LoginState, Session, StateFlow, Store};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

/// Injectable snapshot of the upstream provider list. Replaces the old
/// process-global lazy cache: consumers hold the directory and call
/// [`ProviderDirectory::reload`] explicitly when configuration changes.
#[derive(Debug)]
pub struct ProviderDirectory {
    providers: RwLock<Arc<Vec<ProviderConfig>>>,
}

impl ProviderDirectory {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers: RwLock::new(Arc::new(providers)),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<ProviderConfig>> {
        self.providers
            .read()
            .expect("provider directory lock poisoned")
            .clone()
    }

    pub fn reload(&self, providers: Vec<ProviderConfig>) {
        *self
            .providers
            .write()
            .expect("provider directory lock poisoned") = Arc::new(providers);
        tracing::info!("provider directory reloaded");
    }

    /// The active provider (first in the list).
    pub fn active(&self) -> Result<ProviderConfig> {
        self.snapshot()
            .first()
            .cloned()
            .ok_or_else(|| Error::not_found("identity provider"))
    }
}

/// Token response from the upstream token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Upstream code exchange. A trait seam so tests can stub the provider; the
/// exchange is single-use upstream and must never be retried.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse>;
}

/// `reqwest`-backed exchanger with a caller-supplied timeout.
pub struct HttpTokenExchanger {
    client: reqwest::Client,
}

impl HttpTokenExchanger {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&provider.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", provider.client_id.as_str()),
                ("client_secret", provider.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Propagate the provider's status and message, never invent one.
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

pub struct Broker {
    store: Arc<dyn Store>,
    hierarchy: Arc<HierarchyManager>,
    accounts: Accounts,
    providers: Arc<ProviderDirectory>,
    exchanger: Arc<dyn TokenExchanger>,
    tokens: Arc<dyn TokenService>,
    clients: Vec<OidcClient>,
    claim_keys: ClaimKeys,
    settings: BrokerSettings,
}

impl Broker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        hierarchy: Arc<HierarchyManager>,
        providers: Arc<ProviderDirectory>,
        exchanger: Arc<dyn TokenExchanger>,
        tokens: Arc<dyn TokenService>,
        clients: Vec<OidcClient>,
        claim_keys: ClaimKeys,
        settings: BrokerSettings,
    ) -> Self {
        let accounts = Accounts::new(store.clone(), hierarchy.clone());
        Self {
            store,
            hierarchy,
            accounts,
            providers,
            exchanger,
            tokens,
            clients,
            claim_keys,
            settings,
        }
    }

    fn client(&self, client_id: &str) -> Result<&OidcClient> {
        self.clients
            .iter()
            .find(|c| c.client_id == client_id)
            .ok_or_else(|| Error::BadRequest(format!("unknown client `{client_id}`")))
    }

    fn validated_redirect<'a>(&self, client: &'a OidcClient, redirect_uri: &str) -> Result<&'a str> {
        client
            .valid_redirect_uris
            .iter()
            .find(|uri| uri.as_str() == redirect_uri)
            .map(String::as_str)
            .ok_or_else(|| {
                Error::BadRequest(format!(
                    "redirect uri not registered for client `{}`",
                    client.client_id
                ))
            })
    }

    async fn mint_state(
        &self,
        client_id: &str,
        redirect_uri: &str,
        flow: StateFlow,
    ) -> Result<String> {
        let state = random_id();
        let ts = now();
        self.store
            .put_login_state(LoginState {
                state: state.clone(),
                client_id: client_id.to_string(),
                redirect_uri: redirect_uri.to_string(),
                flow,
                created_at: ts,
                expires_at: ts + self.settings.state_ttl_secs,
            })
            .await?;
        Ok(state)
    }

    /// Start a login: validate the downstream client, mint a single-use
    /// state and build the upstream authorization URL.
    pub async fn start_login(&self, client_id: &str, redirect_uri: &str) -> Result<Url> {
        let client = self.client(client_id)?;
        let redirect_uri = self.validated_redirect(client, redirect_uri)?.to_string();
        let provider = self.providers.active()?;

        let state = self
            .mint_state(client_id, &redirect_uri, StateFlow::Login)
            .await?;

        let mut url = Url::parse(&provider.authorization_endpoint)
            .map_err(|e| Error::BadRequest(format!("invalid authorization endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &provider.client_id)
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("scope", &provider.scopes)
            .append_pair("state", &state);

        tracing::debug!(client = %client_id, "login started");
        Ok(url)
    }

    /// Provider redirected back with `code` and `state`: consume the state
    /// (single use), exchange the code, reconcile the user and issue a local
    /// session.
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<Session> {
        let record = self
            .store
            .consume_login_state(state)
            .await?
            .filter(|r| r.flow == StateFlow::Login)
            .ok_or(Error::InvalidState)?;

        let provider = self.providers.active()?;
        let tokens = self
            .exchanger
            .exchange_code(&provider, code, &record.redirect_uri)
            .await?;

        // Identity claims live in the ID token; some providers put them on
        // the access token instead.
        let payload = match &tokens.id_token {
            Some(id_token) => claims::decode_payload(id_token)
                .or_else(|_| claims::decode_payload(&tokens.access_token))?,
            None => claims::decode_payload(&tokens.access_token)?,
        };
        let identity = claims::extract(&self.claim_keys, &payload)?;

        let user = self
            .accounts
            .resolve_or_provision(Profile {
                username: identity
                    .email
                    .clone()
                    .unwrap_or_else(|| identity.subject.clone()),
                email: identity.email.clone(),
                identity_id: Some(identity.subject.clone()),
                given_name: identity.given_name.clone(),
                family_name: identity.family_name.clone(),
                tenant_id: identity.tenant.clone(),
            })
            .await?;

        // Best-effort: a partially failed provisioning never fails login.
        if let Some(groups_claim) = &identity.groups {
            if let Err(err) =
                sync::sync_groups(&self.store, &self.hierarchy, &user, groups_claim, &self.claim_keys)
                    .await
            {
                tracing::warn!(user = %user.id, %err, "group sync failed; continuing login");
            }
        }

        let session = self.tokens.issue(&user.id).await?;
        tracing::info!(user = %user.id, client = %record.client_id, "login completed");
        Ok(session)
    }

    /// Start a broker-mediated logout: mint a state bound to the caller's
    /// post-logout redirect and build the upstream end-session URL.
    pub async fn start_logout(
        &self,
        client_id: &str,
        post_logout_redirect_uri: &str,
    ) -> Result<Url> {
        let client = self.client(client_id)?;
        let redirect_uri = self
            .validated_redirect(client, post_logout_redirect_uri)?
            .to_string();
        let provider = self.providers.active()?;

        let state = self
            .mint_state(client_id, &redirect_uri, StateFlow::Logout)
            .await?;

        let mut url = Url::parse(&provider.end_session_endpoint)
            .map_err(|e| Error::BadRequest(format!("invalid end-session endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &provider.client_id)
            .append_pair("state", &state);
        // The provider returns the browser to the broker's own callback,
        // which then serves the caller's post-logout redirect.
        if let Some(callback) = &self.settings.logout_callback_uri {
            url.query_pairs_mut()
                .append_pair("post_logout_redirect_uri", callback);
        }

        tracing::debug!(client = %client_id, "logout started");
        Ok(url)
    }

    /// Return leg of the logout flow: consume the state and hand back the
    /// caller's own post-logout redirect URI.
    pub async fn handle_logout_callback(&self, state: &str) -> Result<String> {
        let record = self
            .store
            .consume_login_state(state)
            .await?
            .filter(|r| r.flow == StateFlow::Logout)
            .ok_or(Error::InvalidState)?;
        tracing::debug!(client = %record.client_id, "logout completed");
        Ok(record.redirect_uri)
    }
}
