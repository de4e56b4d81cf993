//! Bearer-token issuance, the narrow contract the rest of the platform
//! consumes.

use crate::errors::{Error, Result};
use crate::store::{now, random_id, Session, Store};
use async_trait::async_trait;
use std::sync::Arc;

/// Opaque session/token service: issue a bearer token for a user, verify a
/// presented token back to a user id.
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn issue(&self, user_id: &str) -> Result<Session>;
    async fn verify(&self, token: &str) -> Result<String>;
}

/// Store-backed implementation issuing random opaque tokens with a TTL.
pub struct StoreTokenService {
    store: Arc<dyn Store>,
    ttl_secs: i64,
}

impl StoreTokenService {
    pub fn new(store: Arc<dyn Store>, ttl_secs: i64) -> Self {
        Self { store, ttl_secs }
    }
}

#[async_trait]
impl TokenService for StoreTokenService {
    async fn issue(&self, user_id: &str) -> Result<Session> {
        let ts = now();
        let session = Session {
            token: random_id(),
            user_id: user_id.to_string(),
            created_at: ts,
            expires_at: ts + self.ttl_secs,
        };
        self.store.put_session(session.clone()).await?;
        Ok(session)
    }

    async fn verify(&self, token: &str) -> Result<String> {
        match self.store.session(token).await? {
            Some(session) if now() <= session.expires_at => Ok(session.user_id),
            Some(_) => {
                // Expired: purge on access.
                self.store.delete_session(token).await?;
                Err(Error::not_found("session"))
            }
            None => Err(Error::not_found("session")),
        }
    }
}
