//! Identity-claim extraction from upstream tokens.
//!
//! The broker reads the ID token's payload (falling back to the access
//! token) and pulls identity attributes through the configurable claim-key
//! map. Signature verification belongs to the external session collaborator;
//! the payload is decoded, not verified, exactly like the system this
//! replaces.

use crate::errors::{Error, Result};
use crate::settings::ClaimKeys;
use base64ct::Encoding;
use serde_json::Value;

/// Identity attributes extracted from a token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    pub subject: String,
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    /// Raw delimited groups claim, parsed later by the sync step.
    pub groups: Option<String>,
    pub tenant: Option<String>,
}

/// Decode the payload segment of a compact JWT into JSON.
pub fn decode_payload(token: &str) -> Result<Value> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload)) = (segments.next(), segments.next()) else {
        return Err(Error::InvalidToken("not a compact JWT".into()));
    };
    let bytes = base64ct::Base64UrlUnpadded::decode_vec(payload)
        .map_err(|e| Error::InvalidToken(format!("payload is not base64url: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidToken(format!("payload is not JSON: {e}")))?;
    Ok(value)
}

/// Pull identity attributes out of a decoded payload using the configured
/// claim keys. The subject claim is mandatory.
pub fn extract(keys: &ClaimKeys, payload: &Value) -> Result<IdentityClaims> {
    let subject = string_claim(payload, &keys.subject).ok_or_else(|| {
        Error::InvalidToken(format!("missing subject claim `{}`", keys.subject))
    })?;
    Ok(IdentityClaims {
        subject,
        email: string_claim(payload, &keys.email),
        given_name: string_claim(payload, &keys.given_name),
        family_name: string_claim(payload, &keys.family_name),
        groups: groups_claim(payload, &keys.groups, &keys.group_delimiter),
        tenant: string_claim(payload, &keys.tenant),
    })
}

fn string_claim(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        // Some providers emit numeric subjects/tenants.
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Groups arrive either as a delimited string or as a JSON array; normalize
/// to the delimited form the sync step parses.
fn groups_claim(payload: &Value, key: &str, delimiter: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Array(items)) => {
            let joined: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join(delimiter))
            }
        }
        _ => None,
    }
}
