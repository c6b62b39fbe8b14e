// src/claims.rs

use serde::{Deserialize, Deserializer, Serialize};

/// The claims of an access token that passed verification.
///
/// Values of this type are handed out by [`crate::verifier::TokenVerifier`] only
/// after the signature, issuer and expiry checks succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccessTokenClaims {
    #[serde(rename = "sub")]
    pub subject: String,
    /// Granted scopes, in the order the provider listed them.
    #[serde(rename = "scp", default, deserialize_with = "one_or_many")]
    pub scopes: Vec<String>,
    #[serde(rename = "jti")]
    pub token_id: String,
    #[serde(rename = "kid")]
    pub key_id: String,
    #[serde(rename = "azp")]
    pub authorized_party: String,
    #[serde(rename = "name")]
    pub character_name: String,
    pub owner: String,
    /// Expiry as seconds since the Unix epoch.
    #[serde(rename = "exp")]
    pub expires_at: u64,
    #[serde(rename = "iss")]
    pub issuer: String,
}

impl AccessTokenClaims {
    /// The numeric character id from a subject of the form `CHARACTER:EVE:<id>`.
    pub fn character_id(&self) -> Option<u64> {
        let mut parts = self.subject.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("CHARACTER"), Some(_), Some(id)) => id.parse().ok(),
            _ => None,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

// The provider writes `scp` as a bare string when a single scope was granted.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(scope) => vec![scope],
        OneOrMany::Many(scopes) => scopes,
    })
}
