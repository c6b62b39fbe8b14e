// src/verifier.rs

use crate::claims::AccessTokenClaims;
use crate::config::ValidationDetails;
use crate::error::NilaSsoError;
use crate::resolver::{PublicKey, SigningKeyResolver};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Header, Validation};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

/// A token whose header and payload parsed, before any trust is placed in it.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub header: Header,
    pub key_id: String,
    /// The raw, unverified payload.
    pub payload: serde_json::Value,
}

/// Verifies provider-issued access tokens.
///
/// Each call runs decode, key resolution, signature check and claim
/// validation in that order and stops at the first failure. The verifier
/// keeps no state of its own; the resolver's key cache is shared by clones.
#[derive(Clone)]
pub struct TokenVerifier {
    resolver: SigningKeyResolver,
    accepted_issuers: Vec<String>,
    validation: ValidationDetails,
}

impl TokenVerifier {
    pub fn new(resolver: SigningKeyResolver, accepted_issuers: Vec<String>, validation: ValidationDetails) -> Self {
        Self { resolver, accepted_issuers, validation }
    }

    pub fn resolver(&self) -> &SigningKeyResolver {
        &self.resolver
    }

    pub fn accepted_issuers(&self) -> &[String] {
        &self.accepted_issuers
    }

    /// Verifies `token` and returns its claims.
    #[instrument(skip(self, token), err)]
    pub async fn verify(&self, token: &str) -> Result<AccessTokenClaims, NilaSsoError> {
        let decoded = Self::decode(token)?;
        let key = self.resolver.resolve(&decoded.key_id).await?;
        let claims = self.check_signature(token, &decoded, &key)?;
        let claims = self.validate_claims(claims, unix_now())?;
        debug!(kid = %decoded.key_id, "Token verified");
        Ok(claims)
    }

    /// Parses the header and payload without checking the signature.
    ///
    /// # Errors
    ///
    /// `MalformedToken` if the token is not three base64url segments, the
    /// header or payload is not JSON, or the header has no `kid`.
    pub fn decode(token: &str) -> Result<DecodedToken, NilaSsoError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|part| part.is_empty()) {
            return Err(NilaSsoError::MalformedToken(format!(
                "expected three non-empty segments, found {}",
                parts.len()
            )));
        }

        let header = decode_header(token)
            .map_err(|e| NilaSsoError::MalformedToken(format!("invalid header: {}", e)))?;
        let key_id = header
            .kid
            .clone()
            .ok_or_else(|| NilaSsoError::MalformedToken("header is missing the 'kid' field".to_string()))?;

        let payload = decode_raw_payload(parts[1])?;

        Ok(DecodedToken { header, key_id, payload })
    }

    /// Verifies the signature with `key` and decodes the claims.
    ///
    /// Only the configured algorithm is accepted. A token whose header names
    /// any other algorithm fails here even if the key could verify it.
    pub fn check_signature(
        &self,
        token: &str,
        decoded: &DecodedToken,
        key: &PublicKey,
    ) -> Result<AccessTokenClaims, NilaSsoError> {
        if decoded.header.alg != self.validation.algorithm {
            warn!(kid = %decoded.key_id, alg = ?decoded.header.alg, "Rejecting token with unexpected algorithm");
            return Err(NilaSsoError::SignatureInvalid {
                kid: decoded.key_id.clone(),
                reason: format!(
                    "token declares {:?}, only {:?} is accepted",
                    decoded.header.alg, self.validation.algorithm
                ),
            });
        }

        // Claims are checked by `validate_claims`; the library only verifies the signature.
        let mut validation = Validation::new(self.validation.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<AccessTokenClaims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    NilaSsoError::MalformedToken(format!("claims could not be decoded: {}", e))
                }
                _ => NilaSsoError::SignatureInvalid {
                    kid: decoded.key_id.clone(),
                    reason: e.to_string(),
                },
            })
    }

    /// Checks issuer and expiry against `now` (seconds since the Unix epoch).
    pub fn validate_claims(&self, claims: AccessTokenClaims, now: u64) -> Result<AccessTokenClaims, NilaSsoError> {
        if !self.accepted_issuers.iter().any(|issuer| *issuer == claims.issuer) {
            warn!(issuer = %claims.issuer, "Rejecting token from unexpected issuer");
            return Err(NilaSsoError::IssuerMismatch {
                found: claims.issuer,
                expected: self.accepted_issuers.clone(),
            });
        }

        if claims.expires_at.saturating_add(self.validation.leeway.as_secs()) <= now {
            return Err(NilaSsoError::TokenExpired { expired_at: claims.expires_at, now });
        }

        Ok(claims)
    }
}

// Decodes a JWT payload segment without verifying anything.
fn decode_raw_payload(payload_segment: &str) -> Result<serde_json::Value, NilaSsoError> {
    let bytes = base64_url::decode(payload_segment)
        .map_err(|e| NilaSsoError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    let payload: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| NilaSsoError::MalformedToken(format!("payload is not JSON: {}", e)))?;
    if !payload.is_object() {
        return Err(NilaSsoError::MalformedToken("payload is not a JSON object".to_string()));
    }
    Ok(payload)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
