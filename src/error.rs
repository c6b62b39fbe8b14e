// src/error.rs

use std::time::Duration;
use thiserror::Error;

/// The primary error type for the `nila-sso` library.
///
/// Every error is terminal for the call that raised it; the library never
/// retries on its own. See [`NilaSsoError::is_retryable`] for the cases where
/// a caller-driven retry after backoff makes sense.
#[derive(Debug, Error)]
pub enum NilaSsoError {
    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The grant request could not be built from the supplied input.
    #[error("Invalid grant request: {0}")]
    InvalidGrant(String),

    /// The `state` parameter for the authorization redirect was empty.
    #[error("The authorization state parameter must not be empty")]
    InvalidState,

    /// The token is not a well-formed compact JWS, or its header lacks a `kid`.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The key id named by the token is not part of the provider's current key set.
    #[error("Key not found for kid: {kid}")]
    UnknownKey { kid: String },

    /// The key set could not be fetched or decoded.
    #[error("Key set at {endpoint} is unavailable: {reason}")]
    KeySetUnavailable { endpoint: String, reason: String },

    /// The token's signature does not verify against the resolved key, or the
    /// token declares an algorithm other than the configured one.
    #[error("Invalid signature for kid {kid}: {reason}")]
    SignatureInvalid { kid: String, reason: String },

    /// The `iss` claim is not one of the accepted issuer forms.
    #[error("Issuer mismatch: found '{found}', expected one of {expected:?}")]
    IssuerMismatch { found: String, expected: Vec<String> },

    /// The `exp` claim is not in the future.
    #[error("Token expired at {expired_at} (now {now})")]
    TokenExpired { expired_at: u64, now: u64 },

    /// The token endpoint answered with a non-success status.
    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    /// The token endpoint answered with a body that is not a token response.
    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    /// A network call did not complete within the configured timeout.
    #[error("Request to {url} timed out after {timeout:?}")]
    TransportTimeout { url: String, timeout: Duration },

    /// An error occurred during an HTTP request.
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NilaSsoError {
    /// Whether retrying the same call after a backoff could succeed.
    ///
    /// Only provider availability problems qualify. Signature, issuer and
    /// expiry failures will fail again on every retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NilaSsoError::KeySetUnavailable { .. } | NilaSsoError::TransportTimeout { .. }
        )
    }
}
