// src/grant.rs

use crate::config::ClientCredentials;
use crate::error::NilaSsoError;
use base64::engine::{general_purpose::STANDARD, Engine};
use url::form_urlencoded;

/// `Content-Type` of every token endpoint request.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// An OAuth2 grant to exchange at the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantRequest {
    AuthorizationCode {
        code: String,
    },
    RefreshToken {
        refresh_token: String,
        /// Narrows the refreshed token to these scopes. Empty keeps the original grant.
        requested_scopes: Vec<String>,
    },
}

impl GrantRequest {
    pub fn authorization_code(code: impl Into<String>) -> Self {
        GrantRequest::AuthorizationCode { code: code.into() }
    }

    pub fn refresh_token<I, S>(refresh_token: impl Into<String>, requested_scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GrantRequest::RefreshToken {
            refresh_token: refresh_token.into(),
            requested_scopes: requested_scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// The `grant_type` form value.
    pub fn grant_type(&self) -> &'static str {
        match self {
            GrantRequest::AuthorizationCode { .. } => "authorization_code",
            GrantRequest::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// Everything needed to send a grant to the token endpoint, minus the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPayload {
    /// Form-encoded request body.
    pub body: String,
    /// Value of the `Authorization` header.
    pub authorization: String,
    pub content_type: &'static str,
}

/// Builds the token endpoint payload for `grant`.
///
/// # Errors
///
/// Returns `InvalidGrant` if the code or refresh token is blank.
pub fn build_grant_payload(
    grant: &GrantRequest,
    credentials: &ClientCredentials,
) -> Result<GrantPayload, NilaSsoError> {
    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("grant_type", grant.grant_type());

    match grant {
        GrantRequest::AuthorizationCode { code } => {
            if code.trim().is_empty() {
                return Err(NilaSsoError::InvalidGrant("authorization code is empty".to_string()));
            }
            form.append_pair("code", code);
        }
        GrantRequest::RefreshToken { refresh_token, requested_scopes } => {
            if refresh_token.trim().is_empty() {
                return Err(NilaSsoError::InvalidGrant("refresh token is empty".to_string()));
            }
            form.append_pair("refresh_token", refresh_token);
            if !requested_scopes.is_empty() {
                form.append_pair("scope", &requested_scopes.join(" "));
            }
        }
    }

    Ok(GrantPayload {
        body: form.finish(),
        authorization: basic_authorization(credentials),
        content_type: FORM_CONTENT_TYPE,
    })
}

fn basic_authorization(credentials: &ClientCredentials) -> String {
    let pair = format!("{}:{}", credentials.client_id, credentials.secret_key);
    format!("Basic {}", STANDARD.encode(pair))
}
