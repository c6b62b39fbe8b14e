// src/sso.rs

use crate::claims::AccessTokenClaims;
use crate::config::SsoConfig;
use crate::error::NilaSsoError;
use crate::grant::{build_grant_payload, GrantRequest};
use crate::model::TokenResponse;
use crate::resolver::SigningKeyResolver;
use crate::verifier::TokenVerifier;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, instrument, warn};
use url::Url;

pub const AUTHORIZE_PATH: &str = "v2/oauth/authorize";
pub const TOKEN_PATH: &str = "v2/oauth/token";
pub const JWKS_PATH: &str = "oauth/jwks";

/// A token response whose access token has been verified.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub response: TokenResponse,
    pub claims: AccessTokenClaims,
}

/// The single sign-on client.
///
/// Create it once and share it; clones share the HTTP connection pool and the
/// signing key cache.
#[derive(Clone)]
pub struct SingleSignOnService {
    config: SsoConfig,
    http_client: reqwest::Client,
    authorize_url: Url,
    token_url: Url,
    verifier: TokenVerifier,
}

impl SingleSignOnService {
    /// Creates the service from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails if the provider endpoints cannot be derived from the configured
    /// base URL or the HTTP client cannot be constructed.
    pub fn new(config: SsoConfig) -> Result<Self, NilaSsoError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        let authorize_url = config.endpoint_url(AUTHORIZE_PATH)?;
        let token_url = config.endpoint_url(TOKEN_PATH)?;
        let jwks_url = config.endpoint_url(JWKS_PATH)?;

        let resolver = SigningKeyResolver::new(http_client.clone(), jwks_url, config.key_cache.clone());
        let verifier = TokenVerifier::new(resolver, config.accepted_issuers(), config.validation.clone());

        Ok(Self { config, http_client, authorize_url, token_url, verifier })
    }

    pub fn config(&self) -> &SsoConfig {
        &self.config
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Builds the URL to send the user to for login.
    ///
    /// `state` must be an unpredictable value generated by the caller and
    /// checked again when the callback arrives. When `scopes` is `None` the
    /// configured default scopes are requested.
    pub fn build_redirect_url(&self, state: &str, scopes: Option<&[&str]>) -> Result<Url, NilaSsoError> {
        if state.is_empty() {
            return Err(NilaSsoError::InvalidState);
        }

        let scope = match scopes {
            Some(scopes) => scopes.join(" "),
            None => self.config.default_scopes.join(" "),
        };

        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.config.credentials.callback_uri.as_str())
            .append_pair("client_id", &self.config.credentials.client_id)
            .append_pair("scope", &scope)
            .append_pair("state", state);
        Ok(url)
    }

    /// Exchanges `grant` at the token endpoint and verifies the returned access token.
    #[instrument(skip(self, grant), fields(grant_type = grant.grant_type()), err)]
    pub async fn exchange_token(&self, grant: &GrantRequest) -> Result<VerifiedToken, NilaSsoError> {
        let payload = build_grant_payload(grant, &self.config.credentials)?;

        let response = self
            .http_client
            .post(self.token_url.clone())
            .header(AUTHORIZATION, payload.authorization)
            .header(CONTENT_TYPE, payload.content_type)
            .body(payload.body)
            .timeout(self.config.http_timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "Token endpoint rejected the grant");
            return Err(NilaSsoError::TokenEndpoint { status: status.as_u16(), body });
        }

        let response: TokenResponse =
            serde_json::from_str(&body).map_err(|e| NilaSsoError::InvalidTokenResponse(e.to_string()))?;
        debug!(expires_in = response.expires_in, "Token endpoint issued an access token");

        let claims = self.verifier.verify(&response.access_token).await?;
        Ok(VerifiedToken { response, claims })
    }

    /// Exchanges the authorization code received on the callback.
    pub async fn exchange_code(&self, code: &str) -> Result<VerifiedToken, NilaSsoError> {
        self.exchange_token(&GrantRequest::authorization_code(code)).await
    }

    /// Obtains a new access token with a refresh token, optionally narrowing its scopes.
    pub async fn refresh(&self, refresh_token: &str, scopes: &[&str]) -> Result<VerifiedToken, NilaSsoError> {
        self.exchange_token(&GrantRequest::refresh_token(refresh_token, scopes.iter().copied()))
            .await
    }

    /// Verifies a previously obtained access token.
    pub async fn verify_token(&self, token: &str) -> Result<AccessTokenClaims, NilaSsoError> {
        self.verifier.verify(token).await
    }

    fn transport_error(&self, e: reqwest::Error) -> NilaSsoError {
        if e.is_timeout() {
            NilaSsoError::TransportTimeout {
                url: self.token_url.to_string(),
                timeout: self.config.http_timeout,
            }
        } else {
            NilaSsoError::HttpError(e)
        }
    }
}
