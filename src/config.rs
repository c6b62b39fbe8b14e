// src/config.rs

use crate::error::NilaSsoError;
use jsonwebtoken::Algorithm;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Base URL of the identity provider used when no endpoint is configured.
pub const DEFAULT_ENDPOINT: &str = "https://login.eveonline.com";

/// Default `User-Agent` sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// How long fetched signing keys are trusted when the provider sends no `Cache-Control`.
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// How long an unknown key id is remembered before another fetch is allowed for it.
pub const DEFAULT_NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(5);

/// Bound on every network call made by the library.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// The client's registration with the identity provider.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub secret_key: String,
    pub callback_uri: Url,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("secret_key", &"<redacted>")
            .field("callback_uri", &self.callback_uri.as_str())
            .finish()
    }
}

/// Contains the validation settings for an access token.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The only signing algorithm accepted. Tokens declaring any other
    /// algorithm in their header are rejected before signature verification.
    pub algorithm: Algorithm,
    /// The tolerance for clock skew when checking `exp`. Defaults to zero.
    pub leeway: Duration,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RS256,
            leeway: Duration::ZERO,
        }
    }
}

/// Settings for the signing key cache.
#[derive(Clone, Debug)]
pub struct KeyCacheSettings {
    /// TTL for fetched keys, and the upper bound for a `Cache-Control: max-age`.
    pub ttl: Duration,
    /// Window during which a key id missing from a fresh key set is answered
    /// with `UnknownKey` without another fetch.
    pub negative_ttl: Duration,
    /// Bound on a single key-set fetch, body included.
    pub fetch_timeout: Duration,
}

impl Default for KeyCacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_KEY_CACHE_TTL,
            negative_ttl: DEFAULT_NEGATIVE_CACHE_TTL,
            fetch_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// The main configuration for the single sign-on service.
///
/// All values are fixed at construction. Build it with [`SsoConfigBuilder`].
#[derive(Clone, Debug)]
pub struct SsoConfig {
    /// Base URL of the identity provider. The authorization, token and key-set
    /// endpoints are resolved against it, and it is one of the accepted issuers.
    pub endpoint: Url,
    pub credentials: ClientCredentials,
    pub user_agent: String,
    /// Scopes requested by `build_redirect_url` when the caller passes none.
    pub default_scopes: Vec<String>,
    pub http_timeout: Duration,
    pub validation: ValidationDetails,
    pub key_cache: KeyCacheSettings,
}

impl SsoConfig {
    /// Resolves a path relative to the configured endpoint.
    pub(crate) fn endpoint_url(&self, path: &str) -> Result<Url, NilaSsoError> {
        let mut base = self.endpoint.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| NilaSsoError::InvalidUrl(e.to_string()))
    }

    /// The issuer forms the provider is known to emit: the endpoint itself and its bare host.
    pub fn accepted_issuers(&self) -> Vec<String> {
        let mut issuers = vec![self.endpoint.as_str().trim_end_matches('/').to_string()];
        if let Some(host) = self.endpoint.host_str() {
            issuers.push(host.to_string());
        }
        issuers
    }
}

/// A builder for creating an `SsoConfig` instance.
#[derive(Default)]
pub struct SsoConfigBuilder {
    endpoint: Option<Url>,
    client_id: Option<String>,
    secret_key: Option<String>,
    callback_uri: Option<Url>,
    user_agent: Option<String>,
    default_scopes: Vec<String>,
    http_timeout: Option<Duration>,
    validation: ValidationDetails,
    key_cache: KeyCacheSettings,
}

impl SsoConfigBuilder {
    /// Creates a new `SsoConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the provider base URL. Defaults to [`DEFAULT_ENDPOINT`].
    pub fn endpoint(mut self, url: &str) -> Result<Self, NilaSsoError> {
        let parsed_url = Url::parse(url).map_err(|e| NilaSsoError::InvalidUrl(e.to_string()))?;
        self.endpoint = Some(parsed_url);
        Ok(self)
    }

    /// Sets the client ID of the application. This is a required field.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the client's secret key. This is a required field.
    pub fn secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Sets the registered callback URI. This is a required field.
    pub fn callback_uri(mut self, url: &str) -> Result<Self, NilaSsoError> {
        let parsed_url = Url::parse(url).map_err(|e| NilaSsoError::InvalidUrl(e.to_string()))?;
        self.callback_uri = Some(parsed_url);
        Ok(self)
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the scopes requested when `build_redirect_url` is called without any.
    pub fn default_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the timeout applied to every network call. Defaults to 10 seconds.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Sets the accepted signing algorithm. Defaults to `RS256`.
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.validation.algorithm = algorithm;
        self
    }

    /// Sets the clock skew tolerance for `exp`. Defaults to zero.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Sets the TTL for fetched signing keys. Defaults to one hour.
    ///
    /// A `Cache-Control: max-age` on the key set, floored at
    /// [`MIN_CACHE_CONTROL_TTL`](crate::resolver::MIN_CACHE_CONTROL_TTL), is used when it
    /// is shorter. It never extends this TTL.
    pub fn key_cache_ttl(mut self, ttl: Duration) -> Self {
        self.key_cache.ttl = ttl;
        self
    }

    /// Sets how long an unknown key id is remembered. Defaults to 5 seconds.
    pub fn negative_cache_ttl(mut self, ttl: Duration) -> Self {
        self.key_cache.negative_ttl = ttl;
        self
    }

    /// Consumes the builder and returns an `SsoConfig` object.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields (`client_id`, `secret_key`, `callback_uri`)
    /// are missing, if the algorithm is symmetric, or if a duration is zero.
    pub fn build(self) -> Result<SsoConfig, NilaSsoError> {
        let client_id = self.client_id.ok_or(NilaSsoError::MissingConfiguration("client_id".to_string()))?;
        let secret_key = self.secret_key.ok_or(NilaSsoError::MissingConfiguration("secret_key".to_string()))?;
        let callback_uri = self.callback_uri.ok_or(NilaSsoError::MissingConfiguration("callback_uri".to_string()))?;

        if matches!(self.validation.algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(NilaSsoError::InvalidConfiguration(format!(
                "{:?} is symmetric; provider tokens are verified with public keys",
                self.validation.algorithm
            )));
        }

        let http_timeout = self.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);
        if http_timeout.is_zero() {
            return Err(NilaSsoError::InvalidConfiguration("http_timeout must be non-zero".to_string()));
        }
        if self.key_cache.ttl.is_zero() {
            return Err(NilaSsoError::InvalidConfiguration("key_cache_ttl must be non-zero".to_string()));
        }

        let endpoint = match self.endpoint {
            Some(url) => url,
            None => Url::parse(DEFAULT_ENDPOINT).map_err(|e| NilaSsoError::InvalidUrl(e.to_string()))?,
        };
        if endpoint.host_str().is_none() {
            return Err(NilaSsoError::InvalidUrl(format!("endpoint {} has no host", endpoint)));
        }

        Ok(SsoConfig {
            endpoint,
            credentials: ClientCredentials { client_id, secret_key, callback_uri },
            user_agent: self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            default_scopes: self.default_scopes,
            http_timeout,
            validation: self.validation,
            key_cache: KeyCacheSettings { fetch_timeout: http_timeout, ..self.key_cache },
        })
    }
}
