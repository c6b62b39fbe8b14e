// src/resolver.rs

use crate::config::KeyCacheSettings;
use crate::error::NilaSsoError;
use crate::model::{JsonWebKey, JsonWebKeySet};
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::{Algorithm, DecodingKey};
use moka::future::Cache;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Key material used to verify token signatures.
pub type PublicKey = Arc<DecodingKey>;

/// Lower bound applied to a `Cache-Control: max-age` sent with the key set.
/// The configured key TTL is the upper bound.
pub const MIN_CACHE_CONTROL_TTL: Duration = Duration::from_secs(60);

/// A cached signing key.
#[derive(Clone)]
pub struct SigningKeyEntry {
    pub key_id: String,
    pub public_key: PublicKey,
    pub fetched_at: Instant,
    pub expires_at: Instant,
}

impl SigningKeyEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for SigningKeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyEntry")
            .field("key_id", &self.key_id)
            .field("fetched_at", &self.fetched_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of a failed fetch, shared by every caller waiting on it.
#[derive(Clone, Debug)]
enum FetchFailure {
    Timeout(Duration),
    Unavailable(String),
}

struct FetchedKeySet {
    keys: HashMap<String, PublicKey>,
    ttl: Duration,
}

type KeySetFetch = Shared<BoxFuture<'static, Result<Arc<FetchedKeySet>, FetchFailure>>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, SigningKeyEntry>,
    // At most one key-set fetch runs per resolver; later callers await this one.
    in_flight: Option<KeySetFetch>,
    // Kids the in-flight fetch was awaited for. Missing ones are negatively
    // cached before the slot is freed.
    waiting_kids: HashSet<String>,
}

/// Resolves key ids to the provider's public signing keys.
///
/// Keys are cached per `kid` for the configured TTL. When a lookup misses,
/// the whole key set is fetched once and every concurrent caller, whichever
/// `kid` it asked for, waits on that same fetch and sees the same outcome.
/// A `kid` that a fresh key set does not contain is remembered for a short
/// window so a burst of tokens naming it does not turn into a burst of fetches.
#[derive(Clone)]
pub struct SigningKeyResolver {
    // The resolver is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    jwks_uri: Url,
    settings: KeyCacheSettings,
    state: Mutex<CacheState>,
    unknown_kids: Option<Cache<String, ()>>,
}

impl SigningKeyResolver {
    /// Creates a resolver for the key set published at `jwks_uri`.
    ///
    /// Nothing is fetched until the first call to [`resolve`](Self::resolve).
    pub fn new(http_client: reqwest::Client, jwks_uri: Url, settings: KeyCacheSettings) -> Self {
        let unknown_kids = (!settings.negative_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(1_000)
                .time_to_live(settings.negative_ttl)
                .build()
        });

        Self {
            inner: Arc::new(Inner {
                http_client,
                jwks_uri,
                settings,
                state: Mutex::new(CacheState::default()),
                unknown_kids,
            }),
        }
    }

    pub fn jwks_uri(&self) -> &Url {
        &self.inner.jwks_uri
    }

    /// Returns the public key for `kid`.
    ///
    /// # Errors
    ///
    /// * `UnknownKey` if a fresh key set does not contain `kid`.
    /// * `KeySetUnavailable` if the key set could not be fetched or decoded.
    /// * `TransportTimeout` if the fetch exceeded the configured timeout.
    ///
    /// A failed fetch leaves the cache as it was.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, kid: &str) -> Result<PublicKey, NilaSsoError> {
        let fetch = {
            let mut state = self.inner.lock_state();

            if let Some(entry) = state.entries.get(kid) {
                if !entry.is_expired(Instant::now()) {
                    debug!("JWK cache hit for kid: {}", kid);
                    return Ok(entry.public_key.clone());
                }
                debug!("JWK cache entry for kid {} has expired", kid);
            }

            if self.inner.recently_missing(kid) {
                debug!("kid {} was missing from a recent key set; not refetching yet", kid);
                return Err(NilaSsoError::UnknownKey { kid: kid.to_string() });
            }

            let fetch = match state.in_flight.clone() {
                Some(fetch) => {
                    debug!("Joining in-flight key set fetch for kid: {}", kid);
                    fetch
                }
                None => {
                    debug!("JWK cache miss for kid: {}. Fetching from provider.", kid);
                    let fetch = Inner::start_fetch(&self.inner);
                    state.in_flight = Some(fetch.clone());
                    fetch
                }
            };
            state.waiting_kids.insert(kid.to_string());
            fetch
        };

        let fetched = fetch.await.map_err(|failure| self.inner.fetch_error(failure))?;

        match fetched.keys.get(kid) {
            Some(key) => Ok(key.clone()),
            None => {
                warn!("Key set from {} has no key with kid: {}", self.inner.jwks_uri, kid);
                Err(NilaSsoError::UnknownKey { kid: kid.to_string() })
            }
        }
    }

    /// Returns the cached entry for `kid`, expired or not.
    pub fn cached_entry(&self, kid: &str) -> Option<SigningKeyEntry> {
        self.inner.lock_state().entries.get(kid).cloned()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // The state is consistent after every critical section, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recently_missing(&self, kid: &str) -> bool {
        self.unknown_kids
            .as_ref()
            .is_some_and(|unknown_kids| unknown_kids.contains_key(kid))
    }

    /// Builds the shared fetch future. The future holds only a weak reference
    /// back to the resolver so an abandoned fetch cannot keep it alive.
    fn start_fetch(this: &Arc<Inner>) -> KeySetFetch {
        let resolver = Arc::downgrade(this);
        let http_client = this.http_client.clone();
        let jwks_uri = this.jwks_uri.clone();
        let settings = this.settings.clone();

        async move {
            let outcome = match tokio::time::timeout(
                settings.fetch_timeout,
                fetch_key_set(&http_client, &jwks_uri, &settings),
            )
            .await
            {
                Ok(result) => result.map(Arc::new),
                Err(_) => Err(FetchFailure::Timeout(settings.fetch_timeout)),
            };

            complete_fetch(&resolver, &outcome).await;
            outcome
        }
        .boxed()
        .shared()
    }

    fn fetch_error(&self, failure: FetchFailure) -> NilaSsoError {
        match failure {
            FetchFailure::Timeout(timeout) => NilaSsoError::TransportTimeout {
                url: self.jwks_uri.to_string(),
                timeout,
            },
            FetchFailure::Unavailable(reason) => NilaSsoError::KeySetUnavailable {
                endpoint: self.jwks_uri.to_string(),
                reason,
            },
        }
    }
}

/// Publishes a finished fetch: stores the keys on success and frees the in-flight slot either way.
///
/// Waiting kids that the fetched set lacks are negatively cached first, so a
/// caller arriving after the slot is freed does not start another fetch for them.
async fn complete_fetch(resolver: &Weak<Inner>, outcome: &Result<Arc<FetchedKeySet>, FetchFailure>) {
    let Some(inner) = resolver.upgrade() else {
        return;
    };

    let fetched = match outcome {
        Ok(fetched) => fetched,
        Err(_) => {
            let mut state = inner.lock_state();
            state.waiting_kids.clear();
            state.in_flight = None;
            return;
        }
    };

    if let Some(unknown_kids) = &inner.unknown_kids {
        for kid in fetched.keys.keys() {
            unknown_kids.invalidate(kid).await;
        }
    }

    loop {
        let missing: Vec<String> = {
            let mut state = inner.lock_state();
            let missing: Vec<String> = state
                .waiting_kids
                .drain()
                .filter(|kid| !fetched.keys.contains_key(kid))
                .collect();

            if missing.is_empty() || inner.unknown_kids.is_none() {
                store_entries(&mut state, fetched);
                state.in_flight = None;
                return;
            }
            missing
        };

        // Callers may join while these inserts run; the next pass picks up their kids.
        if let Some(unknown_kids) = &inner.unknown_kids {
            for kid in missing {
                unknown_kids.insert(kid, ()).await;
            }
        }
    }
}

fn store_entries(state: &mut CacheState, fetched: &FetchedKeySet) {
    let fetched_at = Instant::now();
    let expires_at = fetched_at + fetched.ttl;
    state.entries.retain(|_, entry| !entry.is_expired(fetched_at));
    for (kid, key) in &fetched.keys {
        state.entries.insert(
            kid.clone(),
            SigningKeyEntry {
                key_id: kid.clone(),
                public_key: key.clone(),
                fetched_at,
                expires_at,
            },
        );
    }
}

/// Fetches and decodes the key set. Returns the keys with the TTL to cache them for.
async fn fetch_key_set(
    http_client: &reqwest::Client,
    jwks_uri: &Url,
    settings: &KeyCacheSettings,
) -> Result<FetchedKeySet, FetchFailure> {
    let transport = |e: reqwest::Error| {
        if e.is_timeout() {
            FetchFailure::Timeout(settings.fetch_timeout)
        } else {
            FetchFailure::Unavailable(e.to_string())
        }
    };

    let response = http_client.get(jwks_uri.clone()).send().await.map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchFailure::Unavailable(format!("key set endpoint returned HTTP {}", status.as_u16())));
    }

    let ttl = parse_cache_control(&response)
        .map(|max_age| max_age.max(MIN_CACHE_CONTROL_TTL).min(settings.ttl))
        .unwrap_or(settings.ttl);

    let body = response.bytes().await.map_err(transport)?;
    let jwks: JsonWebKeySet = serde_json::from_slice(&body)
        .map_err(|e| FetchFailure::Unavailable(format!("malformed key set document: {}", e)))?;

    let mut keys = HashMap::with_capacity(jwks.keys.len());
    for jwk in &jwks.keys {
        let Some(kid) = jwk.kid.as_deref() else {
            warn!("Skipping {} key without a kid", jwk.kty);
            continue;
        };
        if jwk.use_purpose.as_deref().is_some_and(|purpose| purpose != "sig") {
            debug!("Skipping non-signing key {}", kid);
            continue;
        }
        match decoding_key(jwk) {
            Ok(key) => {
                keys.insert(kid.to_string(), Arc::new(key));
            }
            Err(reason) => warn!("Skipping unusable key {}: {}", kid, reason),
        }
    }

    info!("Successfully fetched {} keys. Caching with TTL: {:?}", keys.len(), ttl);
    Ok(FetchedKeySet { keys, ttl })
}

fn decoding_key(jwk: &JsonWebKey) -> Result<DecodingKey, String> {
    check_declared_algorithm(jwk)?;

    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or("RSA key missing 'n' component")?;
            let e = jwk.e.as_deref().ok_or("RSA key missing 'e' component")?;
            DecodingKey::from_rsa_components(n, e).map_err(|e| e.to_string())
        }
        "EC" => {
            match jwk.crv.as_deref() {
                None | Some("P-256") | Some("P-384") => {}
                Some(other) => return Err(format!("unsupported curve '{}'", other)),
            }
            let x = jwk.x.as_deref().ok_or("EC key missing 'x' coordinate")?;
            let y = jwk.y.as_deref().ok_or("EC key missing 'y' coordinate")?;
            DecodingKey::from_ec_components(x, y).map_err(|e| e.to_string())
        }
        other => Err(format!("unsupported key type '{}'", other)),
    }
}

/// Rejects a key whose declared `alg` cannot be used with its key type or curve.
fn check_declared_algorithm(jwk: &JsonWebKey) -> Result<(), String> {
    let Some(declared) = jwk.alg.as_deref() else {
        return Ok(());
    };
    let alg = Algorithm::from_str(declared).map_err(|_| format!("unsupported algorithm '{}'", declared))?;

    let compatible = match (jwk.kty.as_str(), alg) {
        ("RSA", Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) => true,
        ("RSA", Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512) => true,
        ("EC", Algorithm::ES256) => jwk.crv.as_deref().map_or(true, |crv| crv == "P-256"),
        ("EC", Algorithm::ES384) => jwk.crv.as_deref().map_or(true, |crv| crv == "P-384"),
        _ => false,
    };
    if compatible {
        Ok(())
    } else {
        Err(format!("algorithm {} does not match key type '{}'", declared, jwk.kty))
    }
}

/// Parses the `Cache-Control` header to determine the TTL.
fn parse_cache_control(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|part| {
            part.trim()
                .strip_prefix("max-age=")?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}
