// src/lib.rs


pub mod claims;
pub mod config;
pub mod error;
pub mod grant;
pub mod model;
pub mod resolver;
pub mod sso;
pub mod verifier;

/// The public prelude for the `nila-sso` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::claims::AccessTokenClaims;
    pub use crate::config::{ClientCredentials, SsoConfig, SsoConfigBuilder};
    pub use crate::error::NilaSsoError;
    pub use crate::grant::{build_grant_payload, GrantPayload, GrantRequest};
    pub use crate::model::TokenResponse;
    pub use crate::resolver::{PublicKey, SigningKeyEntry, SigningKeyResolver};
    pub use crate::sso::{SingleSignOnService, VerifiedToken};
    pub use crate::verifier::{DecodedToken, TokenVerifier};
    pub use jsonwebtoken::Algorithm;
}
