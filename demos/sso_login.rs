//! Walks through a login against the provider from the terminal.
//!
//! ```text
//! cargo run --example sso_login -- sso.yaml
//! ```
//!
//! `sso.yaml`:
//!
//! ```yaml
//! client_id: "your-client-id"
//! secret_key: "your-secret-key"
//! callback_uri: "http://localhost:8080/callback"
//! scopes: ["publicData"]
//! ```
use nila_sso::prelude::*;
use serde::Deserialize;
use std::io::BufRead;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct DemoConfig {
    client_id: String,
    secret_key: String,
    callback_uri: String,
    endpoint: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nila_sso=debug")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "sso.yaml".to_string());
    let demo: DemoConfig = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;

    let mut builder = SsoConfigBuilder::new()
        .client_id(demo.client_id)
        .secret_key(demo.secret_key)
        .callback_uri(&demo.callback_uri)?
        .default_scopes(demo.scopes);
    if let Some(endpoint) = demo.endpoint.as_deref() {
        builder = builder.endpoint(endpoint)?;
    }
    let sso = SingleSignOnService::new(builder.build()?)?;

    // Good enough for a demo; a real application needs a CSPRNG-backed value tied to the session.
    let state = format!("{:x}", SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos());
    println!("Open this URL and log in:\n\n  {}\n", sso.build_redirect_url(&state, None)?);
    println!("Paste the `code` query parameter from the callback:");

    let mut code = String::new();
    std::io::stdin().lock().read_line(&mut code)?;

    let verified = sso.exchange_code(code.trim()).await?;
    println!(
        "Logged in as {} (character {:?}), scopes: {}",
        verified.claims.character_name,
        verified.claims.character_id(),
        verified.claims.scopes.join(", ")
    );
    println!("Access token expires in {}s", verified.response.expires_in);

    // Re-validating a stored token hits the key cache, not the network.
    let claims = sso.verify_token(&verified.response.access_token).await?;
    println!("Re-verified token {} for {}", claims.token_id, claims.subject);

    Ok(())
}
