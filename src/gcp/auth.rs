//! # GCP Authentication
//!
//! This module handles authentication with Google Cloud Platform. Two
//! credential sources are supported:
//!
//! - A service-account key file named by `GOOGLE_APPLICATION_CREDENTIALS`,
//!   exchanged for an access token with the OAuth 2.0 JWT bearer flow.
//! - The GCE metadata server, used when no key file is configured (for
//!   example when running on a VM with an attached service account).

use anyhow::{Context, Result, bail};
use cached::proc_macro::once;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::client::CLIENT;
use crate::gcp::types::{AccessToken, ServiceAccount};

/// The Google OAuth2 token endpoint.
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Token endpoint of the GCE metadata server.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Scope requested for every token.
const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Environment variable naming the service-account key file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Represents the claims in the JSON Web Token (JWT) used for authentication.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// The issuer of the token (the service account's email address).
    iss: String,
    /// The scope of the requested permissions.
    scope: String,
    /// The audience for the token (the token endpoint URL).
    aud: String,
    /// The expiration time of the token (Unix timestamp).
    exp: u64,
    /// The time the token was issued (Unix timestamp).
    iat: u64,
}

/// Reads and parses the service-account key file, if one is configured.
///
/// Returns `Ok(None)` when `GOOGLE_APPLICATION_CREDENTIALS` is unset.
pub fn load_service_account() -> Result<Option<ServiceAccount>> {
    let Ok(path) = std::env::var(CREDENTIALS_ENV) else {
        return Ok(None);
    };
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read service account file {}", path))?;
    let service_account: ServiceAccount =
        serde_json::from_str(&json).with_context(|| format!("Invalid service account file {}", path))?;
    Ok(Some(service_account))
}

/// Fetches a GCP access token.
///
/// With a service-account key file this performs the server-to-server
/// OAuth 2.0 flow:
/// 1. Creates a JWT asserting the service account's identity and scope.
/// 2. Signs the JWT using the service account's private key (RS256).
/// 3. Exchanges the signed JWT at the token endpoint for an access token.
///
/// Without a key file the token is requested from the metadata server.
///
/// The token is fetched once per process; a provisioning run is far shorter
/// than the one hour token lifetime.
#[once(result = true)]
pub async fn get_access_token() -> Result<String> {
    match load_service_account()? {
        Some(service_account) => exchange_jwt(&service_account).await,
        None => metadata_server_token().await,
    }
}

async fn exchange_jwt(service_account: &ServiceAccount) -> Result<String> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs();
    let exp = now + 3600; // Token is valid for 1 hour.

    let token_url = service_account.token_uri.as_deref().unwrap_or(TOKEN_URL);
    let claims = Claims {
        iss: service_account.client_email.clone(),
        scope: SCOPE.to_string(),
        aud: token_url.to_string(),
        exp,
        iat: now,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(service_account.private_key_id.clone());
    let encoding_key = EncodingKey::from_rsa_pem(service_account.private_key.as_bytes())
        .context("Invalid private key in service account file")?;
    let jwt = encode(&header, &claims, &encoding_key)?;

    let params = [
        ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
        ("assertion", &jwt),
    ];

    let response = CLIENT
        .post(token_url)
        .form(&params)
        .send()
        .await
        .context("Failed to call token endpoint")?;

    if !response.status().is_success() {
        let error_text = response.text().await.unwrap_or_default();
        bail!("Failed to get access token: {}", error_text);
    }

    let token_response: AccessToken = response.json().await?;
    Ok(token_response.access_token)
}

async fn metadata_server_token() -> Result<String> {
    let response = CLIENT
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .with_context(|| {
            format!(
                "{} is not set and the metadata server is unreachable",
                CREDENTIALS_ENV
            )
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        bail!(
            "Metadata server refused token request ({}): {}",
            status,
            error_text
        );
    }

    let token_response: AccessToken = response.json().await?;
    Ok(token_response.access_token)
}
