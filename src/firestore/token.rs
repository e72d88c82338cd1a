//! OAuth access tokens for the service account.
//!
//! Tokens are obtained with the JWT-bearer grant: a claim set is signed with
//! the service account's RSA key and exchanged at the token endpoint. The
//! token is cached until shortly before it expires.

use super::FirestoreError;
use crate::core::config::FirestoreConfig;
use crate::core::parse_error_body;
use chrono::Utc;
use http::header;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest_middleware::ClientWithMiddleware;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of the signed assertion, not of the access token.
const ASSERTION_LIFETIME_SECS: i64 = 15 * 60;

/// Tokens are treated as expired this long before the server says they are.
const EXPIRY_MARGIN: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct AssertionClaims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Issues and caches access tokens for one service account.
///
/// Refreshes are single-flight: concurrent callers that find the cache
/// expired queue on the write lock, and all but the first find a fresh token
/// when they get it. The cache is only written after a successful exchange,
/// so a failed or cancelled refresh leaves the previous entry in place.
pub struct TokenManager {
    client: ClientWithMiddleware,
    client_email: String,
    private_key: String,
    token_uri: String,
    scope: String,
    timeout: Duration,
    signing_key: OnceCell<EncodingKey>,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(client: ClientWithMiddleware, config: &FirestoreConfig) -> Self {
        Self {
            client,
            client_email: config.client_email.clone(),
            private_key: config.private_key.clone(),
            token_uri: config.token_uri.clone(),
            scope: config.scope.clone(),
            timeout: config.timeout,
            signing_key: OnceCell::new(),
            cache: RwLock::new(None),
        }
    }

    /// Returns a valid access token, exchanging a new assertion if needed.
    pub async fn token(&self) -> Result<String, FirestoreError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.is_valid()) {
                return Ok(cached.access_token.clone());
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref().filter(|c| c.is_valid()) {
            return Ok(cached.access_token.clone());
        }

        self.refresh(&mut cache).await
    }

    /// Replaces a token the server rejected.
    ///
    /// If the cache already holds a different, unexpired token, another task
    /// has replaced `stale` and that token is returned without a new exchange.
    pub async fn force_refresh(&self, stale: &str) -> Result<String, FirestoreError> {
        let mut cache = self.cache.write().await;

        if let Some(cached) = cache
            .as_ref()
            .filter(|c| c.is_valid() && c.access_token != stale)
        {
            return Ok(cached.access_token.clone());
        }

        self.refresh(&mut cache).await
    }

    /// Drops the cached token; the next call to [`TokenManager::token`] exchanges a new one.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn refresh(&self, cache: &mut Option<CachedToken>) -> Result<String, FirestoreError> {
        let issued_at = Instant::now();

        let token = match self.request_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to refresh access token");
                return Err(e);
            }
        };

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cache = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: issued_at + lifetime,
        });

        debug!(expires_in = token.expires_in, "Refreshed access token");
        Ok(token.access_token)
    }

    async fn request_token(&self) -> Result<TokenResponse, FirestoreError> {
        let assertion = self.sign_assertion().await?;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &assertion)
            .finish();

        let response = self
            .client
            .post(&self.token_uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| FirestoreError::Signing(format!("Token exchange failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FirestoreError::Signing(format!("Token exchange failed: {}", e)))?;

        if !status.is_success() {
            let detail = parse_error_body(&text)
                .map(|e| e.display_message())
                .unwrap_or(text);
            return Err(FirestoreError::Signing(format!(
                "Token exchange rejected with {}: {}",
                status, detail
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| FirestoreError::Parse(format!("token response: {}", e)))
    }

    async fn sign_assertion(&self) -> Result<String, FirestoreError> {
        let key = self
            .signing_key
            .get_or_try_init(|| async { load_signing_key(&self.private_key) })
            .await?;

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            aud: self.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            scope: self.scope.clone(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)
            .map_err(|e| FirestoreError::Signing(format!("Failed to sign assertion: {}", e)))
    }
}

/// Accepts PKCS#8 (`BEGIN PRIVATE KEY`, what service account files contain)
/// and PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
fn load_signing_key(pem: &str) -> Result<EncodingKey, FirestoreError> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| FirestoreError::Signing(format!("Invalid service account private key: {}", e)))?;

    let der = key
        .to_pkcs1_der()
        .map_err(|e| FirestoreError::Signing(format!("Failed to encode private key: {}", e)))?;

    Ok(EncodingKey::from_rsa_der(der.as_bytes()))
}
