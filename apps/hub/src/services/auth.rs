//! Bearer token issuance and verification
//!
//! Tokens are compact signed payloads: `base64url(claims JSON)` joined by a
//! dot with `base64url(HMAC-SHA256(claims JSON, secret))`. Verification is
//! constant-time through the mac's own comparison. Credential storage is
//! behind [`CredentialBackend`] so the hub never sees password material
//! beyond the login request itself.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Lower bound on the configured token lifetime, seconds
const MIN_TTL_SECS: i64 = 60;

/// Why an auth operation was refused
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthReason {
    InvalidCredentials,
    UserNotFound,
    NoPasswordSet,
    AuthError,
    NoSecret,
    InvalidToken,
    TokenExpired,
}

impl AuthReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthReason::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthReason::UserNotFound => "USER_NOT_FOUND",
            AuthReason::NoPasswordSet => "NO_PASSWORD_SET",
            AuthReason::AuthError => "AUTH_ERROR",
            AuthReason::NoSecret => "NO_SECRET",
            AuthReason::InvalidToken => "INVALID_TOKEN",
            AuthReason::TokenExpired => "TOKEN_EXPIRED",
        }
    }
}

impl std::fmt::Display for AuthReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the hub needs to know about a stored account
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub disabled: bool,
    pub has_password: bool,
}

/// Failure inside a credential backend (I/O, upstream service)
#[derive(Debug, thiserror::Error)]
#[error("credential backend failure: {0}")]
pub struct CredentialError(pub String);

/// Interface to wherever accounts actually live
#[async_trait::async_trait]
pub trait CredentialBackend: Send + Sync {
    async fn lookup(&self, user: &str) -> Result<Option<UserAccount>, CredentialError>;
    async fn check_password(&self, user: &str, password: &str) -> Result<bool, CredentialError>;
}

/// Signed token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user: String,
    /// Issued at, Unix seconds
    pub iat: i64,
    /// Expiry, Unix seconds
    pub exp: i64,
    /// Token kind discriminator, always "access"
    pub kind: String,
}

/// A freshly issued token with its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

/// Issues and verifies bearer tokens for the WebSocket upgrade
#[derive(Clone)]
pub struct AuthService {
    backend: Arc<dyn CredentialBackend>,
    secret: Option<String>,
    ttl_secs: i64,
}

impl AuthService {
    pub fn new(backend: Arc<dyn CredentialBackend>, secret: Option<String>, ttl_secs: i64) -> Self {
        if secret.is_none() {
            tracing::warn!("No token secret configured, auth endpoints will refuse all requests");
        }
        Self {
            backend,
            secret,
            ttl_secs: ttl_secs.max(MIN_TTL_SECS),
        }
    }

    /// Whether a signing secret is configured at all
    pub fn enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Check credentials and mint an access token
    pub async fn issue_token(&self, user: &str, password: &str) -> Result<IssuedToken, AuthReason> {
        if user.is_empty() || password.is_empty() {
            return Err(AuthReason::InvalidCredentials);
        }

        let account = self.backend.lookup(user).await.map_err(|e| {
            tracing::error!(user = %user, error = %e, "Account lookup failed");
            AuthReason::AuthError
        })?;
        let account = match account {
            Some(account) if !account.disabled => account,
            // Disabled accounts are reported the same as missing ones.
            _ => return Err(AuthReason::UserNotFound),
        };
        if !account.has_password {
            return Err(AuthReason::NoPasswordSet);
        }

        let matched = self
            .backend
            .check_password(user, password)
            .await
            .map_err(|e| {
                tracing::error!(user = %user, error = %e, "Password check failed");
                AuthReason::AuthError
            })?;
        if !matched {
            return Err(AuthReason::InvalidCredentials);
        }

        let secret = self.secret.as_deref().ok_or(AuthReason::NoSecret)?;
        let iat = chrono::Utc::now().timestamp();
        let exp = iat + self.ttl_secs;
        let claims = TokenClaims {
            user: user.to_string(),
            iat,
            exp,
            kind: "access".to_string(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| AuthReason::AuthError)?;
        let signature = sign(&payload, secret).map_err(|_| AuthReason::AuthError)?;

        tracing::info!(user = %user, expires_at = exp, "Token issued");
        Ok(IssuedToken {
            token: format!(
                "{}.{}",
                URL_SAFE_NO_PAD.encode(&payload),
                URL_SAFE_NO_PAD.encode(signature)
            ),
            expires_at: exp,
        })
    }

    /// Verify a token's signature and expiry, returning its claims
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthReason> {
        let secret = self.secret.as_deref().ok_or(AuthReason::NoSecret)?;

        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(AuthReason::InvalidToken)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthReason::InvalidToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AuthReason::InvalidToken)?;

        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthReason::InvalidToken)?;
        mac.update(&payload);
        // verify_slice is constant-time.
        mac.verify_slice(&signature)
            .map_err(|_| AuthReason::InvalidToken)?;

        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| AuthReason::InvalidToken)?;
        if claims.kind != "access" {
            return Err(AuthReason::InvalidToken);
        }
        if claims.exp <= chrono::Utc::now().timestamp() {
            return Err(AuthReason::TokenExpired);
        }
        Ok(claims)
    }
}

fn sign(payload: &[u8], secret: &str) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}
