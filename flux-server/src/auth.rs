//! Bearer token verification for sockets and REST requests.
//!
//! Tokens are HS256 JWTs signed with the server's shared secret. The claim
//! set is strongly typed: a token without a numeric, non-zero `user_id` or
//! without `exp` fails to decode and is rejected, never defaulted.

use std::time::Duration;

use flux_proto::message::UserId;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// The only signing algorithm accepted.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by a Flux access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric account identity.
    pub user_id: u64,
    /// Account handle, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiry (Unix seconds).
    pub exp: u64,
    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: u64,
}

/// Why a credential was refused.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential was supplied.
    #[error("token required")]
    MissingToken,
    /// The token was valid but has expired.
    #[error("token expired")]
    Expired,
    /// Signature, algorithm, encoding or claim shape is wrong.
    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    /// The token names the reserved zero identity.
    #[error("token carries no user identity")]
    MissingIdentity,
    /// Signing a new token failed.
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// Message safe to show to the client.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::MissingToken => "Token required",
            Self::Expired => "Token expired",
            Self::Invalid(_) | Self::MissingIdentity => "Invalid token",
            Self::Signing(_) => "Failed to issue token",
        }
    }
}

/// Verifies (and, for tooling, issues) access tokens with one shared secret.
pub struct AuthGate {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("algorithm", &ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Creates a gate for the given HMAC secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            decoding: DecodingKey::from_secret(secret),
            encoding: EncodingKey::from_secret(secret),
            validation,
        }
    }

    /// Resolves a raw credential to the user it was issued for.
    ///
    /// Pure validation: no state is touched.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] for an empty, forged, expired, mis-signed
    /// (any algorithm but HS256) or identity-less token.
    pub fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e),
            })?;
        let user_id = UserId::new(data.claims.user_id);
        if user_id.is_unset() {
            return Err(AuthError::MissingIdentity);
        }
        Ok(user_id)
    }

    /// Signs a token for `user_id` valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if encoding fails.
    pub fn issue(
        &self,
        user_id: UserId,
        username: Option<&str>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = jsonwebtoken::get_current_timestamp();
        let claims = Claims {
            user_id: user_id.get(),
            username: username.map(str::to_string),
            exp: now.saturating_add(ttl.as_secs()),
            iat: now,
        };
        jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(AuthError::Signing)
    }
}
