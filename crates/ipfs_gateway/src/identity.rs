// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bearer token authentication

use std::fmt;
use std::time::Duration;

use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Whoever a verified token was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Subject(pub String);

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("token is malformed")]
    Malformed,
    #[error("token isn't signed with HS256")]
    Algorithm,
    #[error("signature doesn't match")]
    Signature,
    #[error("token has expired")]
    Expired,
    #[error("token isn't valid yet")]
    NotYetValid,
    #[error("token doesn't name a subject")]
    MissingSubject,
    #[error("no tokens are accepted")]
    Disabled,
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => Self::Signature,
            ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm => Self::Algorithm,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            _ => Self::Malformed,
        }
    }
}

/// Something that can check identity tokens.
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Subject, VerifyError>;
}

/// Rejects every token; for deployments without an identity provider.
pub struct RejectAll;

#[async_trait::async_trait]
impl TokenVerifier for RejectAll {
    async fn verify(&self, _token: &str) -> Result<Subject, VerifyError> {
        Err(VerifyError::Disabled)
    }
}

/// Verifies compact JWS tokens signed with HMAC-SHA256 under a shared secret.
///
/// `exp` and `nbf` claims are enforced when present, give or take `leeway`. The subject is the
/// `sub` claim, or failing that `user_id` or `uid`.
pub struct Hs256Verifier {
    key: DecodingKey,
    validation: Validation,
}

#[derive(Deserialize)]
struct Claims {
    sub: Option<String>,
    user_id: Option<String>,
    uid: Option<String>,
}

impl Hs256Verifier {
    pub fn new(key: impl AsRef<[u8]>, leeway: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.leeway = leeway.as_secs();
        Self {
            key: DecodingKey::from_secret(key.as_ref()),
            validation,
        }
    }
}

#[async_trait::async_trait]
impl TokenVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Result<Subject, VerifyError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)?.claims;
        [claims.sub, claims.user_id, claims.uid]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .map(Subject)
            .ok_or(VerifyError::MissingSubject)
    }
}

/// Token from an `Authorization: Bearer <token>` header, if there is one.
///
/// The scheme is matched case-insensitively. Any other scheme counts as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    NoToken,
    VerifyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Authenticated { subject: Subject },
    Rejected { reason: RejectReason },
}

/// Authenticate the bearer of `headers`.
pub async fn authenticate(verifier: &dyn TokenVerifier, headers: &HeaderMap) -> AuthResult {
    let Some(token) = bearer_token(headers) else {
        return AuthResult::Rejected {
            reason: RejectReason::NoToken,
        };
    };
    match verifier.verify(token).await {
        Ok(subject) => AuthResult::Authenticated { subject },
        Err(err) => {
            warn!("Rejected token: {err}");
            AuthResult::Rejected {
                reason: RejectReason::VerifyFailed,
            }
        }
    }
}

pub mod test_utils {
    //! Token minting for tests of code that authenticates requests.

    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    /// Sign `claims` (a JSON object) as an HS256 token.
    pub fn sign(key: &[u8], claims: &str) -> String {
        sign_with(key, Algorithm::HS256, claims)
    }

    pub fn sign_with(key: &[u8], algorithm: Algorithm, claims: &str) -> String {
        let claims: serde_json::Value =
            serde_json::from_str(claims).expect("claims must be valid JSON");
        encode(&Header::new(algorithm), &claims, &EncodingKey::from_secret(key))
            .expect("HMAC signing doesn't fail")
    }
}
