//! Bearer-token parsing
//!
//! Verifies JWT bearer tokens against the identity provider's JWKS and
//! extracts the identity claims the rest of the service works with. Both the
//! proxy and the sign-up API reject tokens missing the `sub` or `email`
//! claims.

pub mod jwks;

use std::sync::Arc;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;

use crate::error::HttpError;
pub use jwks::{JwksKeys, VerificationKey};

/// Identity claims extracted from a verified bearer token
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TokenClaims {
    /// Subject (user ID at the identity provider)
    pub sub: String,
    /// Preferred username; falls back to the subject when absent
    pub username: String,
    /// Email address
    pub email: String,
    /// Given name
    pub given_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Company
    pub company: Option<String>,
}

/// Raw JWT payload; expiry is validated by the decoder
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    company: Option<String>,
}

/// Verifies bearer tokens and extracts identity claims.
pub struct TokenParser {
    keys: Arc<JwksKeys>,
}

impl TokenParser {
    /// Create a parser backed by the given key store
    pub fn new(keys: Arc<JwksKeys>) -> Self {
        Self { keys }
    }

    /// Verify the token signature and extract the identity claims.
    ///
    /// Errors carry the message `"unable to extract claims from token"`; the
    /// callers prefix their own context (`"invalid bearer token"`).
    pub async fn parse(&self, token: &str) -> Result<TokenClaims, HttpError> {
        let header = decode_header(token).map_err(claims_error)?;

        let key = self.keys.get_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(key.algorithm);
        validation.validate_exp = true;
        validation.validate_aud = false;

        let data = decode::<RawClaims>(token, &key.key, &validation).map_err(claims_error)?;
        let claims = data.claims;

        let sub = claims.sub.unwrap_or_default();
        if sub.is_empty() {
            return Err(noncompliant_claims("subject missing"));
        }

        let email = claims.email.unwrap_or_default();
        if email.is_empty() {
            return Err(noncompliant_claims("email missing"));
        }

        let username = claims
            .preferred_username
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| sub.clone());

        Ok(TokenClaims {
            sub,
            username,
            email,
            given_name: claims.given_name,
            family_name: claims.family_name,
            company: claims.company,
        })
    }
}

fn claims_error(e: jsonwebtoken::errors::Error) -> HttpError {
    HttpError::unauthorized("unable to extract claims from token", e.to_string())
}

fn noncompliant_claims(what: &str) -> HttpError {
    HttpError::unauthorized(
        "unable to extract claims from token",
        format!("token does not comply to expected claims: {}", what),
    )
}

/// Extract a `Bearer` token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, HttpError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| HttpError::unauthorized("no token found", "a Bearer token is expected"))
}

#[cfg(test)]
pub(crate) mod test_tokens {
    //! HS256 token minting for unit tests

    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    /// Key ID installed by [`test_parser`]
    pub const TEST_KID: &str = "test-kid";
    const TEST_SECRET: &[u8] = b"test-secret";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        preferred_username: String,
        email: String,
        exp: u64,
    }

    /// A parser that accepts tokens minted with [`token`]
    pub fn test_parser() -> TokenParser {
        let keys = JwksKeys::new("https://sso.test/certs");
        keys.install_keys(vec![(
            TEST_KID.to_string(),
            VerificationKey {
                algorithm: jsonwebtoken::Algorithm::HS256,
                key: jsonwebtoken::DecodingKey::from_secret(TEST_SECRET),
            },
        )]);
        TokenParser::new(Arc::new(keys))
    }

    /// Mint a signed token for the given identity
    pub fn token(sub: &str, username: &str, email: &str) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            preferred_username: username.to_string(),
            email: email.to_string(),
            exp: jsonwebtoken::get_current_timestamp() + 600,
        };
        let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
        header.kid = Some(TEST_KID.to_string());
        encode(&header, &claims, &EncodingKey::from_secret(TEST_SECRET)).unwrap()
    }
}
