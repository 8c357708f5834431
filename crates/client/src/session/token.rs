//! Bearer token inspection.
//!
//! The backend issues HS256 JWTs. The client cannot verify the signature
//! (it does not hold the key) and does not need to: it only reads the claims
//! to learn who is signed in and when the token stops being accepted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use brickyard_core::UserId;
use serde::Deserialize;
use thiserror::Error;

use crate::types::AuthUser;

/// Errors reading a token's claims.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not a JWT (expected three dot-separated segments)")]
    Malformed,
    #[error("token payload is not valid base64url")]
    Encoding,
    #[error("token payload is not valid JSON: {0}")]
    Claims(String),
    #[error("token does not identify a user")]
    MissingSubject,
}

/// Claims the client reads from a token.
///
/// Backends disagree on where the user id goes, so each candidate claim is
/// read on its own and [`TokenClaims::subject`] picks one.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub id: Option<String>,
    #[serde(rename = "_id")]
    pub object_id: Option<String>,
    pub user_id: Option<String>,
    pub sub: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    /// Expiry, seconds since the Unix epoch.
    pub exp: Option<i64>,
    /// Issue time, seconds since the Unix epoch.
    pub iat: Option<i64>,
}

impl TokenClaims {
    /// Decode the claims segment of a JWT without verifying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a three-part JWT or its payload
    /// is not base64url-encoded JSON.
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let mut parts = token.trim().split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|_| TokenError::Encoding)?;
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Claims(e.to_string()))
    }

    /// Whether the token has expired at `now` (Unix seconds).
    ///
    /// Tokens without an `exp` claim never expire on the client side.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp.is_some_and(|exp| now >= exp)
    }

    /// Whether the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// The user id, from `id`, `_id`, `userId` or `sub`, first non-empty
    /// claim wins.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        [&self.id, &self.object_id, &self.user_id, &self.sub]
            .into_iter()
            .filter_map(Option::as_deref)
            .find(|id| !id.is_empty())
    }

    /// The user these claims describe.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::MissingSubject` if no user id claim is present.
    pub fn to_user(&self) -> Result<AuthUser, TokenError> {
        let id = self.subject().ok_or(TokenError::MissingSubject)?;
        Ok(AuthUser {
            id: UserId::new(id),
            email: self.email.clone(),
            name: self.name.clone(),
            is_admin: self.is_admin,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn jwt(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn test_decode_reads_claims() {
        let token = jwt(&json!({
            "id": "u1",
            "email": "emmet@bricks.example",
            "exp": 2_000_000_000
        }));
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.subject(), Some("u1"));
        assert_eq!(claims.exp, Some(2_000_000_000));
        assert!(!claims.is_admin);
    }

    #[test]
    fn test_decode_accepts_sub_claim() {
        let token = jwt(&json!({"sub": "u9"}));
        let user = TokenClaims::decode(&token).unwrap().to_user().unwrap();
        assert_eq!(user.id, UserId::new("u9"));
    }

    #[test]
    fn test_decode_accepts_several_id_claims() {
        let token = jwt(&json!({"id": "u1", "sub": "u1", "exp": 2_000_000_000}));
        let user = TokenClaims::decode(&token).unwrap().to_user().unwrap();
        assert_eq!(user.id, UserId::new("u1"));

        let token = jwt(&json!({"userId": "u2", "sub": "auth|u2"}));
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.subject(), Some("u2"));

        let token = jwt(&json!({"id": "", "_id": "u3"}));
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.subject(), Some("u3"));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(TokenClaims::decode("abc"), Err(TokenError::Malformed));
        assert_eq!(TokenClaims::decode("a.b.c.d"), Err(TokenError::Malformed));
        assert_eq!(TokenClaims::decode("a.!!!.c"), Err(TokenError::Encoding));
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode("nope"));
        assert!(matches!(
            TokenClaims::decode(&not_json),
            Err(TokenError::Claims(_))
        ));
    }

    #[test]
    fn test_expiry() {
        let token = jwt(&json!({"id": "u1", "exp": 1000}));
        let claims = TokenClaims::decode(&token).unwrap();
        assert!(claims.is_expired_at(1000));
        assert!(claims.is_expired_at(5000));
        assert!(!claims.is_expired_at(999));
        assert!(claims.is_expired());

        let no_exp = TokenClaims::decode(&jwt(&json!({"id": "u1"}))).unwrap();
        assert!(!no_exp.is_expired());
        assert!(!no_exp.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_to_user_requires_id() {
        let claims = TokenClaims::decode(&jwt(&json!({"email": "x@y.z"}))).unwrap();
        assert_eq!(claims.to_user(), Err(TokenError::MissingSubject));
    }
}
