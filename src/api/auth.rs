//! Caller identity for the submission endpoint
//!
//! Who the caller is gets decided by an [`Authenticator`]; the API only checks that
//! the authenticated address is the `from` of the submission.

use crate::core::{Address, AddressError};
use axum::http::{header, HeaderMap};
use std::collections::HashMap;
use thiserror::Error;

/// Authentication failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Authentication required")]
    Missing,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Authenticated as {authenticated}, cannot send as {from}")]
    IdentityMismatch { authenticated: String, from: String },
}

/// Resolves bearer tokens to the mailbox they belong to
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<Address>;
}

/// Fixed token table from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Address>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `token -> address` map
    pub fn from_config(tokens: &HashMap<String, String>) -> Result<Self, AddressError> {
        let tokens = tokens
            .iter()
            .map(|(token, address)| Ok((token.clone(), Address::parse(address)?)))
            .collect::<Result<_, AddressError>>()?;
        Ok(Self { tokens })
    }

    pub fn insert(&mut self, token: &str, address: Address) {
        self.tokens.insert(token.to_string(), address);
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, token: &str) -> Option<Address> {
        self.tokens.get(token).cloned()
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Identity behind the request's bearer token
pub fn authenticate(auth: &dyn Authenticator, headers: &HeaderMap) -> Result<Address, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::Missing)?;
    auth.authenticate(token).ok_or(AuthError::InvalidToken)
}

/// An authenticated caller may only send as itself
pub fn check_sender(identity: &Address, from: &Address) -> Result<(), AuthError> {
    if identity != from {
        return Err(AuthError::IdentityMismatch {
            authenticated: identity.to_string(),
            from: from.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn tokens() -> StaticTokens {
        let mut tokens = StaticTokens::new();
        tokens.insert("t-alice", Address::new("alice", "a.example"));
        tokens
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_authenticate_then_check_sender() {
        let alice = Address::new("alice", "a.example");
        let auth = tokens();

        let identity = authenticate(&auth, &headers("Bearer t-alice")).unwrap();
        assert_eq!(identity, alice);
        assert_eq!(check_sender(&identity, &alice), Ok(()));
        assert!(matches!(
            check_sender(&identity, &Address::new("mallory", "a.example")),
            Err(AuthError::IdentityMismatch { .. })
        ));

        assert_eq!(
            authenticate(&auth, &HeaderMap::new()),
            Err(AuthError::Missing)
        );
        assert_eq!(
            authenticate(&auth, &headers("Bearer nope")),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_from_config() {
        let map: HashMap<String, String> =
            [("t".to_string(), "bob#b.example:5000".to_string())].into();
        let tokens = StaticTokens::from_config(&map).unwrap();
        assert_eq!(
            tokens.authenticate("t"),
            Some(Address::with_port("bob", "b.example", 5000))
        );

        let bad: HashMap<String, String> = [("t".to_string(), "nobody".to_string())].into();
        assert!(StaticTokens::from_config(&bad).is_err());
    }
}
