//! OAuth 2.1 Authorization Server for the MCP gateway.
//!
//! Implements the MCP 2025-06-18 auth flow:
//! - RFC 9728 Protected Resource Metadata
//! - RFC 8414 Authorization Server Metadata
//! - RFC 7591 Dynamic Client Registration
//! - Authorization Code + PKCE (S256) with rotating refresh tokens
//!
//! Access tokens are stateless HMAC-signed tokens; codes and refresh tokens
//! live in an injectable [`store::GrantStore`].

pub mod authorize;
pub mod clients;
pub mod codec;
pub mod credentials;
pub mod metadata;
pub mod pkce;
pub mod registration;
pub mod service;
pub mod store;
pub mod token;
pub mod types;
pub mod validation;

use std::sync::Arc;

pub use clients::ClientRegistry;
pub use codec::{SigningKey, TokenCodec};
pub use credentials::{CredentialVerifier, HttpCredentialVerifier, StaticCredentialVerifier};
pub use pkce::{PkceVerifier, S256Verifier};
pub use service::TokenService;
pub use store::{AuthorizationCodeStore, RefreshTokenStore};
pub use validation::{require_bearer, AuthenticatedSubject};

/// Scope granted when an authorization request names none.
pub const DEFAULT_SCOPE: &str = "mcp";

/// Everything the OAuth handlers share. Cheap to clone.
#[derive(Clone)]
pub struct OAuthState {
    pub clients: Arc<ClientRegistry>,
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub pkce: Arc<dyn PkceVerifier>,
    /// Public base URL, without trailing slash.
    pub issuer: Arc<str>,
    pub default_scopes: Arc<[String]>,
}

impl OAuthState {
    /// State backed by in-memory code and refresh token stores, S256 PKCE and
    /// the default `mcp` scope.
    pub fn new(
        issuer: &str,
        clients: ClientRegistry,
        key: SigningKey,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let tokens = TokenService::new(
            AuthorizationCodeStore::in_memory(),
            RefreshTokenStore::in_memory(),
            TokenCodec::new(key),
        );
        Self {
            clients: Arc::new(clients),
            tokens: Arc::new(tokens),
            credentials,
            pkce: Arc::new(S256Verifier),
            issuer: Arc::from(issuer.trim_end_matches('/')),
            default_scopes: Arc::from(vec![DEFAULT_SCOPE.to_string()]),
        }
    }

    pub fn with_token_service(mut self, tokens: TokenService) -> Self {
        self.tokens = Arc::new(tokens);
        self
    }

    pub fn with_pkce(mut self, pkce: Arc<dyn PkceVerifier>) -> Self {
        self.pkce = pkce;
        self
    }

    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        if !scopes.is_empty() {
            self.default_scopes = Arc::from(scopes);
        }
        self
    }

    /// Drop expired codes and refresh tokens. Lookups already ignore them;
    /// this only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        self.tokens.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::store::MemoryStore;
    use crate::oauth::types::{AuthorizationCode, NewAuthorizationCode, RefreshToken};

    fn state() -> OAuthState {
        OAuthState::new(
            "https://auth.example.com/",
            ClientRegistry::new(false),
            SigningKey::new("k").unwrap(),
            Arc::new(StaticCredentialVerifier::new()),
        )
    }

    #[test]
    fn issuer_is_normalized_and_default_scope_applies() {
        let state = state();
        assert_eq!(state.issuer.as_ref(), "https://auth.example.com");
        assert_eq!(state.default_scopes.as_ref(), ["mcp".to_string()]);
    }

    #[test]
    fn default_scopes_can_be_replaced_but_not_emptied() {
        let state = state().with_default_scopes(vec!["tools".into(), "files:read".into()]);
        assert_eq!(state.default_scopes.len(), 2);

        let state = state.with_default_scopes(vec![]);
        assert_eq!(state.default_scopes.len(), 2);
    }

    #[test]
    fn purge_expired_sweeps_both_stores() {
        let codes = Arc::new(MemoryStore::<AuthorizationCode>::new());
        let refresh = Arc::new(MemoryStore::<RefreshToken>::new());
        let tokens = TokenService::new(
            AuthorizationCodeStore::new(codes.clone()),
            RefreshTokenStore::new(refresh.clone()),
            TokenCodec::new(SigningKey::new("k").unwrap()),
        );
        let state = state().with_token_service(tokens);

        let code = state.tokens.issue_auth_code(NewAuthorizationCode {
            code_challenge: "abc123".into(),
            client_id: "C1".into(),
            scopes: vec!["mcp".into()],
            redirect_uri: "https://cb".into(),
            subject: "alice".into(),
            state: None,
        });
        codes.backdate(&code);

        assert_eq!(state.purge_expired(), 1);
        assert!(codes.is_empty());
        assert!(refresh.is_empty());
    }
}
