//! Grant logic behind the token endpoint, independent of HTTP.

use super::codec::{TokenCodec, ACCESS_TOKEN_TTL_SECS};
use super::store::{AuthorizationCodeStore, RefreshTokenStore};
use super::types::{AccessClaims, NewAuthorizationCode, OAuthClient, TokenResponse};
use crate::error::{GrantError, TokenError};

pub struct TokenService {
    codes: AuthorizationCodeStore,
    refresh_tokens: RefreshTokenStore,
    codec: TokenCodec,
}

impl TokenService {
    pub fn new(
        codes: AuthorizationCodeStore,
        refresh_tokens: RefreshTokenStore,
        codec: TokenCodec,
    ) -> Self {
        Self {
            codes,
            refresh_tokens,
            codec,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    // ── Authorization Codes ──────────────────────────────────────

    /// Mint a single-use code after a successful login.
    pub fn issue_auth_code(&self, grant: NewAuthorizationCode) -> String {
        log::info!(
            "AUDIT code_issued client={} subject={} scopes={}",
            grant.client_id,
            grant.subject,
            grant.scopes.join(" ")
        );
        self.codes.store(grant)
    }

    /// PKCE challenge bound to `code`, for the verifier check that runs
    /// before the exchange. Does not consume the code.
    pub fn code_challenge(&self, code: &str) -> Option<String> {
        self.codes.get(code).map(|c| c.code_challenge)
    }

    /// `authorization_code` grant. PKCE must already have been checked by the
    /// caller against [`Self::code_challenge`].
    pub fn exchange_code(
        &self,
        client: &OAuthClient,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenResponse, GrantError> {
        let pending = self
            .codes
            .get(code)
            .ok_or_else(|| GrantError::InvalidGrant("code unknown, expired or already used".into()))?;

        if pending.client_id != client.client_id {
            return Err(GrantError::InvalidGrant(format!(
                "code issued to client {} presented by {}",
                pending.client_id, client.client_id
            )));
        }
        // Exact match against the value bound at issuance (RFC 6749 §4.1.3)
        if let Some(uri) = redirect_uri {
            if uri != pending.redirect_uri {
                return Err(GrantError::InvalidGrant(format!(
                    "redirect_uri {} does not match {}",
                    uri, pending.redirect_uri
                )));
            }
        }

        // Only one concurrent redemption can take the code
        let redeemed = self
            .codes
            .redeem(code)
            .ok_or_else(|| GrantError::InvalidGrant("code redeemed concurrently".into()))?;

        log::info!(
            "AUDIT code_redeemed client={} subject={}",
            redeemed.client_id,
            redeemed.subject
        );
        Ok(self.mint_pair(redeemed.subject, redeemed.client_id, redeemed.scopes.clone(), redeemed.scopes))
    }

    // ── Refresh Tokens ───────────────────────────────────────────

    /// `refresh_token` grant with rotation. Requested scopes may narrow the
    /// original grant but never widen it.
    pub fn refresh(
        &self,
        client: &OAuthClient,
        refresh_token: &str,
        requested_scopes: Option<Vec<String>>,
    ) -> Result<TokenResponse, GrantError> {
        let current = self
            .refresh_tokens
            .get(refresh_token)
            .ok_or_else(|| GrantError::InvalidGrant("refresh token unknown, expired or rotated".into()))?;

        if current.client_id != client.client_id {
            return Err(GrantError::InvalidGrant(format!(
                "refresh token of client {} (subject {}) presented by {}",
                current.client_id, current.subject, client.client_id
            )));
        }

        let effective = match requested_scopes {
            Some(requested) if !requested.is_empty() => {
                if let Some(extra) = requested.iter().find(|s| !current.scopes.contains(s)) {
                    return Err(GrantError::InvalidScope(format!(
                        "scope '{}' not in original grant for subject {}",
                        extra, current.subject
                    )));
                }
                requested
            }
            _ => current.scopes.clone(),
        };

        let redeemed = self
            .refresh_tokens
            .redeem(refresh_token)
            .ok_or_else(|| GrantError::InvalidGrant("refresh token redeemed concurrently".into()))?;

        log::info!(
            "AUDIT refresh_rotated client={} subject={}",
            redeemed.client_id,
            redeemed.subject
        );
        Ok(self.mint_pair(redeemed.subject, redeemed.client_id, effective, redeemed.scopes))
    }

    /// Drop expired codes and refresh tokens from both stores.
    pub fn purge_expired(&self) -> usize {
        let removed = self.codes.purge_expired() + self.refresh_tokens.purge_expired();
        if removed > 0 {
            log::debug!("OAuth grant stores purged {} expired entries", removed);
        }
        removed
    }

    // ── Access Tokens ────────────────────────────────────────────

    /// Stateless check of a bearer token: signature and expiry only.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.codec.verify(token)
    }

    /// Access token carries `access_scopes`; the new refresh token keeps the
    /// full `grant_scopes` so a later refresh can widen back to them.
    fn mint_pair(
        &self,
        subject: String,
        client_id: String,
        access_scopes: Vec<String>,
        grant_scopes: Vec<String>,
    ) -> TokenResponse {
        let access_token = self
            .codec
            .sign(&subject, &client_id, &access_scopes, ACCESS_TOKEN_TTL_SECS);
        let refresh = self.refresh_tokens.store(subject, client_id, grant_scopes);

        TokenResponse {
            access_token,
            token_type: "bearer".into(),
            expires_in: ACCESS_TOKEN_TTL_SECS,
            refresh_token: refresh.token,
            scope: access_scopes.join(" "),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
