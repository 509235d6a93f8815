//! Startup configuration, read from `OAUTH_GATEWAY_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::oauth::{
    AuthorizationCodeStore, ClientRegistry, CredentialVerifier, HttpCredentialVerifier,
    OAuthState, RefreshTokenStore, SigningKey, StaticCredentialVerifier, TokenCodec, TokenService,
};

pub const ENV_SECRET: &str = "OAUTH_GATEWAY_SECRET";
pub const ENV_DYNAMIC_REGISTRATION: &str = "OAUTH_GATEWAY_DYNAMIC_REGISTRATION";
pub const ENV_BIND: &str = "OAUTH_GATEWAY_BIND";
pub const ENV_ISSUER: &str = "OAUTH_GATEWAY_ISSUER";
pub const ENV_CLIENTS: &str = "OAUTH_GATEWAY_CLIENTS";
pub const ENV_DATA_DIR: &str = "OAUTH_GATEWAY_DATA_DIR";
pub const ENV_VERIFIER_URL: &str = "OAUTH_GATEWAY_VERIFIER_URL";
pub const ENV_VERIFIER_TIMEOUT: &str = "OAUTH_GATEWAY_VERIFIER_TIMEOUT_SECS";
pub const ENV_USERS: &str = "OAUTH_GATEWAY_USERS";

const DEFAULT_BIND: &str = "127.0.0.1:9600";
const DEFAULT_VERIFIER_TIMEOUT_SECS: u64 = 10;

#[derive(Clone)]
pub struct GatewayConfig {
    secret: String,
    pub dynamic_registration: bool,
    pub bind: SocketAddr,
    pub issuer: String,
    pub clients_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub verifier_url: Option<String>,
    pub verifier_timeout: Duration,
    pub users_file: Option<PathBuf>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("secret", &"<redacted>")
            .field("dynamic_registration", &self.dynamic_registration)
            .field("bind", &self.bind)
            .field("issuer", &self.issuer)
            .field("clients_file", &self.clients_file)
            .field("data_dir", &self.data_dir)
            .field("verifier_url", &self.verifier_url)
            .field("verifier_timeout", &self.verifier_timeout)
            .field("users_file", &self.users_file)
            .finish()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let secret = var(ENV_SECRET).ok_or(ConfigError::MissingSecret)?;

        let dynamic_registration = var(ENV_DYNAMIC_REGISTRATION)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let bind_raw = var(ENV_BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_raw.clone()))?;

        let issuer = var(ENV_ISSUER)
            .unwrap_or_else(|| format!("http://{}", bind))
            .trim_end_matches('/')
            .to_string();

        let verifier_timeout = match var(ENV_VERIFIER_TIMEOUT) {
            Some(raw) => raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                ConfigError::Verifier(format!("{} must be whole seconds, got '{}'", ENV_VERIFIER_TIMEOUT, raw))
            })?,
            None => Duration::from_secs(DEFAULT_VERIFIER_TIMEOUT_SECS),
        };

        Ok(Self {
            secret,
            dynamic_registration,
            bind,
            issuer,
            clients_file: var(ENV_CLIENTS).map(PathBuf::from),
            data_dir: var(ENV_DATA_DIR).map(PathBuf::from),
            verifier_url: var(ENV_VERIFIER_URL),
            verifier_timeout,
            users_file: var(ENV_USERS).map(PathBuf::from),
        })
    }

    pub fn signing_key(&self) -> Result<SigningKey, ConfigError> {
        SigningKey::new(self.secret.as_bytes())
    }

    /// Client registry: persisted registrations from `data_dir` (if set),
    /// plus the static seed file.
    pub fn client_registry(&self) -> Result<ClientRegistry, ConfigError> {
        let registry = match &self.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|source| ConfigError::Read {
                    path: dir.display().to_string(),
                    source,
                })?;
                ClientRegistry::load(dir, self.dynamic_registration)
            }
            None => ClientRegistry::new(self.dynamic_registration),
        };
        if let Some(path) = &self.clients_file {
            let seeded = registry.seed_from_file(path)?;
            log::info!("Seeded {} static OAuth clients from {}", seeded, path.display());
        }
        Ok(registry)
    }

    pub fn credential_verifier(&self) -> Result<Arc<dyn CredentialVerifier>, ConfigError> {
        if let Some(url) = &self.verifier_url {
            log::info!(
                "Credential verification delegated to {} (timeout {:?})",
                url,
                self.verifier_timeout
            );
            return Ok(Arc::new(HttpCredentialVerifier::new(url.clone(), self.verifier_timeout)?));
        }
        if let Some(path) = &self.users_file {
            let verifier = StaticCredentialVerifier::from_file(path)?;
            log::info!("Loaded {} static users from {}", verifier.len(), path.display());
            return Ok(Arc::new(verifier));
        }
        log::warn!(
            "Neither {} nor {} is set; every login will be rejected",
            ENV_VERIFIER_URL,
            ENV_USERS
        );
        Ok(Arc::new(StaticCredentialVerifier::new()))
    }

    /// Assemble the shared OAuth state. Fails on anything that would make the
    /// server unusable.
    pub fn build_state(&self) -> Result<OAuthState, ConfigError> {
        let key = self.signing_key()?;
        let clients = self.client_registry()?;
        let credentials = self.credential_verifier()?;
        let state = OAuthState::new(&self.issuer, clients, key.clone(), credentials);

        // Refresh tokens outlive a restart when there is somewhere to keep them
        Ok(match &self.data_dir {
            Some(dir) => state.with_token_service(TokenService::new(
                AuthorizationCodeStore::in_memory(),
                RefreshTokenStore::load(dir),
                TokenCodec::new(key),
            )),
            None => state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_secret_is_fatal() {
        let err = GatewayConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret));

        let err = GatewayConfig::from_lookup(lookup(&[(ENV_SECRET, "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret));
    }

    #[test]
    fn defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[(ENV_SECRET, "s3cret")])).unwrap();
        assert!(!config.dynamic_registration);
        assert_eq!(config.bind.to_string(), "127.0.0.1:9600");
        assert_eq!(config.issuer, "http://127.0.0.1:9600");
        assert_eq!(config.verifier_timeout, Duration::from_secs(10));
        assert!(config.clients_file.is_none());
        assert!(config.data_dir.is_none());
        assert!(config.verifier_url.is_none());
    }

    #[test]
    fn dynamic_registration_requires_explicit_opt_in() {
        for (raw, expected) in [("true", true), ("1", true), ("YES", true), ("false", false), ("0", false), ("nope", false)] {
            let config = GatewayConfig::from_lookup(lookup(&[
                (ENV_SECRET, "s3cret"),
                (ENV_DYNAMIC_REGISTRATION, raw),
            ]))
            .unwrap();
            assert_eq!(config.dynamic_registration, expected, "value {}", raw);
        }
    }

    #[test]
    fn issuer_trailing_slash_is_stripped() {
        let config = GatewayConfig::from_lookup(lookup(&[
            (ENV_SECRET, "s3cret"),
            (ENV_ISSUER, "https://auth.example.com/"),
        ]))
        .unwrap();
        assert_eq!(config.issuer, "https://auth.example.com");
    }

    #[test]
    fn bad_bind_and_timeout_are_rejected() {
        let err = GatewayConfig::from_lookup(lookup(&[(ENV_SECRET, "s"), (ENV_BIND, "nowhere")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBind(_)));

        let err = GatewayConfig::from_lookup(lookup(&[(ENV_SECRET, "s"), (ENV_VERIFIER_TIMEOUT, "ten")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Verifier(_)));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let config = GatewayConfig::from_lookup(lookup(&[(ENV_SECRET, "top-secret-value")])).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("top-secret-value"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn build_state_seeds_clients_and_persists_registrations() {
        let dir = tempfile::TempDir::new().unwrap();
        let seed_path = dir.path().join("clients.json");
        std::fs::write(
            &seed_path,
            r#"[{"client_id": "C1", "client_name": "Claude", "redirect_uris": ["https://cb"]}]"#,
        )
        .unwrap();
        let data_dir = dir.path().join("data");

        let config = GatewayConfig::from_lookup(lookup(&[
            (ENV_SECRET, "s3cret"),
            (ENV_DYNAMIC_REGISTRATION, "true"),
            (ENV_CLIENTS, seed_path.to_str().unwrap()),
            (ENV_DATA_DIR, data_dir.to_str().unwrap()),
        ]))
        .unwrap();

        let state = config.build_state().unwrap();
        assert_eq!(state.issuer.as_ref(), "http://127.0.0.1:9600");
        assert!(state.clients.dynamic_registration_enabled());
        let client = state.clients.get_client("C1").unwrap();
        assert_eq!(client.client_name, "Claude");
        assert!(data_dir.is_dir());
    }

    #[test]
    fn refresh_tokens_survive_restart() {
        use crate::oauth::types::NewAuthorizationCode;

        let dir = tempfile::TempDir::new().unwrap();
        let seed_path = dir.path().join("clients.json");
        std::fs::write(
            &seed_path,
            r#"[{"client_id": "C1", "client_name": "Claude", "redirect_uris": ["https://cb"]}]"#,
        )
        .unwrap();
        let data_dir = dir.path().join("data");
        let config = GatewayConfig::from_lookup(lookup(&[
            (ENV_SECRET, "s3cret"),
            (ENV_CLIENTS, seed_path.to_str().unwrap()),
            (ENV_DATA_DIR, data_dir.to_str().unwrap()),
        ]))
        .unwrap();

        let first = config.build_state().unwrap();
        let client = first.clients.get_client("C1").unwrap();
        let code = first.tokens.issue_auth_code(NewAuthorizationCode {
            code_challenge: "challenge".into(),
            client_id: "C1".into(),
            scopes: vec!["mcp".into()],
            redirect_uri: "https://cb".into(),
            subject: "alice".into(),
            state: None,
        });
        let issued = first.tokens.exchange_code(&client, &code, Some("https://cb")).unwrap();
        drop(first);

        let second = config.build_state().unwrap();
        let rotated = second
            .tokens
            .refresh(&client, &issued.refresh_token, None)
            .unwrap();
        assert_ne!(rotated.refresh_token, issued.refresh_token);
        assert!(second.tokens.verify_access_token(&rotated.access_token).is_ok());

        // The rotated-out token is gone after another restart as well
        let third = config.build_state().unwrap();
        assert!(third.tokens.refresh(&client, &issued.refresh_token, None).is_err());
        assert!(third.tokens.refresh(&client, &rotated.refresh_token, None).is_ok());
    }

    #[test]
    fn without_data_dir_refresh_tokens_are_not_persisted() {
        let config = GatewayConfig::from_lookup(lookup(&[(ENV_SECRET, "s3cret")])).unwrap();
        assert!(config.data_dir.is_none());
        let state = config.build_state().unwrap();
        assert_eq!(state.purge_expired(), 0);
    }

    #[test]
    fn unreadable_seed_file_is_fatal() {
        let config = GatewayConfig::from_lookup(lookup(&[
            (ENV_SECRET, "s3cret"),
            (ENV_CLIENTS, "/definitely/not/here.json"),
        ]))
        .unwrap();
        assert!(matches!(config.build_state(), Err(ConfigError::Read { .. })));
    }
}
