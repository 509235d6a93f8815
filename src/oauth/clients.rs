use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::store::mint_opaque_token;
use super::types::*;
use crate::error::{ConfigError, RegistrationError};

const CLIENTS_FILE: &str = "oauth_clients.json";

// ---------------------------------------------------------------------------
// ClientRegistry: registered applications
// ---------------------------------------------------------------------------

pub struct ClientRegistry {
    clients: Mutex<HashMap<String, OAuthClient>>,
    dynamic_registration: bool,
    persist_path: Option<PathBuf>,
}

impl ClientRegistry {
    /// Empty, memory-only registry.
    pub fn new(dynamic_registration: bool) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            dynamic_registration,
            persist_path: None,
        }
    }

    /// Load previously registered clients from `data_dir`, or start empty.
    /// New registrations are written back to the same file.
    pub fn load(data_dir: &Path, dynamic_registration: bool) -> Self {
        let path = data_dir.join(CLIENTS_FILE);
        let clients: HashMap<String, OAuthClient> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        log::info!(
            "OAuth client registry loaded: {} clients from {}",
            clients.len(),
            path.display()
        );

        Self {
            clients: Mutex::new(clients),
            dynamic_registration,
            persist_path: Some(path),
        }
    }

    /// Pre-seed static clients from a JSON array of [`ClientSeed`].
    pub fn seed_from_file(&self, path: &Path) -> Result<usize, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let seeds: Vec<ClientSeed> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        let count = seeds.len();
        for seed in seeds {
            self.seed(seed);
        }
        Ok(count)
    }

    /// Add a statically configured client. Replaces any client with the same id.
    pub fn seed(&self, seed: ClientSeed) -> OAuthClient {
        let client = OAuthClient {
            client_id: seed.client_id,
            client_name: seed.client_name,
            client_secret_hash: seed.client_secret.as_deref().map(hash_secret),
            redirect_uris: seed.redirect_uris,
            grant_types: seed.grant_types,
            response_types: seed.response_types,
            token_endpoint_auth_method: seed.token_endpoint_auth_method,
            issued_at: Utc::now(),
            secret_expires_at: seed
                .secret_expires_at
                .map(SecretExpiry::At)
                .unwrap_or(SecretExpiry::Never),
        };
        log::info!(
            "OAuth client seeded: name={} id={}",
            client.client_name,
            client.client_id
        );
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.insert(client.client_id.clone(), client.clone());
        client
    }

    pub fn dynamic_registration_enabled(&self) -> bool {
        self.dynamic_registration
    }

    pub fn get_client(&self, client_id: &str) -> Option<OAuthClient> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.get(client_id).cloned()
    }

    pub fn list_clients(&self) -> Vec<OAuthClient> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.values().cloned().collect()
    }

    /// RFC 7591 registration. Returns the client and, for confidential
    /// clients, the plaintext secret (shown once, only its hash is kept).
    pub fn register_client(
        &self,
        req: RegistrationRequest,
    ) -> Result<(OAuthClient, Option<String>), RegistrationError> {
        if !self.dynamic_registration {
            return Err(RegistrationError::Disabled);
        }
        validate_registration(&req)?;

        let secret = match req.token_endpoint_auth_method.as_str() {
            AUTH_METHOD_NONE => None,
            _ => Some(mint_opaque_token()),
        };

        let client = OAuthClient {
            client_id: uuid::Uuid::new_v4().to_string(),
            client_name: req.client_name,
            client_secret_hash: secret.as_deref().map(hash_secret),
            redirect_uris: req.redirect_uris,
            grant_types: req.grant_types,
            response_types: req.response_types,
            token_endpoint_auth_method: req.token_endpoint_auth_method,
            issued_at: Utc::now(),
            secret_expires_at: SecretExpiry::Never,
        };

        {
            let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
            clients.insert(client.client_id.clone(), client.clone());
        }
        self.save_clients();
        Ok((client, secret))
    }

    /// Check a presented secret for a confidential client. Public clients
    /// always pass.
    pub fn authenticate(&self, client: &OAuthClient, presented: Option<&str>) -> bool {
        if !client.is_confidential() {
            return true;
        }
        let (Some(expected), Some(presented)) = (client.client_secret_hash.as_deref(), presented)
        else {
            return false;
        };
        if client.secret_expires_at.is_expired_at(Utc::now()) {
            return false;
        }
        hash_secret(presented)
            .as_bytes()
            .ct_eq(expected.as_bytes())
            .into()
    }

    fn save_clients(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let json = serde_json::to_string_pretty(&*clients).unwrap_or_default();
        if let Err(e) = std::fs::write(path, json) {
            log::error!("Failed to save OAuth clients: {}", e);
        }
    }
}

fn validate_registration(req: &RegistrationRequest) -> Result<(), RegistrationError> {
    if req.client_name.trim().is_empty() {
        return Err(RegistrationError::InvalidMetadata(
            "client_name must not be empty".into(),
        ));
    }
    if req.redirect_uris.is_empty() {
        return Err(RegistrationError::InvalidMetadata(
            "at least one redirect_uri is required".into(),
        ));
    }
    for uri in &req.redirect_uris {
        let parsed = url::Url::parse(uri).map_err(|_| {
            RegistrationError::InvalidMetadata(format!("redirect_uri is not absolute: {}", uri))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.fragment().is_some() {
            return Err(RegistrationError::InvalidMetadata(format!(
                "unsupported redirect_uri: {}",
                uri
            )));
        }
    }
    if !matches!(
        req.token_endpoint_auth_method.as_str(),
        AUTH_METHOD_NONE | AUTH_METHOD_SECRET_POST | AUTH_METHOD_SECRET_BASIC
    ) {
        return Err(RegistrationError::InvalidMetadata(format!(
            "unsupported token_endpoint_auth_method: {}",
            req.token_endpoint_auth_method
        )));
    }
    if let Some(grant) = req
        .grant_types
        .iter()
        .find(|g| !matches!(g.as_str(), GRANT_AUTHORIZATION_CODE | GRANT_REFRESH_TOKEN))
    {
        return Err(RegistrationError::InvalidMetadata(format!(
            "unsupported grant_type: {}",
            grant
        )));
    }
    if req.response_types.iter().any(|r| r != "code") {
        return Err(RegistrationError::InvalidMetadata(
            "only the 'code' response_type is supported".into(),
        ));
    }
    Ok(())
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize localhost variants in redirect URIs.
/// Native clients mix `localhost` and `127.0.0.1` for the same listener.
pub(crate) fn normalize_redirect_uri(uri: &str) -> String {
    uri.replace("://localhost:", "://127.0.0.1:")
        .replace("://localhost/", "://127.0.0.1/")
}

/// Whether `redirect_uri` is one of the client's registered URIs.
pub fn is_registered_redirect(client: &OAuthClient, redirect_uri: &str) -> bool {
    let wanted = normalize_redirect_uri(redirect_uri);
    client
        .redirect_uris
        .iter()
        .any(|registered| normalize_redirect_uri(registered) == wanted)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
