use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::{AuthorizationCode, NewAuthorizationCode, RefreshToken};

pub const AUTH_CODE_TTL_SECS: i64 = 5 * 60; // 5 minutes
pub const REFRESH_TOKEN_TTL_SECS: i64 = 24 * 60 * 60; // 24 hours

const REFRESH_TOKENS_FILE: &str = "oauth_refresh.json";

/// Random bytes behind every code and refresh token (256 bits).
const OPAQUE_TOKEN_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// GrantStore: swappable backing storage for codes and refresh tokens
// ---------------------------------------------------------------------------

/// Key-value storage with per-entry expiry.
///
/// Expired entries are never returned. `take` removes and returns an entry in
/// one step: for any key, at most one concurrent `take` observes `Some`.
pub trait GrantStore<T>: Send + Sync {
    fn put(&self, key: String, entry: T, expires_at: DateTime<Utc>);
    fn get(&self, key: &str) -> Option<T>;
    fn delete(&self, key: &str) -> bool;
    fn take(&self, key: &str) -> Option<T>;
    /// Drop every expired entry. Returns how many were removed.
    fn purge_expired(&self) -> usize;
}

#[derive(Serialize, Deserialize)]
struct Slot<T> {
    entry: T,
    expires_at: DateTime<Utc>,
}

impl<T> Slot<T> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// In-process `GrantStore` guarded by a single mutex.
pub struct MemoryStore<T> {
    entries: Mutex<HashMap<String, Slot<T>>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force an entry to expire (test-only).
    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = entries.get_mut(key) {
            slot.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

impl<T: Clone + Send> GrantStore<T> for MemoryStore<T> {
    fn put(&self, key: String, entry: T, expires_at: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        // Lazy cleanup
        let now = Utc::now();
        entries.retain(|_, slot| slot.is_live(now));
        entries.insert(key, Slot { entry, expires_at });
    }

    fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let live = entries.get(key)?.is_live(Utc::now());
        if !live {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|slot| slot.entry.clone())
    }

    fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    fn take(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let slot = entries.remove(key)?;
        slot.is_live(Utc::now()).then_some(slot.entry)
    }

    fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, slot| slot.is_live(now));
        before - entries.len()
    }
}

/// `GrantStore` persisted as a JSON file, rewritten after every change.
///
/// Expired entries are dropped on load. Reads are served from memory.
pub struct FileStore<T> {
    inner: MemoryStore<T>,
    path: PathBuf,
}

impl<T: Serialize + DeserializeOwned> FileStore<T> {
    /// Load entries from `path`, or start empty if it is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries: HashMap<String, Slot<T>> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let now = Utc::now();
        let entries: HashMap<String, Slot<T>> = entries
            .into_iter()
            .filter(|(_, slot)| slot.is_live(now))
            .collect();

        log::info!(
            "Grant store loaded: {} live entries from {}",
            entries.len(),
            path.display()
        );

        Self {
            inner: MemoryStore {
                entries: Mutex::new(entries),
            },
            path,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn save(&self) {
        let json = {
            let entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&*entries).unwrap_or_default()
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            log::error!("Failed to save grant store {}: {}", self.path.display(), e);
        }
    }
}

impl<T: Clone + Send + Serialize + DeserializeOwned> GrantStore<T> for FileStore<T> {
    fn put(&self, key: String, entry: T, expires_at: DateTime<Utc>) {
        self.inner.put(key, entry, expires_at);
        self.save();
    }

    fn get(&self, key: &str) -> Option<T> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> bool {
        let removed = self.inner.delete(key);
        if removed {
            self.save();
        }
        removed
    }

    fn take(&self, key: &str) -> Option<T> {
        let taken = self.inner.take(key);
        if taken.is_some() {
            self.save();
        }
        taken
    }

    fn purge_expired(&self) -> usize {
        let removed = self.inner.purge_expired();
        if removed > 0 {
            self.save();
        }
        removed
    }
}

/// Mint an unpredictable, URL-safe opaque value.
pub(crate) fn mint_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Authorization codes
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuthorizationCodeStore {
    backend: Arc<dyn GrantStore<AuthorizationCode>>,
}

impl AuthorizationCodeStore {
    pub fn new(backend: Arc<dyn GrantStore<AuthorizationCode>>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::<AuthorizationCode>::new()))
    }

    /// Mint a code bound to `grant`. Valid for five minutes.
    pub fn store(&self, grant: NewAuthorizationCode) -> String {
        let code = mint_opaque_token();
        let expires_at = Utc::now() + Duration::seconds(AUTH_CODE_TTL_SECS);
        let entry = AuthorizationCode {
            code: code.clone(),
            code_challenge: grant.code_challenge,
            client_id: grant.client_id,
            scopes: grant.scopes,
            redirect_uri: grant.redirect_uri,
            subject: grant.subject,
            state: grant.state,
            expires_at,
        };
        self.backend.put(code.clone(), entry, expires_at);
        code
    }

    pub fn get(&self, code: &str) -> Option<AuthorizationCode> {
        self.backend.get(code)
    }

    /// Single-use redemption: removes the code and returns it if still live.
    pub fn redeem(&self, code: &str) -> Option<AuthorizationCode> {
        self.backend.take(code)
    }

    pub fn delete(&self, code: &str) -> bool {
        self.backend.delete(code)
    }

    pub fn purge_expired(&self) -> usize {
        self.backend.purge_expired()
    }
}

// ---------------------------------------------------------------------------
// Refresh tokens
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RefreshTokenStore {
    backend: Arc<dyn GrantStore<RefreshToken>>,
}

impl RefreshTokenStore {
    pub fn new(backend: Arc<dyn GrantStore<RefreshToken>>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::<RefreshToken>::new()))
    }

    /// Refresh tokens persisted in `<data_dir>/oauth_refresh.json`, so
    /// clients stay signed in across restarts.
    pub fn load(data_dir: &Path) -> Self {
        Self::new(Arc::new(FileStore::<RefreshToken>::load(
            data_dir.join(REFRESH_TOKENS_FILE),
        )))
    }

    /// Mint a refresh token. Valid for 24 hours.
    pub fn store(&self, subject: String, client_id: String, scopes: Vec<String>) -> RefreshToken {
        let expires_at = Utc::now() + Duration::seconds(REFRESH_TOKEN_TTL_SECS);
        let token = RefreshToken {
            token: mint_opaque_token(),
            subject,
            client_id,
            scopes,
            expires_at,
        };
        self.backend.put(token.token.clone(), token.clone(), expires_at);
        token
    }

    pub fn get(&self, token: &str) -> Option<RefreshToken> {
        self.backend.get(token)
    }

    pub fn redeem(&self, token: &str) -> Option<RefreshToken> {
        self.backend.take(token)
    }

    pub fn delete(&self, token: &str) -> bool {
        self.backend.delete(token)
    }

    pub fn purge_expired(&self) -> usize {
        self.backend.purge_expired()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn new_code(client_id: &str) -> NewAuthorizationCode {
        NewAuthorizationCode {
            code_challenge: "abc123".into(),
            client_id: client_id.into(),
            scopes: vec!["mcp".into()],
            redirect_uri: "https://cb".into(),
            subject: "alice".into(),
            state: Some("xyz".into()),
        }
    }

    #[test]
    fn memory_store_get_returns_live_entry() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.put("k".into(), 42, Utc::now() + Duration::minutes(1));
        assert_eq!(store.get("k"), Some(42));
        // get does not consume
        assert_eq!(store.get("k"), Some(42));
    }

    #[test]
    fn memory_store_hides_and_evicts_expired_entry() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.put("k".into(), 1, Utc::now() + Duration::minutes(1));
        store.backdate("k");
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn memory_store_take_is_single_use() {
        let store: MemoryStore<String> = MemoryStore::new();
        store.put("k".into(), "v".to_string(), Utc::now() + Duration::minutes(1));
        assert_eq!(store.take("k").as_deref(), Some("v"));
        assert_eq!(store.take("k"), None);
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn memory_store_take_of_expired_entry_returns_none() {
        let store: MemoryStore<u8> = MemoryStore::new();
        store.put("k".into(), 7, Utc::now() + Duration::minutes(1));
        store.backdate("k");
        assert_eq!(store.take("k"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn memory_store_purges_expired_on_put() {
        let store: MemoryStore<u8> = MemoryStore::new();
        store.put("old".into(), 1, Utc::now() + Duration::minutes(1));
        store.backdate("old");
        store.put("new".into(), 2u8, Utc::now() + Duration::minutes(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn purge_expired_counts_removed_entries() {
        let store: MemoryStore<u8> = MemoryStore::new();
        store.put("a".into(), 1, Utc::now() + Duration::minutes(1));
        store.put("b".into(), 2u8, Utc::now() + Duration::minutes(1));
        store.backdate("a");
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.get("b"), Some(2));
    }

    #[test]
    fn delete_reports_presence() {
        let store: MemoryStore<u8> = MemoryStore::new();
        store.put("k".into(), 1, Utc::now() + Duration::minutes(1));
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
    }

    #[test]
    fn concurrent_take_succeeds_exactly_once() {
        let store: Arc<MemoryStore<u32>> = Arc::new(MemoryStore::new());
        store.put("code".into(), 9, Utc::now() + Duration::minutes(1));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.take("code").is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn code_store_binds_grant_and_five_minute_ttl() {
        let codes = AuthorizationCodeStore::in_memory();
        let before = Utc::now();
        let code = codes.store(new_code("C1"));
        let after = Utc::now();

        let entry = codes.get(&code).unwrap();
        assert_eq!(entry.code, code);
        assert_eq!(entry.client_id, "C1");
        assert_eq!(entry.code_challenge, "abc123");
        assert_eq!(entry.subject, "alice");
        assert_eq!(entry.state.as_deref(), Some("xyz"));
        let ttl = Duration::seconds(AUTH_CODE_TTL_SECS);
        assert!(before + ttl <= entry.expires_at);
        assert!(entry.expires_at <= after + ttl);
    }

    #[test]
    fn codes_are_unique_and_url_safe() {
        let codes = AuthorizationCodeStore::in_memory();
        let minted: HashSet<String> = (0..100).map(|_| codes.store(new_code("C1"))).collect();
        assert_eq!(minted.len(), 100);
        assert!(minted
            .iter()
            .all(|c| c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')));
    }

    #[test]
    fn expired_code_is_not_returned() {
        let backend: Arc<MemoryStore<AuthorizationCode>> = Arc::new(MemoryStore::new());
        let codes = AuthorizationCodeStore::new(backend.clone());
        let code = codes.store(new_code("C1"));
        backend.backdate(&code);
        assert!(codes.get(&code).is_none());
        assert!(codes.redeem(&code).is_none());
    }

    #[test]
    fn file_store_survives_reload_and_drops_expired() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("grants.json");

        let store: FileStore<String> = FileStore::load(&path);
        store.put("live".into(), "a".into(), Utc::now() + Duration::minutes(5));
        store.put("stale".into(), "b".into(), Utc::now() - Duration::seconds(1));
        store.put("gone".into(), "c".into(), Utc::now() + Duration::minutes(5));
        assert_eq!(store.take("gone").as_deref(), Some("c"));

        let reloaded: FileStore<String> = FileStore::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("live").as_deref(), Some("a"));
        assert_eq!(reloaded.get("stale"), None);
        assert_eq!(reloaded.get("gone"), None);
    }

    #[test]
    fn file_store_with_corrupt_file_starts_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("grants.json");
        std::fs::write(&path, "not json").unwrap();

        let store: FileStore<String> = FileStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn refresh_tokens_persist_across_restart() {
        let dir = tempfile::TempDir::new().unwrap();

        let issued = {
            let tokens = RefreshTokenStore::load(dir.path());
            tokens.store("alice".into(), "C1".into(), vec!["mcp".into()])
        };

        let tokens = RefreshTokenStore::load(dir.path());
        let restored = tokens.get(&issued.token).unwrap();
        assert_eq!(restored.subject, "alice");
        assert_eq!(restored.client_id, "C1");
        assert_eq!(restored.scopes, vec!["mcp"]);

        // A rotation is persisted too
        assert!(tokens.redeem(&issued.token).is_some());
        let after_rotation = RefreshTokenStore::load(dir.path());
        assert!(after_rotation.get(&issued.token).is_none());
    }

    #[test]
    fn deleted_code_cannot_be_redeemed() {
        let codes = AuthorizationCodeStore::in_memory();
        let code = codes.store(new_code("C1"));
        assert!(codes.delete(&code));
        assert!(codes.get(&code).is_none());
        assert!(codes.redeem(&code).is_none());
    }

    #[test]
    fn refresh_store_rotation_primitives() {
        let tokens = RefreshTokenStore::in_memory();
        let before = Utc::now();
        let issued = tokens.store("alice".into(), "C1".into(), vec!["mcp".into()]);
        let after = Utc::now();
        let ttl = Duration::seconds(REFRESH_TOKEN_TTL_SECS);
        assert!(before + ttl <= issued.expires_at);
        assert!(issued.expires_at <= after + ttl);

        assert_eq!(tokens.get(&issued.token).unwrap().subject, "alice");
        assert!(tokens.redeem(&issued.token).is_some());
        assert!(tokens.redeem(&issued.token).is_none());

        let other = tokens.store("bob".into(), "C2".into(), vec![]);
        assert!(tokens.delete(&other.token));
        assert!(tokens.get(&other.token).is_none());
    }
}
