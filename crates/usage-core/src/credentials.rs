//! Credential resolution and the in-memory credential cache.
//!
//! The secure store itself is a collaborator: the core only ever calls
//! [`CredentialStore::get`] and [`CredentialStore::clear`]. The
//! [`CredentialCache`] keeps the last token read so a normal refresh does not
//! hit the store, and is only mutated by the fetch controller.

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Environment variable that overrides file-based credential lookup.
pub const OAUTH_TOKEN_ENV_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// Credentials file relative to the home directory.
const CREDENTIALS_RELATIVE_PATH: [&str; 2] = [".claude", ".credentials.json"];

/// Narrow contract of the secure-credential store.
pub trait CredentialStore: Send + Sync {
    /// Read the current token, if any.
    fn get(&self) -> Option<String>;

    /// Drop anything the store memoized about the token.
    fn clear(&self);
}

/// Shared handle to a credential store.
pub type DynCredentialStore = Arc<dyn CredentialStore>;

/// Last token read from the store, refreshed on demand.
pub struct CredentialCache {
    store: DynCredentialStore,
    cached: Option<String>,
}

impl CredentialCache {
    pub fn new(store: DynCredentialStore) -> Self {
        Self {
            store,
            cached: None,
        }
    }

    /// Return the cached token, loading it from the store when absent.
    pub fn token(&mut self) -> Option<String> {
        if self.cached.is_none() {
            self.cached = self.load_from_store();
        }
        self.cached.clone()
    }

    /// Force a fresh read from the store, replacing any cached token.
    pub fn reload(&mut self) -> Option<String> {
        self.cached = self.load_from_store();
        self.cached.clone()
    }

    /// Drop the cached token and ask the store to forget its copy.
    pub fn invalidate(&mut self) {
        if self.cached.take().is_some() {
            debug!("Dropped cached credential");
        }
        self.store.clear();
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    fn load_from_store(&self) -> Option<String> {
        let token = self
            .store
            .get()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if token.is_none() {
            warn!("No usage API credential available");
        }
        token
    }
}

/// Token held in memory, for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
    reads: Mutex<usize>,
    clears: Mutex<usize>,
}

impl MemoryCredentialStore {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: Mutex::new(token.map(str::to_string)),
            ..Default::default()
        }
    }

    /// Replace the stored token (simulates the user re-authenticating).
    pub fn set(&self, token: Option<&str>) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = token.map(str::to_string);
        }
    }

    /// Number of `get` calls served.
    pub fn reads(&self) -> usize {
        self.reads.lock().map(|g| *g).unwrap_or(0)
    }

    /// Number of `clear` calls served.
    pub fn clears(&self) -> usize {
        self.clears.lock().map(|g| *g).unwrap_or(0)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        if let Ok(mut reads) = self.reads.lock() {
            *reads += 1;
        }
        self.token.lock().ok().and_then(|g| g.clone())
    }

    fn clear(&self) {
        if let Ok(mut clears) = self.clears.lock() {
            *clears += 1;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    claude_ai_oauth: Option<OauthSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OauthSection {
    access_token: Option<String>,
}

/// Resolves the token from the environment or the CLI credentials file.
///
/// Checks in order:
/// 1. `CLAUDE_CODE_OAUTH_TOKEN` environment variable
/// 2. `~/.claude/.credentials.json` (`claudeAiOauth.accessToken`)
///
/// The file is re-read on every `get`; `clear` never touches the file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: Option<PathBuf>,
    use_env: bool,
}

impl FileCredentialStore {
    /// Store reading the default credentials file with env override.
    pub fn new() -> Self {
        let path = dirs::home_dir().map(|home| {
            CREDENTIALS_RELATIVE_PATH
                .iter()
                .fold(home, |acc, part| acc.join(part))
        });
        Self {
            path,
            use_env: true,
        }
    }

    /// Store reading only the given file (no env override).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            use_env: false,
        }
    }

    fn token_from_env(&self) -> Option<String> {
        if !self.use_env {
            return None;
        }
        std::env::var(OAUTH_TOKEN_ENV_VAR)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    fn token_from_file(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Credentials file {} not readable: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<CredentialsFile>(&content) {
            Ok(file) => file
                .claude_ai_oauth
                .and_then(|oauth| oauth.access_token)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("Credentials file {} is malformed: {}", path.display(), e);
                None
            }
        }
    }
}

impl Default for FileCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<String> {
        self.token_from_env().or_else(|| self.token_from_file())
    }

    fn clear(&self) {
        debug!("File credential store holds no memoized token");
    }
}
