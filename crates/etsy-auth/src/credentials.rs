//! Encrypted credential storage
//!
//! Manages a flat JSON document mapping credential keys (`api_key`,
//! `access_token`, `refresh_token`, `token_expires`, `manual_shop_id`) to
//! individually encrypted values. All writes use atomic temp-file + rename
//! to prevent corruption on crash. A tokio Mutex serializes in-process
//! access; multi-process writers are out of contract (single-writer
//! assumption).
//!
//! The master key lives in a separate `.key` file with owner-only
//! permissions where the platform supports them. It is created lazily on
//! first use and never rotated — if the key file is lost, every persisted
//! credential becomes permanently undecryptable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::encryption::{self, KEY_SIZE};
use crate::error::{Error, Result};

/// Credential key for the Etsy API key.
pub const API_KEY: &str = "api_key";
/// Credential key for the OAuth access token.
pub const ACCESS_TOKEN: &str = "access_token";
/// Credential key for the OAuth refresh token.
pub const REFRESH_TOKEN: &str = "refresh_token";
/// Credential key for the absolute token expiry (unix seconds, as string).
pub const TOKEN_EXPIRES: &str = "token_expires";
/// Credential key for a manually pinned shop id.
pub const MANUAL_SHOP_ID: &str = "manual_shop_id";

/// Environment variable that overrides the stored API key.
pub const API_KEY_ENV: &str = "ETSY_API_KEY";

const DOCUMENT_FILE: &str = "credentials.json";
const KEY_FILE: &str = ".key";

/// Encrypted-at-rest key/value store for API credentials.
///
/// The in-memory state holds ciphertexts only; values are decrypted on
/// `get`. The document on disk is the flat key→ciphertext JSON map.
pub struct CredentialStore {
    doc_path: PathBuf,
    key: [u8; KEY_SIZE],
    state: Mutex<HashMap<String, String>>,
}

impl CredentialStore {
    /// Open (or initialize) the store rooted at `dir`.
    ///
    /// Creates the directory and master key on first use. A missing
    /// document starts the store empty; a corrupt (non-JSON) document is
    /// treated as "no credentials" rather than an error.
    pub async fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;

        let key = ensure_key(&dir.join(KEY_FILE)).await?;
        let doc_path = dir.join(DOCUMENT_FILE);

        let state = if doc_path.exists() {
            let contents = tokio::fs::read_to_string(&doc_path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(doc) => {
                    debug!(path = %doc_path.display(), entries = doc.len(), "loaded credentials");
                    doc
                }
                Err(e) => {
                    warn!(path = %doc_path.display(), error = %e, "corrupt credential file, treating as empty");
                    HashMap::new()
                }
            }
        } else {
            info!(path = %doc_path.display(), "credential file not found, creating empty store");
            let empty = HashMap::new();
            write_atomic(&doc_path, &empty).await?;
            empty
        };

        Ok(Self {
            doc_path,
            key,
            state: Mutex::new(state),
        })
    }

    /// Encrypt `value` and merge it into the persisted document.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let ciphertext = encryption::encrypt(value, &self.key)?;
        let mut state = self.state.lock().await;
        state.insert(key.to_string(), ciphertext);
        write_atomic(&self.doc_path, &state).await?;
        debug!(key, "stored credential");
        Ok(())
    }

    /// Decrypt and return one credential value.
    ///
    /// An absent key returns `None`. A value that fails to decrypt is
    /// logged and also returns `None` — it never aborts access to the
    /// other keys.
    pub async fn get(&self, key: &str) -> Option<String> {
        let ciphertext = {
            let state = self.state.lock().await;
            state.get(key).cloned()
        }?;
        match encryption::decrypt(&ciphertext, &self.key) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "failed to decrypt credential, omitting");
                None
            }
        }
    }

    /// Remove a key by rewriting the document without it.
    ///
    /// Deleting an absent key is a no-op, not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.remove(key).is_some() {
            write_atomic(&self.doc_path, &state).await?;
            debug!(key, "deleted credential");
        }
        Ok(())
    }

    /// Destroy the whole credential document. The key file survives.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.clear();
        if self.doc_path.exists() {
            tokio::fs::remove_file(&self.doc_path)
                .await
                .map_err(|e| Error::Io(format!("removing credential file: {e}")))?;
        }
        info!("cleared all credentials");
        Ok(())
    }

    /// Resolve the API key: `ETSY_API_KEY` env var wins over the store.
    pub async fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.is_empty()
        {
            return Some(key);
        }
        self.get(API_KEY).await
    }

    pub async fn set_api_key(&self, api_key: &str) -> Result<()> {
        self.set(API_KEY, api_key).await
    }

    /// Manually pinned shop id, if any.
    pub async fn shop_id(&self) -> Option<String> {
        self.get(MANUAL_SHOP_ID).await
    }

    pub async fn set_shop_id(&self, shop_id: &str) -> Result<()> {
        self.set(MANUAL_SHOP_ID, shop_id).await
    }
}

/// Read the master key, creating it on first use.
///
/// The key file holds the base64 of 32 random bytes and is restricted to
/// 0600 on unix.
async fn ensure_key(path: &Path) -> Result<[u8; KEY_SIZE]> {
    if path.exists() {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Io(format!("reading key file: {e}")))?;
        let bytes = BASE64
            .decode(contents.trim())
            .map_err(|e| Error::Crypto(format!("invalid key file encoding: {e}")))?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("key file is not 32 bytes".into()))?;
        return Ok(key);
    }

    let key = encryption::generate_key();
    tokio::fs::write(path, BASE64.encode(key))
        .await
        .map_err(|e| Error::Io(format!("writing key file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting key file permissions: {e}")))?;
    }

    info!(path = %path.display(), "created new encryption key");
    Ok(key)
}

/// Write the credential document atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target, so a concurrent reader sees either the old or the new full
/// document. Sets 0600 since the file holds (encrypted) OAuth tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    Ok(())
}
