//! Credential vault (C5): a cross-platform secret store for signer
//! credential blobs, keyed by user public key, with a native-keychain
//! primary path, an authenticated-encryption file fallback, and a
//! one-shot migration from a legacy plaintext file.
//!
//! Backend selection tries the native keyring first and falls back to
//! the encrypted-file and legacy tiers, built on [`nsyte_encrypt`]. All
//! operations are serialised by a process-wide mutex — cross-process
//! concurrency is not guaranteed, matching a single-user CLI tool's
//! actual usage pattern.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SERVICE_NAME: &str = "nsyte-vault";
const ENCRYPTED_FILE_NAME: &str = "credentials.enc.json";
const LEGACY_FILE_NAME: &str = "credentials.json";
const ENCRYPTED_FILE_VERSION: u32 = 1;

/// Vault-level failure modes.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("no vault backend is available")]
    BackendUnavailable,
    #[error("vault is locked by another operation")]
    Locked,
    #[error("vault i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("vault data could not be (de)serialised: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Keychain,
    EncryptedFile,
    LegacyPlaintext,
}

#[derive(Debug, Serialize, Deserialize)]
struct EncryptedFileContents {
    version: u32,
    credentials: BTreeMap<String, String>,
}

impl Default for EncryptedFileContents {
    fn default() -> Self {
        Self {
            version: ENCRYPTED_FILE_VERSION,
            credentials: BTreeMap::new(),
        }
    }
}

/// Where the vault's filesystem-backed tiers live, and knobs that
/// normally come from the environment. Exists as its own type so
/// tests can point the vault at a scratch directory instead of the
/// real OS application-data directory.
pub struct VaultConfig {
    pub encrypted_file_path: PathBuf,
    pub legacy_file_path: PathBuf,
    /// `NSYTE_DISABLE_KEYCHAIN` / `NSYTE_FORCE_ENCRYPTED_STORAGE` in
    /// the caller's terms — skips the native-keychain probe entirely.
    pub force_encrypted_storage: bool,
    /// Whether to maintain the macOS listing sidecar. Real builds set
    /// this from `cfg!(target_os = "macos")`; tests can force it to
    /// exercise the sidecar path on any platform.
    pub maintain_sidecar_index: bool,
}

impl VaultConfig {
    /// Resolves the real OS application-data directory for this tool.
    pub fn from_env(force_encrypted_storage: bool) -> Result<Self, VaultError> {
        let dirs = directories::ProjectDirs::from("", "", "nsyte")
            .ok_or(VaultError::BackendUnavailable)?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            encrypted_file_path: data_dir.join(ENCRYPTED_FILE_NAME),
            legacy_file_path: data_dir.join(LEGACY_FILE_NAME),
            force_encrypted_storage,
            maintain_sidecar_index: cfg!(target_os = "macos"),
        })
    }

    /// Points both filesystem tiers at `dir`, for tests.
    pub fn for_testing(dir: &Path, force_encrypted_storage: bool, maintain_sidecar_index: bool) -> Self {
        Self {
            encrypted_file_path: dir.join(ENCRYPTED_FILE_NAME),
            legacy_file_path: dir.join(LEGACY_FILE_NAME),
            force_encrypted_storage,
            maintain_sidecar_index,
        }
    }
}

/// A handle to the credential vault. All public methods take `&self`
/// and serialise through an internal process-wide mutex, so a `Vault`
/// is safe to share across an async task set.
pub struct Vault {
    backend: Backend,
    config: VaultConfig,
    lock: Mutex<()>,
}

impl Vault {
    /// Selects a backend in priority order (native keychain, then
    /// encrypted file, then legacy plaintext) and migrates any legacy
    /// entries into the selected non-legacy backend.
    pub fn init(config: VaultConfig) -> Result<Self, VaultError> {
        let backend = if !config.force_encrypted_storage && keychain_available() {
            Backend::Keychain
        } else if encrypted_file_writable(&config.encrypted_file_path) {
            Backend::EncryptedFile
        } else {
            Backend::LegacyPlaintext
        };

        let vault = Self {
            backend,
            config,
            lock: Mutex::new(()),
        };

        if backend != Backend::LegacyPlaintext {
            vault.migrate_legacy()?;
        }

        Ok(vault)
    }

    fn migrate_legacy(&self) -> Result<(), VaultError> {
        let Some(legacy) = read_legacy_file(&self.config.legacy_file_path)? else {
            return Ok(());
        };
        if legacy.is_empty() {
            return Ok(());
        }

        let mut all_succeeded = true;
        for (pubkey, blob) in &legacy {
            if self.store_into_backend(self.backend, pubkey, blob).is_err() {
                all_succeeded = false;
            }
        }

        if all_succeeded {
            let _ = std::fs::remove_file(&self.config.legacy_file_path);
        }
        Ok(())
    }

    /// Stores `blob` for `pubkey`, overwriting any existing entry.
    pub fn store(&self, pubkey: &str, blob: &str) -> Result<(), VaultError> {
        let _guard = self.lock.lock().map_err(|_| VaultError::Locked)?;
        self.store_into_backend(self.backend, pubkey, blob)
    }

    fn store_into_backend(&self, backend: Backend, pubkey: &str, blob: &str) -> Result<(), VaultError> {
        match backend {
            Backend::Keychain => {
                keychain_set(pubkey, blob).map_err(|_| VaultError::BackendUnavailable)?;
                if self.config.maintain_sidecar_index {
                    self.encrypted_file_set(pubkey, "")?;
                }
                Ok(())
            }
            Backend::EncryptedFile => self.encrypted_file_set(pubkey, blob),
            Backend::LegacyPlaintext => self.legacy_set(pubkey, blob),
        }
    }

    /// Looks up `pubkey`'s credential blob. Prefers the native
    /// backend, falling back to the encrypted file.
    pub fn get(&self, pubkey: &str) -> Result<Option<String>, VaultError> {
        let _guard = self.lock.lock().map_err(|_| VaultError::Locked)?;
        match self.backend {
            Backend::Keychain => {
                if let Ok(Some(blob)) = keychain_get(pubkey) {
                    if !blob.is_empty() {
                        return Ok(Some(blob));
                    }
                }
                self.encrypted_file_get(pubkey)
            }
            Backend::EncryptedFile => self.encrypted_file_get(pubkey),
            Backend::LegacyPlaintext => self.legacy_get(pubkey),
        }
    }

    /// Removes `pubkey`'s credential, returning whether it was
    /// present.
    pub fn delete(&self, pubkey: &str) -> Result<bool, VaultError> {
        let _guard = self.lock.lock().map_err(|_| VaultError::Locked)?;
        match self.backend {
            Backend::Keychain => {
                let removed = keychain_delete(pubkey).unwrap_or(false);
                let sidecar_removed = self.encrypted_file_delete(pubkey)?;
                Ok(removed || sidecar_removed)
            }
            Backend::EncryptedFile => self.encrypted_file_delete(pubkey),
            Backend::LegacyPlaintext => self.legacy_delete(pubkey),
        }
    }

    /// Lists every stored public key: the union of the native
    /// backend's accounts and the encrypted-file sidecar index.
    pub fn list(&self) -> Result<Vec<String>, VaultError> {
        let _guard = self.lock.lock().map_err(|_| VaultError::Locked)?;
        let mut pubkeys: std::collections::BTreeSet<String> = match self.backend {
            Backend::Keychain => keychain_list_accounts(),
            _ => std::collections::BTreeSet::new(),
        };

        if self.backend != Backend::LegacyPlaintext {
            let contents = read_encrypted_file(&self.config.encrypted_file_path)?;
            pubkeys.extend(contents.credentials.keys().cloned());
        } else {
            let legacy = read_legacy_file(&self.config.legacy_file_path)?.unwrap_or_default();
            pubkeys.extend(legacy.into_keys());
        }

        Ok(pubkeys.into_iter().collect())
    }

    fn encrypted_file_set(&self, pubkey: &str, blob: &str) -> Result<(), VaultError> {
        let mut contents = read_encrypted_file(&self.config.encrypted_file_path)?;
        let passphrase = nsyte_encrypt::derive_vault_passphrase();
        let encrypted = nsyte_encrypt::encrypt(blob.as_bytes(), &passphrase)
            .map_err(|_| VaultError::BackendUnavailable)?;
        let encrypted = String::from_utf8(encrypted).map_err(|_| VaultError::BackendUnavailable)?;
        contents.credentials.insert(pubkey.to_string(), encrypted);
        write_encrypted_file(&self.config.encrypted_file_path, &contents)
    }

    fn encrypted_file_get(&self, pubkey: &str) -> Result<Option<String>, VaultError> {
        let contents = read_encrypted_file(&self.config.encrypted_file_path)?;
        let Some(encrypted) = contents.credentials.get(pubkey) else {
            return Ok(None);
        };
        if encrypted.is_empty() {
            return Ok(None);
        }
        let passphrase = nsyte_encrypt::derive_vault_passphrase();
        let decrypted = nsyte_encrypt::decrypt(encrypted, &passphrase)
            .map_err(|_| VaultError::BackendUnavailable)?;
        let blob = String::from_utf8(decrypted).map_err(|_| VaultError::BackendUnavailable)?;
        Ok(Some(blob))
    }

    fn encrypted_file_delete(&self, pubkey: &str) -> Result<bool, VaultError> {
        let mut contents = read_encrypted_file(&self.config.encrypted_file_path)?;
        let removed = contents.credentials.remove(pubkey).is_some();
        if removed {
            write_encrypted_file(&self.config.encrypted_file_path, &contents)?;
        }
        Ok(removed)
    }

    fn legacy_set(&self, pubkey: &str, blob: &str) -> Result<(), VaultError> {
        let mut map = read_legacy_file(&self.config.legacy_file_path)?.unwrap_or_default();
        map.insert(pubkey.to_string(), blob.to_string());
        write_legacy_file(&self.config.legacy_file_path, &map)
    }

    fn legacy_get(&self, pubkey: &str) -> Result<Option<String>, VaultError> {
        let map = read_legacy_file(&self.config.legacy_file_path)?.unwrap_or_default();
        Ok(map.get(pubkey).cloned())
    }

    fn legacy_delete(&self, pubkey: &str) -> Result<bool, VaultError> {
        let mut map = read_legacy_file(&self.config.legacy_file_path)?.unwrap_or_default();
        let removed = map.remove(pubkey).is_some();
        if removed {
            write_legacy_file(&self.config.legacy_file_path, &map)?;
        }
        Ok(removed)
    }
}

fn read_encrypted_file(path: &Path) -> Result<EncryptedFileContents, VaultError> {
    if !path.exists() {
        return Ok(EncryptedFileContents::default());
    }
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(EncryptedFileContents::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn write_encrypted_file(path: &Path, contents: &EncryptedFileContents) -> Result<(), VaultError> {
    let json = serde_json::to_string_pretty(contents)?;
    atomic_write(path, json.as_bytes())
}

fn read_legacy_file(path: &Path) -> Result<Option<BTreeMap<String, String>>, VaultError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Some(BTreeMap::new()));
    }
    Ok(Some(serde_json::from_str(&raw)?))
}

fn write_legacy_file(path: &Path, map: &BTreeMap<String, String>) -> Result<(), VaultError> {
    let json = serde_json::to_string_pretty(map)?;
    atomic_write(path, json.as_bytes())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn encrypted_file_writable(path: &Path) -> bool {
    path.parent().map(|p| p.exists() || std::fs::create_dir_all(p).is_ok()).unwrap_or(false)
}

const PROBE_ACCOUNT: &str = "__nsyte_vault_probe__";

/// Confirms the native keychain is actually reachable (e.g. a Linux
/// secret-service session bus, not merely that the `keyring` crate
/// compiled in) by round-tripping a throwaway entry.
fn keychain_available() -> bool {
    let Ok(entry) = keyring::Entry::new(SERVICE_NAME, PROBE_ACCOUNT) else {
        return false;
    };
    if entry.set_password("probe").is_err() {
        return false;
    }
    let ok = entry.get_password().is_ok();
    let _ = entry.delete_password();
    ok
}

fn keychain_set(pubkey: &str, blob: &str) -> keyring::Result<()> {
    keyring::Entry::new(SERVICE_NAME, pubkey)?.set_password(blob)
}

fn keychain_get(pubkey: &str) -> keyring::Result<Option<String>> {
    match keyring::Entry::new(SERVICE_NAME, pubkey)?.get_password() {
        Ok(blob) => Ok(Some(blob)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e),
    }
}

fn keychain_delete(pubkey: &str) -> keyring::Result<bool> {
    match keyring::Entry::new(SERVICE_NAME, pubkey)?.delete_password() {
        Ok(()) => Ok(true),
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(e) => Err(e),
    }
}

/// The native keychain search tool returns at most one match per
/// invocation, so there is no portable
/// way to enumerate accounts from the keyring crate's surface. This is
/// the half of `list()` the sidecar index exists to cover; on
/// platforms with no enumeration API this simply contributes no
/// accounts, and the encrypted-file sidecar carries the whole listing.
fn keychain_list_accounts() -> std::collections::BTreeSet<String> {
    std::collections::BTreeSet::new()
}
