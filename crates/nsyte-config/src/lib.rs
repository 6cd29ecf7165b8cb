//! Project state persistence and environment variable overrides (A2).
//!
//! The project file lives at `<project>/<config-dir>/config.json`.
//! Writes are atomic: a temp file is written and fsynced, then renamed
//! into place, then the parent directory is best-effort fsynced — the
//! same discipline this workspace uses for other on-disk state, so a
//! crash mid-write can never leave a half-written `config.json` behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nsyte_types::ProjectConfig;

/// Directory name nested under the project root that holds persisted
/// state: `config.json`, the migration marker, etc.
pub const CONFIG_DIR: &str = ".nsyte";
pub const CONFIG_FILE: &str = "config.json";
pub const MIGRATION_MARKER_FILE: &str = "vault-migrated";

pub fn config_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR)
}

pub fn config_path(project_dir: &Path) -> PathBuf {
    config_dir(project_dir).join(CONFIG_FILE)
}

pub fn migration_marker_path(project_dir: &Path) -> PathBuf {
    config_dir(project_dir).join(MIGRATION_MARKER_FILE)
}

/// Loads the project config, returning `None` if it has never been
/// created (callers should treat that as "run `init` first", not as an
/// error — only a malformed existing file is `ConfigInvalid`).
pub fn load(project_dir: &Path) -> Result<Option<ProjectConfig>> {
    let path = config_path(project_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read project config {}", path.display()))?;
    let config: ProjectConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse project config {}", path.display()))?;
    Ok(Some(config))
}

/// Persists `config` atomically, creating the config directory if
/// needed.
pub fn save(project_dir: &Path, config: &ProjectConfig) -> Result<()> {
    let dir = config_dir(project_dir);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config dir {}", dir.display()))?;

    let path = config_path(project_dir);
    atomic_write_json(&path, config)
}

/// True once the legacy-vault migration has completed for this
/// project and must not be re-run.
pub fn migration_already_ran(project_dir: &Path) -> bool {
    migration_marker_path(project_dir).exists()
}

/// Writes the empty migration completion marker.
pub fn mark_migration_complete(project_dir: &Path) -> Result<()> {
    let dir = config_dir(project_dir);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config dir {}", dir.display()))?;
    let path = migration_marker_path(project_dir);
    fs::write(&path, b"")
        .with_context(|| format!("failed to write migration marker {}", path.display()))
}

/// The two vault backend overrides and the log level, resolved once at
/// startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub force_encrypted_storage: bool,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    None,
}

impl LogLevel {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "none" => Some(LogLevel::None),
            _ => None,
        }
    }

    /// Rank for comparisons: lower means more verbose.
    fn rank(self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
            LogLevel::None => 4,
        }
    }

    /// Whether a message at `message_level` should be forwarded given
    /// this minimum level.
    pub fn allows(self, message_level: LogLevel) -> bool {
        message_level.rank() >= self.rank()
    }
}

impl EnvOverrides {
    /// `NSYTE_DISABLE_KEYCHAIN` and `NSYTE_FORCE_ENCRYPTED_STORAGE` are
    /// treated as synonyms: either one forces the vault straight to
    /// its encrypted-file backend.
    pub fn from_env() -> Self {
        let truthy = |name: &str| {
            std::env::var(name)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false)
        };

        let force_encrypted_storage =
            truthy("NSYTE_DISABLE_KEYCHAIN") || truthy("NSYTE_FORCE_ENCRYPTED_STORAGE");

        let log_level = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::from_str(&v))
            .unwrap_or_default();

        Self { force_encrypted_storage, log_level }
    }
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).context("failed to serialize project config")?;

    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        std::io::Write::write_all(&mut f, &data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).with_context(|| {
        format!("failed to rename tmp file {} to {}", tmp.display(), path.display())
    })?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsyte_types::SignerRef;

    #[test]
    fn load_returns_none_when_missing() {
        let td = tempfile::tempdir().expect("tempdir");
        assert!(load(td.path()).expect("load").is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let td = tempfile::tempdir().expect("tempdir");
        let mut config = ProjectConfig::default();
        config.relays.push("wss://relay.example".into());
        config.signer = Some(SignerRef::LocalKey { pubkey: "abc".into() });

        save(td.path(), &config).expect("save");
        let loaded = load(td.path()).expect("load").expect("exists");

        assert_eq!(loaded, config);
    }

    #[test]
    fn save_never_leaves_tmp_file_behind() {
        let td = tempfile::tempdir().expect("tempdir");
        save(td.path(), &ProjectConfig::default()).expect("save");
        let tmp = config_path(td.path()).with_extension("tmp");
        assert!(!tmp.exists());
    }

    #[test]
    fn load_fails_on_malformed_json() {
        let td = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(config_dir(td.path())).expect("mkdir");
        fs::write(config_path(td.path()), "{not-json").expect("write");

        let err = load(td.path()).expect_err("must fail");
        assert!(format!("{err:#}").contains("failed to parse project config"));
    }

    #[test]
    fn migration_marker_round_trips() {
        let td = tempfile::tempdir().expect("tempdir");
        assert!(!migration_already_ran(td.path()));
        mark_migration_complete(td.path()).expect("mark");
        assert!(migration_already_ran(td.path()));
    }

    #[test]
    fn env_overrides_disable_keychain_and_force_encrypted_are_synonyms() {
        temp_env::with_vars(
            [("NSYTE_DISABLE_KEYCHAIN", Some("true")), ("NSYTE_FORCE_ENCRYPTED_STORAGE", None)],
            || {
                assert!(EnvOverrides::from_env().force_encrypted_storage);
            },
        );
        temp_env::with_vars(
            [("NSYTE_DISABLE_KEYCHAIN", None), ("NSYTE_FORCE_ENCRYPTED_STORAGE", Some("1"))],
            || {
                assert!(EnvOverrides::from_env().force_encrypted_storage);
            },
        );
    }

    #[test]
    fn log_level_parses_from_env() {
        temp_env::with_var("LOG_LEVEL", Some("debug"), || {
            assert_eq!(EnvOverrides::from_env().log_level, LogLevel::Debug);
        });
    }

    #[test]
    fn log_level_allows_respects_minimum() {
        assert!(LogLevel::Info.allows(LogLevel::Warn));
        assert!(!LogLevel::Warn.allows(LogLevel::Info));
        assert!(!LogLevel::None.allows(LogLevel::Error));
    }
}
