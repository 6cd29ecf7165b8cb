//! Domain types shared across the nsyte workspace: events, plans,
//! executor options, reports, and the persisted project/activity
//! record shapes.
//!
//! Durations that cross the wire as milliseconds are plain `u64`
//! fields rather than `std::time::Duration` so every type here
//! round-trips through `serde_json` without a custom visitor.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One local file discovered by the scanner (C2): a unique relative
/// path, its size in bytes, and its content hash (C1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Forward-slash, leading-slash relative path, e.g. `/index.html`.
    pub path: String,
    pub size: u64,
    pub hash: String,
}

/// Reserved event kinds. Chosen to match the wire conventions this
/// system interoperates with; changing them breaks compatibility with
/// existing relays and blob servers.
pub mod kind {
    /// Maps one site path to one blob hash.
    pub const MANIFEST: u32 = 34128;
    /// Advertises the blob servers an author publishes to.
    pub const BLOB_LIST: u32 = 10063;
    /// Advertises read/write relays for an author.
    pub const RELAY_LIST: u32 = 10002;
    /// Blob-server upload/delete authorisation.
    pub const BLOB_AUTH: u32 = 24242;
    /// Remote-signer request/response (NIP-46-style transport).
    pub const REMOTE_SIGNER: u32 = 24133;
    /// NIP-09-style deletion request, used to retract a manifest once
    /// its path no longer has a local file behind it.
    pub const DELETION: u32 = 5;
}

/// Unsigned event content: what a signer is asked to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// A fully signed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl SignedEvent {
    /// First value of tag `name`, if present.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// Fields decoded from a manifest event's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFields<'a> {
    pub path: &'a str,
    pub hash: &'a str,
    pub mime: &'a str,
    pub size: u64,
}

/// Extracts `{d, x, m, size}` tags from a manifest event. Returns
/// `None` if any required tag is missing or `size` does not parse.
pub fn manifest_fields(event: &SignedEvent) -> Option<ManifestFields<'_>> {
    Some(ManifestFields {
        path: event.tag_value("d")?,
        hash: event.tag_value("x")?,
        mime: event.tag_value("m")?,
        size: event.tag_value("size")?.parse().ok()?,
    })
}

/// An ordered, deterministic plan of typed actions (C8 output).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
    /// Local source path for each hash referenced by an `UploadBlob`
    /// action. Kept out of the action itself so the plan stays a
    /// cheap, serialisable value rather than holding blob bytes.
    pub source_paths: BTreeMap<String, PathBuf>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn upload_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, PlanAction::UploadBlob { .. }))
            .count()
    }

    pub fn publish_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, PlanAction::PublishManifest { .. }))
            .count()
    }

    pub fn delete_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, PlanAction::DeleteBlob { .. } | PlanAction::DeleteManifest { .. }))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlanAction {
    UploadBlob {
        hash: String,
        servers: Vec<String>,
    },
    PublishManifest {
        path: String,
        hash: String,
        size: u64,
        mime: String,
    },
    DeleteBlob {
        hash: String,
        servers: Vec<String>,
    },
    DeleteManifest {
        path: String,
    },
}

/// Fan-out executor configuration (C9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub concurrency: usize,
    pub per_server_concurrency: usize,
    pub publish_quorum: usize,
    pub server_quorum: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
    pub fail_fast: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_server_concurrency: 2,
            publish_quorum: 1,
            server_quorum: 1,
            retry_attempts: 3,
            retry_backoff_ms: 500,
            request_timeout_ms: 30_000,
            fail_fast: false,
        }
    }
}

/// Outcome of a single plan action after execution completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Succeeded,
    QuorumFailed { required: usize, got: usize },
    Failed,
    Cancelled,
}

/// Per-action result, aggregated into a [`Report`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub action: PlanAction,
    pub succeeded_targets: Vec<String>,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub outcome: ActionOutcome,
}

/// Aggregate execution report (C9 output).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    pub actions: Vec<ActionReport>,
    pub blobs_uploaded: u64,
    pub manifests_published: u64,
    pub bytes_sent: u64,
    pub duration_ms: u64,
}

impl Report {
    /// True if any action did not reach [`ActionOutcome::Succeeded`].
    pub fn has_failures(&self) -> bool {
        self.actions
            .iter()
            .any(|a| !matches!(a.outcome, ActionOutcome::Succeeded))
    }
}

/// The error-kind taxonomy, carried alongside `anyhow` context so
/// callers can branch on meaning without string-matching display
/// text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Transient,
    AuthRequired,
    NotFound,
    Malformed,
    SignerRejected,
    SignerUnreachable,
    SignerTimeout,
    QuorumFailed,
    Cancelled,
    VaultBackendFailure,
    ConfigInvalid,
}

impl ErrorKind {
    /// Transient failures (transport, 5xx, timeout) are retried by C9
    /// within budget; everything else is fatal for that action.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// How the user asked a signer to be referenced from project state.
/// The private key itself, if any, lives only in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignerRef {
    LocalKey { pubkey: String },
    RemoteSigner { pubkey: String },
}

impl SignerRef {
    pub fn pubkey(&self) -> &str {
        match self {
            SignerRef::LocalKey { pubkey } | SignerRef::RemoteSigner { pubkey } => pubkey,
        }
    }
}

/// Publish-time flags persisted alongside the signer reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishFlags {
    pub purge: bool,
    pub fallback_relays: bool,
}

/// The project state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub signer: Option<SignerRef>,
    pub relays: Vec<String>,
    pub blob_servers: Vec<String>,
    pub profile: Option<String>,
    pub publish: PublishFlags,
    pub app_metadata: serde_json::Value,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            signer: None,
            relays: Vec::new(),
            blob_servers: Vec::new(),
            profile: None,
            publish: PublishFlags::default(),
            app_metadata: serde_json::Value::Null,
        }
    }
}

/// Tuple (public key, bundled credential blob) stored by the vault.
/// The blob is the opaque bech32-like string produced by the
/// credential codec (C11); the vault never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub pubkey: String,
    pub blob: String,
}

/// One locally-persisted activity record (A1). Independent of
/// anything printed to a terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub event: ActivityEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActivityEvent {
    RunStarted,
    ScanCompleted { file_count: usize },
    PlanComputed { uploads: usize, publishes: usize, deletes: usize },
    UploadAttempted { hash: String, server: String, attempt: u32 },
    UploadSucceeded { hash: String, server: String, duration_ms: u64 },
    UploadFailed { hash: String, server: String, class: ErrorKind, message: String },
    ManifestPublished { path: String, relay: String, duration_ms: u64 },
    ManifestRejected { path: String, relay: String, message: String },
    QuorumFailed { kind: String, required: usize, got: usize },
    RunFinished { result: RunResult },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunResult {
    Success,
    PartialFailure,
    Failed,
    Cancelled,
}

/// Environment fingerprint attached to a finished run (A5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub nsyte_version: String,
    pub os: String,
    pub arch: String,
    pub hostname: String,
}

impl EnvironmentFingerprint {
    pub fn collect() -> Self {
        Self {
            nsyte_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_counts_partition_by_action_type() {
        let plan = Plan {
            actions: vec![
                PlanAction::UploadBlob { hash: "a".into(), servers: vec!["s1".into()] },
                PlanAction::UploadBlob { hash: "b".into(), servers: vec!["s1".into()] },
                PlanAction::PublishManifest {
                    path: "/index.html".into(),
                    hash: "a".into(),
                    size: 10,
                    mime: "text/html".into(),
                },
                PlanAction::DeleteManifest { path: "/old.html".into() },
            ],
            source_paths: BTreeMap::new(),
        };
        assert_eq!(plan.upload_count(), 2);
        assert_eq!(plan.publish_count(), 1);
        assert_eq!(plan.delete_count(), 1);
        assert!(!plan.is_empty());
    }

    #[test]
    fn empty_plan_is_empty() {
        assert!(Plan::default().is_empty());
    }

    #[test]
    fn executor_config_has_documented_defaults() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.per_server_concurrency, 2);
        assert_eq!(cfg.publish_quorum, 1);
        assert_eq!(cfg.server_quorum, 1);
        assert_eq!(cfg.retry_attempts, 3);
        assert!(!cfg.fail_fast);
    }

    #[test]
    fn error_kind_retryability_matches_taxonomy() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::Malformed.is_retryable());
        assert!(!ErrorKind::SignerRejected.is_retryable());
    }

    #[test]
    fn signer_ref_pubkey_accessor_covers_both_variants() {
        let local = SignerRef::LocalKey { pubkey: "abc".into() };
        let remote = SignerRef::RemoteSigner { pubkey: "def".into() };
        assert_eq!(local.pubkey(), "abc");
        assert_eq!(remote.pubkey(), "def");
    }

    #[test]
    fn project_config_round_trips_through_json() {
        let cfg = ProjectConfig {
            signer: Some(SignerRef::LocalKey { pubkey: "abc".into() }),
            relays: vec!["wss://relay.example".into()],
            blob_servers: vec!["https://blossom.example".into()],
            profile: Some("default".into()),
            publish: PublishFlags { purge: true, fallback_relays: false },
            app_metadata: serde_json::json!({"k": "v"}),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ProjectConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn manifest_fields_extracts_required_tags() {
        let event = SignedEvent {
            id: "id".into(),
            pubkey: "pk".into(),
            created_at: 0,
            kind: kind::MANIFEST,
            tags: vec![
                vec!["d".into(), "/index.html".into()],
                vec!["x".into(), "deadbeef".into()],
                vec!["m".into(), "text/html".into()],
                vec!["size".into(), "15".into()],
            ],
            content: String::new(),
            sig: "sig".into(),
        };
        let fields = manifest_fields(&event).expect("fields present");
        assert_eq!(fields.path, "/index.html");
        assert_eq!(fields.hash, "deadbeef");
        assert_eq!(fields.size, 15);
    }

    #[test]
    fn manifest_fields_none_when_tag_missing() {
        let event = SignedEvent {
            id: "id".into(),
            pubkey: "pk".into(),
            created_at: 0,
            kind: kind::MANIFEST,
            tags: vec![vec!["d".into(), "/index.html".into()]],
            content: String::new(),
            sig: "sig".into(),
        };
        assert!(manifest_fields(&event).is_none());
    }
}
