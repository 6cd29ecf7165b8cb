//! Command orchestration: the publish and download flows that wire
//! C2 (scan), C6 (relays), C7 (blobs), C8 (reconcile) and C9 (execute)
//! together behind the two operations the CLI collaborator drives.
//!
//! Kept separate from [`crate::executor`] and [`crate::reconcile`]:
//! this module stays a thin wrapper over those lower-level modules
//! rather than reimplementing their logic inline.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use nsyte_activity::ActivityLog;
use nsyte_blob::BlobClient;
use nsyte_relay::{Filter, RelayPool};
use nsyte_scan::{PathMatcher, scan_directory};
use nsyte_signer::Signer;
use nsyte_types::{
    ActionOutcome, ActivityEntry, ActivityEvent, ExecutorConfig, FileEntry, Report, RunResult, kind,
};

use crate::executor::{self, ExecutorDeps};
use crate::progress::Progress;
use crate::reconcile::{self, PresenceMap};

/// How long a subscription waits for every connected relay's `EOSE`
/// before treating the manifest set it has collected so far as
/// complete.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a publish or download run needs that isn't part of the
/// project's persisted state: the relays and blob servers to talk to,
/// and where on disk the site lives.
#[derive(Debug, Clone)]
pub struct SiteOptions {
    pub root: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub relays: Vec<String>,
    pub blob_servers: Vec<String>,
    pub purge: bool,
}

async fn record(activity: &Mutex<ActivityLog>, run_id: &str, event: ActivityEvent) {
    let entry = ActivityEntry { timestamp: Utc::now(), run_id: run_id.to_string(), event };
    activity.lock().await.record(entry);
}

/// Fetches every manifest event authored by `pubkey` from every
/// connected relay, waiting up to [`SUBSCRIBE_TIMEOUT`] for the set to
/// settle.
async fn fetch_manifest_events(relays: &RelayPool, pubkey: &str) -> Vec<nsyte_types::SignedEvent> {
    let mut inbound = relays.inbound();
    let sub_id = "nsyte-manifests";
    let filter = Filter {
        authors: Some(vec![pubkey.to_string()]),
        kinds: Some(vec![kind::MANIFEST]),
        ..Filter::default()
    };
    relays.subscribe(sub_id, vec![filter]);

    let mut events = Vec::new();
    let mut pending_eose: BTreeSet<String> = relays.relay_urls().into_iter().collect();
    let deadline = tokio::time::Instant::now() + SUBSCRIBE_TIMEOUT;

    while !pending_eose.is_empty() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, inbound.recv()).await {
            Ok(Ok((relay, nsyte_relay::RelayMessage::Event { event, .. }))) => {
                let _ = relay;
                events.push(*event);
            }
            Ok(Ok((relay, nsyte_relay::RelayMessage::Eose { .. }))) => {
                pending_eose.remove(&relay);
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => break,
        }
    }

    relays.close_subscription(sub_id);
    events
}

/// Probes every server in `servers` for every distinct hash in
/// `local`, building the presence map C8 diffs against. Probe failures are treated
/// as absence — an unreachable server simply gets an upload attempt,
/// which is the executor's retry budget to resolve.
async fn probe_presence(blob: &BlobClient, servers: &[String], local: &[FileEntry]) -> PresenceMap {
    let hashes: BTreeSet<&str> = local.iter().map(|f| f.hash.as_str()).collect();
    let mut presence = PresenceMap::new();

    for hash in hashes {
        let mut present_on = BTreeSet::new();
        for server in servers {
            if matches!(blob.probe(server, hash).await, Ok(true)) {
                present_on.insert(server.clone());
            }
        }
        if !present_on.is_empty() {
            presence.insert(hash.to_string(), present_on);
        }
    }
    presence
}

/// Runs a full publish: scan, diff against the live relay/blob-server
/// state, then drive the plan through the fan-out executor.
pub async fn publish(
    signer: &Signer,
    options: &SiteOptions,
    executor_config: &ExecutorConfig,
    progress: Arc<dyn Progress>,
    activity: Arc<Mutex<ActivityLog>>,
    run_id: String,
    cancel: CancellationToken,
) -> Result<Report> {
    record(&activity, &run_id, ActivityEvent::RunStarted).await;

    let matcher = PathMatcher::new(&options.include, &options.exclude)
        .context("failed to build include/exclude matcher")?;
    let local = scan_directory(&options.root, &matcher)
        .with_context(|| format!("failed to scan {}", options.root.display()))?;
    record(&activity, &run_id, ActivityEvent::ScanCompleted { file_count: local.len() }).await;

    let (relays, _report) = RelayPool::connect(&options.relays).await;
    let manifest_events = fetch_manifest_events(&relays, &signer.public_key()).await;
    let manifests = reconcile::latest_manifests(&manifest_events);

    let blob = BlobClient::new().context("failed to build blob-server client")?;
    let presence = probe_presence(&blob, &options.blob_servers, &local).await;

    let plan = reconcile::plan(&options.root, &local, &manifests, &presence, &options.blob_servers, options.purge);
    record(&activity, &run_id, ActivityEvent::PlanComputed {
        uploads: plan.upload_count(),
        publishes: plan.publish_count(),
        deletes: plan.delete_count(),
    })
    .await;

    let deps = ExecutorDeps {
        blob,
        relays,
        signer: signer.clone(),
        progress,
        activity: activity.clone(),
        run_id: run_id.clone(),
    };

    let report = executor::run(&plan, executor_config, &deps, cancel).await;
    deps.relays.close().await;
    deps.signer.close().await;

    let result = if report.has_failures() {
        if report.actions.iter().any(|a| matches!(a.outcome, ActionOutcome::Succeeded)) {
            RunResult::PartialFailure
        } else {
            RunResult::Failed
        }
    } else {
        RunResult::Success
    };
    record(&activity, &run_id, ActivityEvent::RunFinished { result }).await;

    Ok(report)
}

/// Downloads every file the latest manifest set for `pubkey`
/// describes into `destination`, trying each blob server in turn
/// until one serves the hash.
pub async fn download(
    pubkey: &str,
    relays: &[String],
    blob_servers: &[String],
    destination: &Path,
) -> Result<Vec<String>> {
    let (pool, _report) = RelayPool::connect(relays).await;
    let manifest_events = fetch_manifest_events(&pool, pubkey).await;
    pool.close().await;

    let manifests = reconcile::latest_manifests(&manifest_events);
    let blob = BlobClient::new().context("failed to build blob-server client")?;

    let mut written = Vec::new();
    for (path, info) in &manifests {
        let mut downloaded = None;
        for server in blob_servers {
            if let Ok(bytes) = blob.download(server, &info.hash).await {
                downloaded = Some(bytes);
                break;
            }
        }
        let Some(bytes) = downloaded else {
            anyhow::bail!("blob {} for {} not found on any configured server", info.hash, path);
        };

        let fs_path = destination.join(path.trim_start_matches('/'));
        if let Some(parent) = fs_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&fs_path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", fs_path.display()))?;
        written.push(path.clone());
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_options_are_plain_data() {
        let options = SiteOptions {
            root: PathBuf::from("/site"),
            include: vec![],
            exclude: vec![],
            relays: vec!["wss://relay.example".to_string()],
            blob_servers: vec!["https://blossom.example".to_string()],
            purge: false,
        };
        assert_eq!(options.relays.len(), 1);
    }
}
