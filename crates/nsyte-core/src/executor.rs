//! Fan-out executor (C9): drives a [`Plan`] to completion against the
//! blob servers and relays it names, honouring the concurrency,
//! retry, and quorum options in [`ExecutorConfig`].
//!
//! Bounded concurrency is two global [`Semaphore`]s (the `concurrency`
//! limit and a small dedicated pool for large bodies) plus one
//! per-server `Semaphore`, built on `tokio::sync::Semaphore` and
//! `futures_util::stream::buffer_unordered` since every wait here must
//! be a cancellable `.await`, not a blocking thread join.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use nsyte_activity::ActivityLog;
use nsyte_blob::{BlobClient, BlobError};
use nsyte_events::{BlobAuthAction, blob_auth_draft, manifest_draft};
use nsyte_relay::RelayPool;
use nsyte_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay, sleep_cancellable};
use nsyte_signer::Signer;
use nsyte_types::{
    ActionOutcome, ActionReport, ActivityEntry, ActivityEvent, ErrorKind, ExecutorConfig, Plan,
    PlanAction, Report,
};

use crate::progress::Progress;

/// Bodies at or above this size take a slot from the dedicated large-body
/// semaphore in addition to the global one.
const LARGE_UPLOAD_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;
const LARGE_UPLOAD_SLOTS: usize = 2;
/// Blob-authorisation events are minted well inside the one-hour
/// ceiling `nsyte_events::blob_auth_expiration_valid` enforces.
const AUTH_EXPIRATION_SECS: i64 = 300;

/// The resources a run needs that outlive any single action: the
/// blob client, the connected relay pool, the signer, and the
/// reporting/logging sinks. Borrowed for the duration of [`run`].
pub struct ExecutorDeps {
    pub blob: BlobClient,
    pub relays: RelayPool,
    pub signer: Signer,
    pub progress: std::sync::Arc<dyn Progress>,
    pub activity: std::sync::Arc<Mutex<ActivityLog>>,
    pub run_id: String,
}

/// Runs every action in `plan` to completion (or cancellation),
/// respecting the ordering guarantee from: uploads before
/// the manifests that depend on them, deletes only after every
/// publish has been attempted.
pub async fn run(plan: &Plan, config: &ExecutorConfig, deps: &ExecutorDeps, cancel: CancellationToken) -> Report {
    let started = Instant::now();
    let cancel = cancel.child_token();
    deps.progress.run_started(plan.actions.len());

    let retry_cfg = RetryStrategyConfig {
        strategy: RetryStrategyType::Exponential,
        max_attempts: config.retry_attempts,
        base_delay: std::time::Duration::from_millis(config.retry_backoff_ms),
        max_delay: std::time::Duration::from_secs(30),
        jitter: 0.2,
    };

    let global = Semaphore::new(config.concurrency.max(1));
    let large = Semaphore::new(LARGE_UPLOAD_SLOTS);
    let per_server = build_per_server_semaphores(plan, config);

    let uploads: Vec<&PlanAction> =
        plan.actions.iter().filter(|a| matches!(a, PlanAction::UploadBlob { .. })).collect();
    let publishes: Vec<&PlanAction> =
        plan.actions.iter().filter(|a| matches!(a, PlanAction::PublishManifest { .. })).collect();
    let delete_blobs: Vec<&PlanAction> =
        plan.actions.iter().filter(|a| matches!(a, PlanAction::DeleteBlob { .. })).collect();
    let delete_manifests: Vec<&PlanAction> =
        plan.actions.iter().filter(|a| matches!(a, PlanAction::DeleteManifest { .. })).collect();

    let mut reports = Vec::new();
    let mut hash_quorum: BTreeMap<String, bool> = BTreeMap::new();
    let mut bytes_sent = 0u64;
    let mut blobs_uploaded = 0u64;
    let mut manifests_published = 0u64;

    // Phase 1: uploads. Independent of one another, so they run with
    // full global concurrency.
    let upload_results = stream::iter(uploads.into_iter().map(|action| {
        run_upload_action(action, plan, config, &retry_cfg, &global, &large, &per_server, deps, &cancel)
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    for (hash, report, sent) in upload_results {
        hash_quorum.insert(hash, matches!(report.outcome, ActionOutcome::Succeeded));
        if matches!(report.outcome, ActionOutcome::Succeeded) {
            blobs_uploaded += 1;
        }
        bytes_sent += sent;
        if config.fail_fast && matches!(report.outcome, ActionOutcome::Failed) {
            cancel.cancel();
        }
        reports.push(report);
    }

    // Phase 2: manifests, gated on the blob they reference having
    // reached server quorum.
    let publish_results = stream::iter(publishes.into_iter().map(|action| {
        run_publish_action(action, config, &retry_cfg, &global, &hash_quorum, deps, &cancel)
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    for report in publish_results {
        if matches!(report.outcome, ActionOutcome::Succeeded) {
            manifests_published += 1;
        }
        if config.fail_fast && matches!(report.outcome, ActionOutcome::Failed) {
            cancel.cancel();
        }
        reports.push(report);
    }

    // Phase 3: deletes. Run only once every publish above has been
    // attempted, so a purge never removes a blob a manifest still
    // references mid-run.
    let delete_blob_results = stream::iter(delete_blobs.into_iter().map(|action| {
        run_delete_blob_action(action, config, &retry_cfg, &global, &per_server, deps, &cancel)
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect::<Vec<_>>()
    .await;
    reports.extend(delete_blob_results);

    let delete_manifest_results = stream::iter(delete_manifests.into_iter().map(|action| {
        run_delete_manifest_action(action, config, &retry_cfg, &global, deps, &cancel)
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect::<Vec<_>>()
    .await;
    reports.extend(delete_manifest_results);

    let report = Report {
        actions: reports,
        blobs_uploaded,
        manifests_published,
        bytes_sent,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    deps.progress.run_finished(report.blobs_uploaded, report.manifests_published, report.has_failures());
    report
}

fn build_per_server_semaphores(plan: &Plan, config: &ExecutorConfig) -> BTreeMap<String, Semaphore> {
    let mut per_server = BTreeMap::new();
    for action in &plan.actions {
        let servers: &[String] = match action {
            PlanAction::UploadBlob { servers, .. } | PlanAction::DeleteBlob { servers, .. } => servers,
            _ => continue,
        };
        for server in servers {
            per_server
                .entry(server.clone())
                .or_insert_with(|| Semaphore::new(config.per_server_concurrency.max(1)));
        }
    }
    per_server
}

async fn record_activity(deps: &ExecutorDeps, event: ActivityEvent) {
    let entry = ActivityEntry { timestamp: Utc::now(), run_id: deps.run_id.clone(), event };
    deps.activity.lock().await.record(entry);
}

fn classify_blob_error(err: &BlobError) -> (ErrorKind, String) {
    let kind = if err.is_auth_required() {
        ErrorKind::AuthRequired
    } else if matches!(err, BlobError::NotFound) {
        ErrorKind::NotFound
    } else if err.is_retryable() {
        ErrorKind::Transient
    } else {
        ErrorKind::Malformed
    };
    (kind, err.to_string())
}

async fn run_upload_action(
    action: &PlanAction,
    plan: &Plan,
    config: &ExecutorConfig,
    retry_cfg: &RetryStrategyConfig,
    global: &Semaphore,
    large: &Semaphore,
    per_server: &BTreeMap<String, Semaphore>,
    deps: &ExecutorDeps,
    cancel: &CancellationToken,
) -> (String, ActionReport, u64) {
    let PlanAction::UploadBlob { hash, servers } = action else {
        unreachable!("caller filters to UploadBlob actions")
    };
    let start = Instant::now();
    let Ok(_global_permit) = global.acquire().await else {
        return failed_report(action, start, "executor shutting down".to_string());
    };

    let Some(source_path) = plan.source_paths.get(hash) else {
        return (
            hash.clone(),
            failed_action_report(action, start, "no local source path recorded for this hash".to_string()),
            0,
        );
    };

    let body = match tokio::fs::read(source_path).await {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            return (
                hash.clone(),
                failed_action_report(action, start, format!("failed to read {}: {e}", source_path.display())),
                0,
            );
        }
    };

    let _large_permit = if body.len() as u64 >= LARGE_UPLOAD_THRESHOLD_BYTES {
        large.acquire().await.ok()
    } else {
        None
    };

    let per_server_results = stream::iter(servers.iter().map(|server| {
        upload_to_server(hash, server, body.clone(), config, retry_cfg, per_server.get(server), deps, cancel)
    }))
    .buffer_unordered(servers.len().max(1))
    .collect::<Vec<_>>()
    .await;

    let mut succeeded = Vec::new();
    let mut attempts = 0u32;
    let mut last_error = None;
    for (server, ok, server_attempts, error) in per_server_results {
        attempts = attempts.max(server_attempts);
        if ok {
            succeeded.push(server);
        } else if let Some(e) = error {
            last_error = Some(e);
        }
    }

    let outcome = if cancel.is_cancelled() && succeeded.len() < config.server_quorum {
        ActionOutcome::Cancelled
    } else if succeeded.len() >= config.server_quorum {
        ActionOutcome::Succeeded
    } else {
        ActionOutcome::QuorumFailed { required: config.server_quorum, got: succeeded.len() }
    };

    let bytes_sent = if matches!(outcome, ActionOutcome::Succeeded) { body.len() as u64 } else { 0 };
    (
        hash.clone(),
        ActionReport {
            action: action.clone(),
            succeeded_targets: succeeded,
            last_error,
            attempts: attempts.max(1),
            elapsed_ms: start.elapsed().as_millis() as u64,
            outcome,
        },
        bytes_sent,
    )
}

fn failed_action_report(action: &PlanAction, start: Instant, message: String) -> ActionReport {
    ActionReport {
        action: action.clone(),
        succeeded_targets: vec![],
        last_error: Some(message),
        attempts: 1,
        elapsed_ms: start.elapsed().as_millis() as u64,
        outcome: ActionOutcome::Failed,
    }
}

fn failed_report(action: &PlanAction, start: Instant, message: String) -> (String, ActionReport, u64) {
    let hash = match action {
        PlanAction::UploadBlob { hash, .. } | PlanAction::DeleteBlob { hash, .. } => hash.clone(),
        _ => String::new(),
    };
    (hash, failed_action_report(action, start, message), 0)
}

/// Uploads one hash to one server, retrying per [`ExecutorConfig`]'s
/// budget. A 401/402 is routed to the signer for a fresh authorisation
/// event and retried once without counting against the budget.
async fn upload_to_server(
    hash: &str,
    server: &str,
    body: Bytes,
    config: &ExecutorConfig,
    retry_cfg: &RetryStrategyConfig,
    semaphore: Option<&Semaphore>,
    deps: &ExecutorDeps,
    cancel: &CancellationToken,
) -> (String, bool, u32, Option<String>) {
    let mut attempts = 0u32;
    let mut auth_retry_used = false;

    loop {
        if cancel.is_cancelled() {
            return (server.to_string(), false, attempts.max(1), Some("run cancelled".to_string()));
        }
        attempts += 1;
        deps.progress.upload_attempt(hash, server, attempts);
        record_activity(deps, ActivityEvent::UploadAttempted {
            hash: hash.to_string(),
            server: server.to_string(),
            attempt: attempts,
        })
        .await;

        let _permit = match semaphore {
            Some(s) => s.acquire().await.ok(),
            None => None,
        };

        let outcome = do_upload_attempt(hash, server, body.clone(), config, deps).await;

        match outcome {
            Ok(()) => {
                deps.progress.upload_succeeded(hash, server);
                record_activity(deps, ActivityEvent::UploadSucceeded {
                    hash: hash.to_string(),
                    server: server.to_string(),
                    duration_ms: 0,
                })
                .await;
                return (server.to_string(), true, attempts, None);
            }
            Err((kind, message)) => {
                deps.progress.upload_failed(hash, server, kind);
                record_activity(deps, ActivityEvent::UploadFailed {
                    hash: hash.to_string(),
                    server: server.to_string(),
                    class: kind,
                    message: message.clone(),
                })
                .await;

                if kind == ErrorKind::AuthRequired && !auth_retry_used {
                    auth_retry_used = true;
                    attempts -= 1;
                    continue;
                }

                if !kind.is_retryable() || attempts >= config.retry_attempts {
                    return (server.to_string(), false, attempts, Some(message));
                }

                if !sleep_cancellable(calculate_delay(retry_cfg, attempts), cancel).await {
                    return (server.to_string(), false, attempts, Some("run cancelled".to_string()));
                }
            }
        }
    }
}

async fn do_upload_attempt(
    hash: &str,
    server: &str,
    body: Bytes,
    config: &ExecutorConfig,
    deps: &ExecutorDeps,
) -> Result<(), (ErrorKind, String)> {
    let timeout = std::time::Duration::from_millis(config.request_timeout_ms);

    match tokio::time::timeout(timeout, deps.blob.probe(server, hash)).await {
        Ok(Ok(true)) => return Ok(()),
        Ok(Ok(false)) => {}
        Ok(Err(e)) => return Err(classify_blob_error(&e)),
        Err(_) => return Err((ErrorKind::Transient, "probe timed out".to_string())),
    }

    let now = Utc::now().timestamp();
    let draft = blob_auth_draft(BlobAuthAction::Upload, hash, now + AUTH_EXPIRATION_SECS, now);
    let auth_event = deps
        .signer
        .sign_event(draft)
        .await
        .map_err(|e| (ErrorKind::SignerRejected, e.to_string()))?;

    match tokio::time::timeout(timeout, deps.blob.upload(server, body, &auth_event)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(classify_blob_error(&e)),
        Err(_) => Err((ErrorKind::Transient, "upload timed out".to_string())),
    }
}

/// Publishes one manifest event, retrying against the full relay set
/// until `publish_quorum` distinct relays accept it or the retry
/// budget is exhausted.
async fn run_publish_action(
    action: &PlanAction,
    config: &ExecutorConfig,
    retry_cfg: &RetryStrategyConfig,
    global: &Semaphore,
    hash_quorum: &BTreeMap<String, bool>,
    deps: &ExecutorDeps,
    cancel: &CancellationToken,
) -> ActionReport {
    let PlanAction::PublishManifest { path, hash, size, mime } = action else {
        unreachable!("caller filters to PublishManifest actions")
    };
    let start = Instant::now();
    let Ok(_permit) = global.acquire().await else {
        return failed_action_report(action, start, "executor shutting down".to_string());
    };

    if !hash_quorum.get(hash).copied().unwrap_or(true) {
        return failed_action_report(action, start, "blob did not reach server quorum; manifest withheld".to_string());
    }

    let mut attempts = 0u32;
    let mut last_error = None;
    let mut succeeded_relays: BTreeSet<String> = BTreeSet::new();

    loop {
        if cancel.is_cancelled() {
            return ActionReport {
                action: action.clone(),
                succeeded_targets: succeeded_relays.into_iter().collect(),
                last_error,
                attempts: attempts.max(1),
                elapsed_ms: start.elapsed().as_millis() as u64,
                outcome: ActionOutcome::Cancelled,
            };
        }
        attempts += 1;

        let now = Utc::now().timestamp();
        let draft = manifest_draft(path, hash, mime, *size, now);
        let event = match deps.signer.sign_event(draft).await {
            Ok(e) => e,
            Err(e) => return failed_action_report(action, start, e.to_string()),
        };

        let timeout = std::time::Duration::from_millis(config.request_timeout_ms);
        for (relay, outcome) in deps.relays.publish(&event, timeout).await {
            match outcome {
                Ok((true, _)) => {
                    if succeeded_relays.insert(relay.clone()) {
                        deps.progress.manifest_published(path, &relay);
                        record_activity(deps, ActivityEvent::ManifestPublished {
                            path: path.clone(),
                            relay,
                            duration_ms: start.elapsed().as_millis() as u64,
                        })
                        .await;
                    }
                }
                Ok((false, message)) => {
                    deps.progress.manifest_rejected(path, &relay, &message);
                    record_activity(deps, ActivityEvent::ManifestRejected {
                        path: path.clone(),
                        relay,
                        message: message.clone(),
                    })
                    .await;
                    last_error = Some(message);
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        if succeeded_relays.len() >= config.publish_quorum {
            return ActionReport {
                action: action.clone(),
                succeeded_targets: succeeded_relays.into_iter().collect(),
                last_error: None,
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
                outcome: ActionOutcome::Succeeded,
            };
        }

        if attempts >= config.retry_attempts {
            record_activity(deps, ActivityEvent::QuorumFailed {
                kind: "publish".to_string(),
                required: config.publish_quorum,
                got: succeeded_relays.len(),
            })
            .await;
            return ActionReport {
                action: action.clone(),
                succeeded_targets: succeeded_relays.into_iter().collect(),
                last_error,
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
                outcome: ActionOutcome::QuorumFailed { required: config.publish_quorum, got: succeeded_relays.len() },
            };
        }

        if !sleep_cancellable(calculate_delay(retry_cfg, attempts), cancel).await {
            return ActionReport {
                action: action.clone(),
                succeeded_targets: succeeded_relays.into_iter().collect(),
                last_error,
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
                outcome: ActionOutcome::Cancelled,
            };
        }
    }
}

/// Deletes one hash from every server that still holds it. A 404 is
/// treated as success (the blob is already gone,).
async fn run_delete_blob_action(
    action: &PlanAction,
    config: &ExecutorConfig,
    retry_cfg: &RetryStrategyConfig,
    global: &Semaphore,
    per_server: &BTreeMap<String, Semaphore>,
    deps: &ExecutorDeps,
    cancel: &CancellationToken,
) -> ActionReport {
    let PlanAction::DeleteBlob { hash, servers } = action else {
        unreachable!("caller filters to DeleteBlob actions")
    };
    let start = Instant::now();
    let Ok(_permit) = global.acquire().await else {
        return failed_action_report(action, start, "executor shutting down".to_string());
    };

    let results = stream::iter(servers.iter().map(|server| {
        delete_blob_from_server(hash, server, config, retry_cfg, per_server.get(server), deps, cancel)
    }))
    .buffer_unordered(servers.len().max(1))
    .collect::<Vec<_>>()
    .await;

    let mut succeeded = Vec::new();
    let mut attempts = 0u32;
    let mut last_error = None;
    for (server, ok, server_attempts, error) in results {
        attempts = attempts.max(server_attempts);
        if ok {
            succeeded.push(server);
        } else if let Some(e) = error {
            last_error = Some(e);
        }
    }

    let outcome = if cancel.is_cancelled() && succeeded.len() < servers.len() {
        ActionOutcome::Cancelled
    } else if succeeded.len() == servers.len() {
        ActionOutcome::Succeeded
    } else {
        ActionOutcome::Failed
    };

    ActionReport {
        action: action.clone(),
        succeeded_targets: succeeded,
        last_error,
        attempts: attempts.max(1),
        elapsed_ms: start.elapsed().as_millis() as u64,
        outcome,
    }
}

async fn delete_blob_from_server(
    hash: &str,
    server: &str,
    config: &ExecutorConfig,
    retry_cfg: &RetryStrategyConfig,
    semaphore: Option<&Semaphore>,
    deps: &ExecutorDeps,
    cancel: &CancellationToken,
) -> (String, bool, u32, Option<String>) {
    let mut attempts = 0u32;
    let mut auth_retry_used = false;

    loop {
        if cancel.is_cancelled() {
            return (server.to_string(), false, attempts.max(1), Some("run cancelled".to_string()));
        }
        attempts += 1;

        let _permit = match semaphore {
            Some(s) => s.acquire().await.ok(),
            None => None,
        };

        let now = Utc::now().timestamp();
        let draft = blob_auth_draft(BlobAuthAction::Delete, hash, now + AUTH_EXPIRATION_SECS, now);
        let auth_event = match deps.signer.sign_event(draft).await {
            Ok(e) => e,
            Err(e) => return (server.to_string(), false, attempts, Some(e.to_string())),
        };

        let timeout = std::time::Duration::from_millis(config.request_timeout_ms);
        let result = tokio::time::timeout(timeout, deps.blob.delete(server, hash, &auth_event)).await;

        let classified = match result {
            Ok(Ok(())) => return (server.to_string(), true, attempts, None),
            Ok(Err(BlobError::NotFound)) => return (server.to_string(), true, attempts, None),
            Ok(Err(e)) => classify_blob_error(&e),
            Err(_) => (ErrorKind::Transient, "delete timed out".to_string()),
        };

        let (kind, message) = classified;
        if kind == ErrorKind::AuthRequired && !auth_retry_used {
            auth_retry_used = true;
            attempts -= 1;
            continue;
        }

        if !kind.is_retryable() || attempts >= config.retry_attempts {
            return (server.to_string(), false, attempts, Some(message));
        }

        if !sleep_cancellable(calculate_delay(retry_cfg, attempts), cancel).await {
            return (server.to_string(), false, attempts, Some("run cancelled".to_string()));
        }
    }
}

/// Retracts a manifest by publishing a NIP-09-style deletion event
/// that addresses the superseded manifest by its replaceable-event
/// coordinate (`kind:pubkey:path`), since the reconciler does not
/// retain the stale event's id once it has fallen out of the latest
/// set.
async fn run_delete_manifest_action(
    action: &PlanAction,
    config: &ExecutorConfig,
    retry_cfg: &RetryStrategyConfig,
    global: &Semaphore,
    deps: &ExecutorDeps,
    cancel: &CancellationToken,
) -> ActionReport {
    let PlanAction::DeleteManifest { path } = action else {
        unreachable!("caller filters to DeleteManifest actions")
    };
    let start = Instant::now();
    let Ok(_permit) = global.acquire().await else {
        return failed_action_report(action, start, "executor shutting down".to_string());
    };

    let mut attempts = 0u32;
    let mut last_error = None;
    let mut succeeded_relays: BTreeSet<String> = BTreeSet::new();

    loop {
        if cancel.is_cancelled() {
            return ActionReport {
                action: action.clone(),
                succeeded_targets: succeeded_relays.into_iter().collect(),
                last_error,
                attempts: attempts.max(1),
                elapsed_ms: start.elapsed().as_millis() as u64,
                outcome: ActionOutcome::Cancelled,
            };
        }
        attempts += 1;

        let now = Utc::now().timestamp();
        let draft = nsyte_events::manifest_deletion_draft(&deps.signer.public_key(), path, now);
        let event = match deps.signer.sign_event(draft).await {
            Ok(e) => e,
            Err(e) => return failed_action_report(action, start, e.to_string()),
        };

        let timeout = std::time::Duration::from_millis(config.request_timeout_ms);
        for (relay, outcome) in deps.relays.publish(&event, timeout).await {
            match outcome {
                Ok((true, _)) => {
                    succeeded_relays.insert(relay);
                }
                Ok((false, message)) => last_error = Some(message),
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        if !succeeded_relays.is_empty() {
            return ActionReport {
                action: action.clone(),
                succeeded_targets: succeeded_relays.into_iter().collect(),
                last_error: None,
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
                outcome: ActionOutcome::Succeeded,
            };
        }

        if attempts >= config.retry_attempts {
            return ActionReport {
                action: action.clone(),
                succeeded_targets: vec![],
                last_error,
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
                outcome: ActionOutcome::Failed,
            };
        }

        if !sleep_cancellable(calculate_delay(retry_cfg, attempts), cancel).await {
            return ActionReport {
                action: action.clone(),
                succeeded_targets: succeeded_relays.into_iter().collect(),
                last_error,
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
                outcome: ActionOutcome::Cancelled,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsyte_types::ExecutorConfig;
    use std::collections::BTreeMap;

    #[test]
    fn per_server_semaphores_cover_both_upload_and_delete_actions() {
        let plan = Plan {
            actions: vec![
                PlanAction::UploadBlob { hash: "a".into(), servers: vec!["s1".into()] },
                PlanAction::DeleteBlob { hash: "b".into(), servers: vec!["s2".into()] },
                PlanAction::DeleteManifest { path: "/x".into() },
            ],
            source_paths: BTreeMap::new(),
        };
        let config = ExecutorConfig::default();
        let map = build_per_server_semaphores(&plan, &config);
        assert!(map.contains_key("s1"));
        assert!(map.contains_key("s2"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn classify_blob_error_maps_auth_required() {
        let (kind, _) = classify_blob_error(&BlobError::AuthRequired(402));
        assert_eq!(kind, ErrorKind::AuthRequired);
    }

    #[test]
    fn classify_blob_error_maps_not_found() {
        let (kind, _) = classify_blob_error(&BlobError::NotFound);
        assert_eq!(kind, ErrorKind::NotFound);
    }

    #[test]
    fn classify_blob_error_maps_server_error_to_transient() {
        let (kind, _) = classify_blob_error(&BlobError::ServerError(503));
        assert_eq!(kind, ErrorKind::Transient);
    }

    #[test]
    fn classify_blob_error_maps_malformed_to_non_retryable() {
        let (kind, _) = classify_blob_error(&BlobError::Malformed(403, "nope".to_string()));
        assert_eq!(kind, ErrorKind::Malformed);
        assert!(!kind.is_retryable());
    }
}
