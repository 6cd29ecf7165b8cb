//! Reconciler (C8): diffs a local file list against the latest remote
//! manifest set and a blob-presence map, producing a deterministic,
//! ordered [`Plan`].
//!
//! Kept free of I/O on purpose: the caller (the publish orchestration
//! in [`crate::publish`]) gathers the manifest events and presence
//! probes first, then hands them here as plain data for a pure diff.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use nsyte_types::{FileEntry, Plan, PlanAction, SignedEvent, manifest_fields};

use crate::mime::mime_for_path;

/// The fields of the latest manifest event for one path ("the latest
/// by creation timestamp is authoritative").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    pub hash: String,
    pub size: u64,
    pub mime: String,
    pub event_id: String,
    pub created_at: i64,
}

/// Reduces a stream of manifest events to the latest one per path.
/// Tie-break for equal `created_at`: lexicographically larger event id
/// wins (deterministic).
pub fn latest_manifests(events: &[SignedEvent]) -> BTreeMap<String, ManifestInfo> {
    let mut out: BTreeMap<String, ManifestInfo> = BTreeMap::new();

    for event in events {
        let Some(fields) = manifest_fields(event) else { continue };
        let candidate = ManifestInfo {
            hash: fields.hash.to_string(),
            size: fields.size,
            mime: fields.mime.to_string(),
            event_id: event.id.clone(),
            created_at: event.created_at,
        };

        match out.get(fields.path) {
            Some(existing) if !is_newer(&candidate, existing) => {}
            _ => {
                out.insert(fields.path.to_string(), candidate);
            }
        }
    }

    out
}

fn is_newer(candidate: &ManifestInfo, existing: &ManifestInfo) -> bool {
    match candidate.created_at.cmp(&existing.created_at) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.event_id > existing.event_id,
    }
}

/// Which blob servers already hold a given hash, keyed by hash (the
/// presence map P, populated from C7 HEAD probes).
pub type PresenceMap = BTreeMap<String, BTreeSet<String>>;

/// Builds the ordered plan for a publish run.
///
/// `root` resolves a site-relative local path (e.g. `/index.html`)
/// back to its on-disk location for [`Plan::source_paths`]; the plan
/// itself never holds blob bytes.
pub fn plan(
    root: &Path,
    local: &[FileEntry],
    manifests: &BTreeMap<String, ManifestInfo>,
    presence: &PresenceMap,
    servers: &[String],
    purge: bool,
) -> Plan {
    let local_by_path: BTreeMap<&str, &FileEntry> =
        local.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut changed_paths: Vec<&FileEntry> = Vec::new();
    for entry in local {
        let unchanged = manifests
            .get(&entry.path)
            .is_some_and(|m| m.hash == entry.hash);
        if !unchanged {
            changed_paths.push(entry);
        }
    }
    changed_paths.sort_by(|a, b| a.path.cmp(&b.path));

    let mut needed_hashes: BTreeSet<String> = BTreeSet::new();
    let mut source_paths: BTreeMap<String, PathBuf> = BTreeMap::new();
    for entry in &changed_paths {
        needed_hashes.insert(entry.hash.clone());
        source_paths
            .entry(entry.hash.clone())
            .or_insert_with(|| site_path_to_fs(root, &entry.path));
    }

    let mut actions = Vec::new();

    for hash in &needed_hashes {
        let present = presence.get(hash);
        let missing_servers: Vec<String> = servers
            .iter()
            .filter(|s| !present.is_some_and(|p| p.contains(s.as_str())))
            .cloned()
            .collect();
        if !missing_servers.is_empty() {
            actions.push(PlanAction::UploadBlob { hash: hash.clone(), servers: missing_servers });
        }
    }

    for entry in &changed_paths {
        actions.push(PlanAction::PublishManifest {
            path: entry.path.clone(),
            hash: entry.hash.clone(),
            size: entry.size,
            mime: mime_for_path(&entry.path).to_string(),
        });
    }

    if purge {
        let retained_hashes: BTreeSet<&str> = local.iter().map(|f| f.hash.as_str()).collect();
        let remote_hashes: BTreeSet<&str> = manifests.values().map(|m| m.hash.as_str()).collect();

        let mut stale_hashes: Vec<&str> =
            remote_hashes.difference(&retained_hashes).copied().collect();
        stale_hashes.sort_unstable();
        for hash in stale_hashes {
            let present_servers: Vec<String> = presence
                .get(hash)
                .map(|set| servers.iter().filter(|s| set.contains(s.as_str())).cloned().collect())
                .unwrap_or_default();
            if !present_servers.is_empty() {
                actions.push(PlanAction::DeleteBlob { hash: hash.to_string(), servers: present_servers });
            }
        }

        let mut stale_paths: Vec<&str> = manifests
            .keys()
            .filter(|path| !local_by_path.contains_key(path.as_str()))
            .map(String::as_str)
            .collect();
        stale_paths.sort_unstable();
        for path in stale_paths {
            actions.push(PlanAction::DeleteManifest { path: path.to_string() });
        }
    }

    Plan { actions, source_paths }
}

fn site_path_to_fs(root: &Path, site_path: &str) -> PathBuf {
    root.join(site_path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsyte_types::kind;

    fn file(path: &str, hash: &str, size: u64) -> FileEntry {
        FileEntry { path: path.to_string(), size, hash: hash.to_string() }
    }

    fn manifest_event(id: &str, path: &str, hash: &str, size: u64, created_at: i64) -> SignedEvent {
        SignedEvent {
            id: id.to_string(),
            pubkey: "pk".to_string(),
            created_at,
            kind: kind::MANIFEST,
            tags: vec![
                vec!["d".to_string(), path.to_string()],
                vec!["x".to_string(), hash.to_string()],
                vec!["m".to_string(), "text/html".to_string()],
                vec!["size".to_string(), size.to_string()],
            ],
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn latest_manifests_breaks_ties_on_larger_event_id() {
        let events = vec![
            manifest_event("aaa", "/x", "hash1", 1, 100),
            manifest_event("bbb", "/x", "hash2", 1, 100),
        ];
        let manifests = latest_manifests(&events);
        assert_eq!(manifests["/x"].hash, "hash2");
    }

    #[test]
    fn latest_manifests_prefers_newer_timestamp_over_id() {
        let events = vec![
            manifest_event("zzz", "/x", "hash1", 50, 100),
            manifest_event("aaa", "/x", "hash2", 1, 200),
        ];
        let manifests = latest_manifests(&events);
        assert_eq!(manifests["/x"].hash, "hash2");
    }

    #[test]
    fn empty_directory_produces_empty_plan() {
        let result = plan(
            Path::new("/site"),
            &[],
            &BTreeMap::new(),
            &PresenceMap::new(),
            &["https://blossom.example".to_string()],
            false,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn all_files_unchanged_yields_zero_actions() {
        let local = vec![file("/index.html", "hash1", 10)];
        let manifests = latest_manifests(&[manifest_event("id1", "/index.html", "hash1", 10, 100)]);
        let mut presence = PresenceMap::new();
        presence.insert("hash1".to_string(), BTreeSet::from(["https://blossom.example".to_string()]));

        let result = plan(
            Path::new("/site"),
            &local,
            &manifests,
            &presence,
            &["https://blossom.example".to_string()],
            false,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn new_file_produces_upload_and_publish() {
        let local = vec![file("/index.html", "hash1", 10)];
        let servers = vec!["https://a.example".to_string()];

        let result = plan(Path::new("/site"), &local, &BTreeMap::new(), &PresenceMap::new(), &servers, false);

        assert_eq!(result.upload_count(), 1);
        assert_eq!(result.publish_count(), 1);
        assert_eq!(
            result.source_paths.get("hash1"),
            Some(&PathBuf::from("/site/index.html"))
        );
    }

    #[test]
    fn blob_already_present_on_all_servers_skips_upload() {
        let local = vec![file("/index.html", "hash1", 10)];
        let servers = vec!["https://a.example".to_string()];
        let mut presence = PresenceMap::new();
        presence.insert("hash1".to_string(), BTreeSet::from(["https://a.example".to_string()]));

        let result = plan(Path::new("/site"), &local, &BTreeMap::new(), &presence, &servers, false);

        assert_eq!(result.upload_count(), 0);
        assert_eq!(result.publish_count(), 1);
    }

    #[test]
    fn replacing_one_file_only_touches_that_path() {
        let local = vec![file("/index.html", "hash2", 11), file("/style.css", "hash3", 20)];
        let manifests = latest_manifests(&[
            manifest_event("id1", "/index.html", "hash1", 10, 100),
            manifest_event("id2", "/style.css", "hash3", 20, 100),
        ]);
        let servers = vec!["https://a.example".to_string()];

        let result = plan(Path::new("/site"), &local, &manifests, &PresenceMap::new(), &servers, false);

        assert_eq!(result.upload_count(), 1);
        assert_eq!(result.publish_count(), 1);
        assert!(result.actions.iter().any(|a| matches!(
            a, PlanAction::PublishManifest { path, .. } if path == "/index.html"
        )));
    }

    #[test]
    fn purge_deletes_remote_paths_and_blobs_absent_locally() {
        let local = vec![file("/index.html", "hash1", 10)];
        let manifests = latest_manifests(&[
            manifest_event("id1", "/index.html", "hash1", 10, 100),
            manifest_event("id2", "/old.html", "hash2", 5, 50),
        ]);
        let servers = vec!["https://a.example".to_string()];
        let mut presence = PresenceMap::new();
        presence.insert("hash2".to_string(), BTreeSet::from(["https://a.example".to_string()]));

        let result = plan(Path::new("/site"), &local, &manifests, &presence, &servers, true);

        assert_eq!(result.delete_count(), 2);
        assert!(result
            .actions
            .iter()
            .any(|a| matches!(a, PlanAction::DeleteManifest { path } if path == "/old.html")));
        assert!(result
            .actions
            .iter()
            .any(|a| matches!(a, PlanAction::DeleteBlob { hash, .. } if hash == "hash2")));
    }

    #[test]
    fn without_purge_stale_remote_paths_are_left_alone() {
        let local = vec![file("/index.html", "hash1", 10)];
        let manifests = latest_manifests(&[manifest_event("id2", "/old.html", "hash2", 5, 50)]);
        let servers = vec!["https://a.example".to_string()];

        let result = plan(Path::new("/site"), &local, &manifests, &PresenceMap::new(), &servers, false);

        assert_eq!(result.delete_count(), 0);
    }

    #[test]
    fn action_order_is_uploads_then_publishes_then_deletes() {
        let local = vec![file("/b.html", "hash2", 1), file("/a.html", "hash1", 1)];
        let manifests = latest_manifests(&[manifest_event("id1", "/z.html", "hash9", 1, 1)]);
        let servers = vec!["https://a.example".to_string()];

        let result = plan(Path::new("/site"), &local, &manifests, &PresenceMap::new(), &servers, true);

        let kinds: Vec<&str> = result
            .actions
            .iter()
            .map(|a| match a {
                PlanAction::UploadBlob { .. } => "upload",
                PlanAction::PublishManifest { .. } => "publish",
                PlanAction::DeleteBlob { .. } => "delete_blob",
                PlanAction::DeleteManifest { .. } => "delete_manifest",
            })
            .collect();

        let first_publish = kinds.iter().position(|k| *k == "publish").unwrap();
        let first_delete = kinds.iter().position(|k| k.starts_with("delete")).unwrap();
        assert!(kinds[..first_publish].iter().all(|k| *k == "upload"));
        assert!(first_delete > first_publish);
    }
}
