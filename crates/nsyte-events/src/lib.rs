//! Event builder (C3): canonical JSON serialisation of event drafts,
//! id computation, and typed helpers for the well-known event kinds
//! this workspace produces (manifest, blob-list, relay-list, blob-server
//! authorisation).
//!
//! Canonical form: `[0, pubkey, created_at, kind, tags,
//! content]` serialised as JSON with no whitespace, arrays ordered as
//! given, strings escaped minimally. `serde_json::to_string` already
//! produces compact, order-preserving output, so it *is* the canonical
//! form here rather than a custom writer.

use anyhow::{Context, Result};
use nsyte_hash::hash_bytes;
use nsyte_types::{EventDraft, SignedEvent, kind};

/// Computes the canonical serialisation of an unsigned event, the
/// exact byte string whose SHA-256 is the event id.
pub fn canonical_serialization(
    pubkey: &str,
    created_at: i64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String> {
    let value = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    serde_json::to_string(&value).context("failed to serialise canonical event form")
}

/// Computes the event id: SHA-256 hex of the canonical serialisation.
pub fn compute_id(
    pubkey: &str,
    created_at: i64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String> {
    let canonical = canonical_serialization(pubkey, created_at, kind, tags, content)?;
    Ok(hash_bytes(canonical.as_bytes()))
}

/// Recomputes `event`'s id from its fields and checks it matches the
/// stored id. Does not check the signature — that is the signer's
/// concern (C4).
pub fn verify_id(event: &SignedEvent) -> bool {
    match compute_id(&event.pubkey, event.created_at, event.kind, &event.tags, &event.content) {
        Ok(expected) => expected == event.id,
        Err(_) => false,
    }
}

/// Builds the draft for a manifest event:
/// maps one site path to one blob hash.
pub fn manifest_draft(path: &str, hash: &str, mime: &str, size: u64, created_at: i64) -> EventDraft {
    EventDraft {
        created_at,
        kind: kind::MANIFEST,
        tags: vec![
            vec!["d".to_string(), path.to_string()],
            vec!["x".to_string(), hash.to_string()],
            vec!["m".to_string(), mime.to_string()],
            vec!["size".to_string(), size.to_string()],
        ],
        content: String::new(),
    }
}

/// Builds the draft for a blob-list event:
/// advertises the blob servers the author publishes to.
pub fn blob_list_draft(servers: &[String], created_at: i64) -> EventDraft {
    EventDraft {
        created_at,
        kind: kind::BLOB_LIST,
        tags: servers
            .iter()
            .map(|s| vec!["server".to_string(), s.clone()])
            .collect(),
        content: String::new(),
    }
}

/// Builds the draft for a relay-list event: advertises read ("inbox") and write ("outbox") relays.
/// A relay present in both lists gets an unmarked `r` tag (both
/// directions), matching the convention this wire format follows.
pub fn relay_list_draft(inbox: &[String], outbox: &[String], created_at: i64) -> EventDraft {
    let mut tags = Vec::new();
    for relay in inbox {
        if outbox.contains(relay) {
            continue;
        }
        tags.push(vec!["r".to_string(), relay.clone(), "read".to_string()]);
    }
    for relay in outbox {
        if inbox.contains(relay) {
            continue;
        }
        tags.push(vec!["r".to_string(), relay.clone(), "write".to_string()]);
    }
    for relay in inbox {
        if outbox.contains(relay) {
            tags.push(vec!["r".to_string(), relay.clone()]);
        }
    }

    EventDraft {
        created_at,
        kind: kind::RELAY_LIST,
        tags,
        content: String::new(),
    }
}

/// Action a blob-server authorisation event grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobAuthAction {
    Upload,
    Delete,
}

impl BlobAuthAction {
    fn tag_value(self) -> &'static str {
        match self {
            BlobAuthAction::Upload => "upload",
            BlobAuthAction::Delete => "delete",
        }
    }
}

/// Builds the draft for a blob-server authorisation event. `expiration`
/// is a Unix timestamp; callers must ensure it is in the future and
/// within one hour of `created_at` — this builder does not itself
/// enforce that, since the signer is the one with a clock-trustworthy
/// `created_at` to compare against.
pub fn blob_auth_draft(action: BlobAuthAction, hash: &str, expiration: i64, created_at: i64) -> EventDraft {
    EventDraft {
        created_at,
        kind: kind::BLOB_AUTH,
        tags: vec![
            vec!["t".to_string(), action.tag_value().to_string()],
            vec!["x".to_string(), hash.to_string()],
            vec!["expiration".to_string(), expiration.to_string()],
        ],
        content: String::new(),
    }
}

/// Builds a deletion draft that
/// retracts a manifest by its replaceable-event coordinate rather
/// than its event id: once a manifest falls out of the latest set
/// the reconciler no longer has its id on hand, but the `(kind,
/// pubkey, path)` triple that identifies it never changes.
pub fn manifest_deletion_draft(pubkey: &str, path: &str, created_at: i64) -> EventDraft {
    EventDraft {
        created_at,
        kind: kind::DELETION,
        tags: vec![vec!["a".to_string(), format!("{}:{}:{}", kind::MANIFEST, pubkey, path)]],
        content: String::new(),
    }
}

/// Validates a blob-authorisation draft's expiration against:
/// it must be strictly in the future and no more than one hour out.
pub fn blob_auth_expiration_valid(draft: &EventDraft, now: i64) -> bool {
    let Some(expiration_tag) = draft.tags.iter().find(|t| t.first().map(String::as_str) == Some("expiration")) else {
        return false;
    };
    let Some(expiration_str) = expiration_tag.get(1) else {
        return false;
    };
    let Ok(expiration) = expiration_str.parse::<i64>() else {
        return false;
    };

    expiration > now && expiration <= now + 3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_serialization_has_no_whitespace() {
        let s = canonical_serialization("pk", 100, 1, &[vec!["d".into(), "/x".into()]], "").unwrap();
        assert!(!s.contains(' '));
        assert!(s.starts_with("[0,"));
    }

    #[test]
    fn compute_id_is_deterministic() {
        let a = compute_id("pk", 100, 1, &[], "content").unwrap();
        let b = compute_id("pk", 100, 1, &[], "content").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn compute_id_changes_with_any_field() {
        let base = compute_id("pk", 100, 1, &[], "content").unwrap();
        assert_ne!(base, compute_id("pk2", 100, 1, &[], "content").unwrap());
        assert_ne!(base, compute_id("pk", 101, 1, &[], "content").unwrap());
        assert_ne!(base, compute_id("pk", 100, 2, &[], "content").unwrap());
        assert_ne!(base, compute_id("pk", 100, 1, &[], "other").unwrap());
    }

    #[test]
    fn verify_id_accepts_matching_event_and_rejects_tampering() {
        let id = compute_id("pk", 100, kind::MANIFEST, &[], "").unwrap();
        let event = SignedEvent {
            id: id.clone(),
            pubkey: "pk".to_string(),
            created_at: 100,
            kind: kind::MANIFEST,
            tags: vec![],
            content: String::new(),
            sig: "sig".to_string(),
        };
        assert!(verify_id(&event));

        let mut tampered = event.clone();
        tampered.content = "tampered".to_string();
        assert!(!verify_id(&tampered));
    }

    #[test]
    fn manifest_draft_has_required_tags() {
        let draft = manifest_draft("/index.html", "deadbeef", "text/html", 15, 100);
        assert_eq!(draft.kind, kind::MANIFEST);
        assert!(draft.tags.contains(&vec!["d".to_string(), "/index.html".to_string()]));
        assert!(draft.tags.contains(&vec!["x".to_string(), "deadbeef".to_string()]));
        assert!(draft.tags.contains(&vec!["m".to_string(), "text/html".to_string()]));
        assert!(draft.tags.contains(&vec!["size".to_string(), "15".to_string()]));
    }

    #[test]
    fn blob_list_draft_lists_every_server() {
        let draft = blob_list_draft(&["https://a.example".into(), "https://b.example".into()], 0);
        assert_eq!(draft.kind, kind::BLOB_LIST);
        assert_eq!(draft.tags.len(), 2);
    }

    #[test]
    fn relay_list_draft_marks_read_write_and_both() {
        let draft = relay_list_draft(
            &["wss://in-only.example".into(), "wss://both.example".into()],
            &["wss://out-only.example".into(), "wss://both.example".into()],
            0,
        );
        assert_eq!(draft.kind, kind::RELAY_LIST);
        assert!(draft.tags.contains(&vec!["r".into(), "wss://in-only.example".into(), "read".into()]));
        assert!(draft.tags.contains(&vec!["r".into(), "wss://out-only.example".into(), "write".into()]));
        assert!(draft.tags.contains(&vec!["r".into(), "wss://both.example".into()]));
    }

    #[test]
    fn blob_auth_expiration_validates_future_and_one_hour_window() {
        let now = 1_000_000;
        let valid = blob_auth_draft(BlobAuthAction::Upload, "hash", now + 1800, now);
        assert!(blob_auth_expiration_valid(&valid, now));

        let in_past = blob_auth_draft(BlobAuthAction::Upload, "hash", now - 1, now);
        assert!(!blob_auth_expiration_valid(&in_past, now));

        let too_far = blob_auth_draft(BlobAuthAction::Upload, "hash", now + 3601, now);
        assert!(!blob_auth_expiration_valid(&too_far, now));
    }

    #[test]
    fn manifest_deletion_draft_addresses_by_coordinate() {
        let draft = manifest_deletion_draft("pk", "/old.html", 100);
        assert_eq!(draft.kind, kind::DELETION);
        assert_eq!(draft.tags, vec![vec!["a".to_string(), format!("{}:pk:/old.html", kind::MANIFEST)]]);
    }

    #[test]
    fn blob_auth_draft_tags_action_and_hash() {
        let draft = blob_auth_draft(BlobAuthAction::Delete, "deadbeef", 100, 0);
        assert!(draft.tags.contains(&vec!["t".to_string(), "delete".to_string()]));
        assert!(draft.tags.contains(&vec!["x".to_string(), "deadbeef".to_string()]));
    }

    proptest::proptest! {
        #[test]
        fn compute_id_always_produces_valid_hex(
            pubkey in "[a-f0-9]{64}",
            created_at in 0i64..2_000_000_000,
            kind in 0u32..70_000,
            content in ".*",
        ) {
            let id = compute_id(&pubkey, created_at, kind, &[], &content).unwrap();
            proptest::prop_assert_eq!(id.len(), 64);
            proptest::prop_assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
