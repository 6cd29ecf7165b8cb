//! Progress reporting seam (A4). Rendering a terminal progress bar is
//! the CLI collaborator's job; this crate only exposes the trait those
//! renderers implement and two plain fallbacks, with no TTY-detection
//! or `indicatif` dependency of its own.

use nsyte_types::ErrorKind;

/// Called at each step of a publish or download run. Implementations
/// must not block the executor for long — a progress bar redraw, not
/// a network call.
pub trait Progress: Send + Sync {
    fn run_started(&self, total_actions: usize) {
        let _ = total_actions;
    }
    fn upload_attempt(&self, hash: &str, server: &str, attempt: u32) {
        let _ = (hash, server, attempt);
    }
    fn upload_succeeded(&self, hash: &str, server: &str) {
        let _ = (hash, server);
    }
    fn upload_failed(&self, hash: &str, server: &str, kind: ErrorKind) {
        let _ = (hash, server, kind);
    }
    fn manifest_published(&self, path: &str, relay: &str) {
        let _ = (path, relay);
    }
    fn manifest_rejected(&self, path: &str, relay: &str, message: &str) {
        let _ = (path, relay, message);
    }
    fn run_finished(&self, blobs_uploaded: u64, manifests_published: u64, had_failures: bool) {
        let _ = (blobs_uploaded, manifests_published, had_failures);
    }
}

/// Reports nothing. Used by callers embedding this crate as a library
/// with no terminal to write to.
pub struct SilentProgress;

impl Progress for SilentProgress {}

/// Plain `eprintln!` fallback for when stdout isn't a terminal — one
/// line per event, no cursor control.
pub struct StderrProgress;

impl Progress for StderrProgress {
    fn run_started(&self, total_actions: usize) {
        eprintln!("[run] {total_actions} actions planned");
    }

    fn upload_attempt(&self, hash: &str, server: &str, attempt: u32) {
        eprintln!("[upload] {hash} -> {server} (attempt {attempt})");
    }

    fn upload_succeeded(&self, hash: &str, server: &str) {
        eprintln!("[upload] {hash} -> {server} ok");
    }

    fn upload_failed(&self, hash: &str, server: &str, kind: ErrorKind) {
        eprintln!("[upload] {hash} -> {server} failed ({kind:?})");
    }

    fn manifest_published(&self, path: &str, relay: &str) {
        eprintln!("[manifest] {path} -> {relay} accepted");
    }

    fn manifest_rejected(&self, path: &str, relay: &str, message: &str) {
        eprintln!("[manifest] {path} -> {relay} rejected: {message}");
    }

    fn run_finished(&self, blobs_uploaded: u64, manifests_published: u64, had_failures: bool) {
        let status = if had_failures { "completed with failures" } else { "completed" };
        eprintln!("[run] {status}: {blobs_uploaded} blobs uploaded, {manifests_published} manifests published");
    }
}

/// Wraps an inner [`Progress`] and silences it below a configured
/// level (A2's `LogLevel`, `LOG_LEVEL`). Upload/manifest
/// detail is `debug`; run-start/finish is `info`.
pub struct LevelFilteredProgress<P: Progress> {
    inner: P,
    level: nsyte_config::LogLevel,
}

impl<P: Progress> LevelFilteredProgress<P> {
    pub fn new(inner: P, level: nsyte_config::LogLevel) -> Self {
        Self { inner, level }
    }

    fn allows(&self, required: nsyte_config::LogLevel) -> bool {
        self.level.allows(required)
    }
}

impl<P: Progress> Progress for LevelFilteredProgress<P> {
    fn run_started(&self, total_actions: usize) {
        if self.allows(nsyte_config::LogLevel::Info) {
            self.inner.run_started(total_actions);
        }
    }

    fn upload_attempt(&self, hash: &str, server: &str, attempt: u32) {
        if self.allows(nsyte_config::LogLevel::Debug) {
            self.inner.upload_attempt(hash, server, attempt);
        }
    }

    fn upload_succeeded(&self, hash: &str, server: &str) {
        if self.allows(nsyte_config::LogLevel::Debug) {
            self.inner.upload_succeeded(hash, server);
        }
    }

    fn upload_failed(&self, hash: &str, server: &str, kind: ErrorKind) {
        if self.allows(nsyte_config::LogLevel::Warn) {
            self.inner.upload_failed(hash, server, kind);
        }
    }

    fn manifest_published(&self, path: &str, relay: &str) {
        if self.allows(nsyte_config::LogLevel::Debug) {
            self.inner.manifest_published(path, relay);
        }
    }

    fn manifest_rejected(&self, path: &str, relay: &str, message: &str) {
        if self.allows(nsyte_config::LogLevel::Warn) {
            self.inner.manifest_rejected(path, relay, message);
        }
    }

    fn run_finished(&self, blobs_uploaded: u64, manifests_published: u64, had_failures: bool) {
        if self.allows(nsyte_config::LogLevel::Info) {
            self.inner.run_finished(blobs_uploaded, manifests_published, had_failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct CountingProgress {
        uploads: AtomicUsize,
    }

    impl Progress for CountingProgress {
        fn upload_succeeded(&self, _hash: &str, _server: &str) {
            self.uploads.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    #[test]
    fn silent_progress_never_panics() {
        let p = SilentProgress;
        p.run_started(3);
        p.upload_attempt("h", "s", 1);
        p.upload_succeeded("h", "s");
        p.run_finished(1, 1, false);
    }

    #[test]
    fn level_filter_suppresses_debug_below_info_level() {
        let counting = CountingProgress { uploads: AtomicUsize::new(0) };
        let filtered = LevelFilteredProgress::new(counting, nsyte_config::LogLevel::Warn);
        filtered.upload_succeeded("h", "s");
        assert_eq!(filtered.inner.uploads.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn level_filter_passes_through_at_debug_level() {
        let counting = CountingProgress { uploads: AtomicUsize::new(0) };
        let filtered = LevelFilteredProgress::new(counting, nsyte_config::LogLevel::Debug);
        filtered.upload_succeeded("h", "s");
        assert_eq!(filtered.inner.uploads.load(AtomicOrdering::SeqCst), 1);
    }
}
