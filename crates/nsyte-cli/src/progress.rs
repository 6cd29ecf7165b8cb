//! Progress rendering: a [`nsyte_core::Progress`] implementation that
//! shows an indicatif bar when stdout is a TTY and falls back to
//! plain `eprintln!` lines otherwise.

use std::sync::Mutex;

use console::Term;
use indicatif::{ProgressBar, ProgressStyle};

use nsyte_core::Progress;
use nsyte_types::ErrorKind;

/// Detects whether stdout is connected to a TTY.
pub fn is_tty() -> bool {
    Term::stdout().is_term()
}

/// Renders a publish/download run's progress to the terminal. The bar
/// is created lazily in `run_started` since that is the first call
/// that knows the action count; every method takes `&self` (the
/// `Progress` trait's shape), so the bar lives behind a `Mutex`.
pub struct CliProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgress {
    pub fn new() -> Self {
        Self { bar: Mutex::new(None) }
    }

    fn println(&self, line: String) {
        match self.bar.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for CliProgress {
    fn run_started(&self, total_actions: usize) {
        if is_tty() {
            let bar = ProgressBar::new(total_actions as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar.set_message("publishing");
            *self.bar.lock().unwrap_or_else(|e| e.into_inner()) = Some(bar);
        } else {
            eprintln!("[run] {total_actions} actions planned");
        }
    }

    fn upload_attempt(&self, hash: &str, server: &str, attempt: u32) {
        self.println(format!("[upload] {hash} -> {server} (attempt {attempt})"));
    }

    fn upload_succeeded(&self, hash: &str, server: &str) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            bar.inc(1);
        }
        self.println(format!("[upload] {hash} -> {server} ok"));
    }

    fn upload_failed(&self, hash: &str, server: &str, kind: ErrorKind) {
        self.println(format!("[upload] {hash} -> {server} failed ({kind:?})"));
    }

    fn manifest_published(&self, path: &str, relay: &str) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            bar.inc(1);
        }
        self.println(format!("[manifest] {path} -> {relay} accepted"));
    }

    fn manifest_rejected(&self, path: &str, relay: &str, message: &str) {
        self.println(format!("[manifest] {path} -> {relay} rejected: {message}"));
    }

    fn run_finished(&self, blobs_uploaded: u64, manifests_published: u64, had_failures: bool) {
        let status = if had_failures { "completed with failures" } else { "completed" };
        let mut guard = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = guard.take() {
            bar.finish_with_message(format!("{status}: {blobs_uploaded} blobs, {manifests_published} manifests"));
        } else {
            eprintln!("[run] {status}: {blobs_uploaded} blobs uploaded, {manifests_published} manifests published");
        }
    }
}
