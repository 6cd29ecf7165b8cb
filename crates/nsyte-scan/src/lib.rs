//! Recursive directory walk with include/exclude glob matching (C2).
//!
//! Produces the local [`FileEntry`] list the reconciler diffs against
//! the remote manifest set. Hashing happens here too (via
//! `nsyte-hash`) so a scan result is immediately ready to compare.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use nsyte_hash::hash_bytes;
use nsyte_types::FileEntry;
use walkdir::WalkDir;

/// Include/exclude glob matcher applied to scanned relative paths.
/// An empty include set means "include everything not excluded".
#[derive(Debug, Clone)]
pub struct PathMatcher {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathMatcher {
    pub fn new(include_patterns: &[String], exclude_patterns: &[String]) -> Result<Self> {
        let include = if include_patterns.is_empty() {
            None
        } else {
            Some(build_globset(include_patterns)?)
        };
        let exclude = build_globset(exclude_patterns)?;
        Ok(Self { include, exclude })
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        if self.exclude.is_match(relative_path) {
            return false;
        }
        match &self.include {
            Some(set) => set.is_match(relative_path),
            None => true,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
        builder.add(glob);
    }
    builder.build().context("failed to build glob set")
}

/// Recursively walks `root`, hashing every regular file that survives
/// `matcher`, and returns the resulting [`FileEntry`] list sorted by
/// path for a deterministic scan order.
pub fn scan_directory(root: &Path, matcher: &PathMatcher) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();

    for dir_entry in WalkDir::new(root).follow_links(false) {
        let dir_entry = dir_entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !dir_entry.file_type().is_file() {
            continue;
        }

        let abs_path = dir_entry.path();
        let rel_path = to_site_path(root, abs_path)?;

        if !matcher.matches(&rel_path) {
            continue;
        }

        let bytes = fs::read(abs_path)
            .with_context(|| format!("failed to read {}", abs_path.display()))?;
        let hash = hash_bytes(&bytes);

        entries.push(FileEntry {
            path: rel_path,
            size: bytes.len() as u64,
            hash,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Converts a filesystem path under `root` to the site-relative path
/// format used everywhere else in this workspace: forward slashes, a
/// leading slash, no `.`/`..` components.
fn to_site_path(root: &Path, abs_path: &Path) -> Result<String> {
    let rel = abs_path
        .strip_prefix(root)
        .with_context(|| format!("{} is not under {}", abs_path.display(), root.display()))?;

    let mut normalized = String::from("/");
    for (i, component) in rel.components().enumerate() {
        if i > 0 {
            normalized.push('/');
        }
        normalized.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    #[test]
    fn empty_directory_scans_to_empty_list() {
        let td = tempfile::tempdir().expect("tempdir");
        let matcher = PathMatcher::new(&[], &[]).expect("matcher");
        let entries = scan_directory(td.path(), &matcher).expect("scan");
        assert!(entries.is_empty());
    }

    #[test]
    fn scan_hashes_every_file_and_sorts_by_path() {
        let td = tempfile::tempdir().expect("tempdir");
        write(td.path(), "style.css", "body{color:red}");
        write(td.path(), "index.html", "<h1>Hi</h1>");

        let matcher = PathMatcher::new(&[], &[]).expect("matcher");
        let entries = scan_directory(td.path(), &matcher).expect("scan");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/index.html");
        assert_eq!(entries[1].path, "/style.css");
        assert_eq!(entries[0].hash, nsyte_hash::hash_bytes(b"<h1>Hi</h1>"));
        assert_eq!(entries[0].size, 11);
    }

    #[test]
    fn scan_recurses_into_subdirectories() {
        let td = tempfile::tempdir().expect("tempdir");
        write(td.path(), "assets/img/logo.png", "fake-png-bytes");

        let matcher = PathMatcher::new(&[], &[]).expect("matcher");
        let entries = scan_directory(td.path(), &matcher).expect("scan");

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/assets/img/logo.png");
    }

    #[test]
    fn exclude_pattern_filters_matching_paths() {
        let td = tempfile::tempdir().expect("tempdir");
        write(td.path(), "index.html", "a");
        write(td.path(), "drafts/secret.html", "b");

        let matcher = PathMatcher::new(&[], &["drafts/**".to_string()]).expect("matcher");
        let entries = scan_directory(td.path(), &matcher).expect("scan");

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/index.html");
    }

    #[test]
    fn include_pattern_restricts_to_matching_paths() {
        let td = tempfile::tempdir().expect("tempdir");
        write(td.path(), "index.html", "a");
        write(td.path(), "notes.txt", "b");

        let matcher = PathMatcher::new(&["*.html".to_string()], &[]).expect("matcher");
        let entries = scan_directory(td.path(), &matcher).expect("scan");

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/index.html");
    }

    #[test]
    fn exclude_takes_priority_over_include() {
        let td = tempfile::tempdir().expect("tempdir");
        write(td.path(), "drafts/index.html", "a");

        let matcher = PathMatcher::new(
            &["**/*.html".to_string()],
            &["drafts/**".to_string()],
        )
        .expect("matcher");
        let entries = scan_directory(td.path(), &matcher).expect("scan");
        assert!(entries.is_empty());
    }

    #[test]
    fn invalid_glob_pattern_errors() {
        let err = PathMatcher::new(&["[".to_string()], &[]).expect_err("must fail");
        assert!(format!("{err:#}").contains("invalid glob pattern"));
    }

    #[test]
    fn different_content_same_name_produces_different_hash() {
        let td = tempfile::tempdir().expect("tempdir");
        write(td.path(), "index.html", "<h1>Hi</h1>");
        let matcher = PathMatcher::new(&[], &[]).expect("matcher");
        let first = scan_directory(td.path(), &matcher).expect("scan");

        write(td.path(), "index.html", "<h1>Hi2</h1>");
        let second = scan_directory(td.path(), &matcher).expect("scan");

        assert_ne!(first[0].hash, second[0].hash);
    }
}
