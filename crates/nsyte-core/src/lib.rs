//! Reconciler, fan-out executor, progress reporting and command
//! orchestration (C8, C9): the layer that turns a scanned directory
//! and the live relay/blob-server state into a [`Report`], and the
//! thin `publish`/`download` entry points the CLI collaborator calls.

mod executor;
mod mime;
mod orchestrate;
mod progress;
mod reconcile;

pub use executor::{ExecutorDeps, run as execute};
pub use mime::mime_for_path;
pub use orchestrate::{SiteOptions, download, publish};
pub use progress::{LevelFilteredProgress, Progress, SilentProgress, StderrProgress};
pub use reconcile::{ManifestInfo, PresenceMap, latest_manifests, plan};

pub use nsyte_types::{ExecutorConfig, Report};
