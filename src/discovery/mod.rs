//! # Discovery Module
//!
//! File-system scanning that turns naming-convention-compliant files into
//! catalog records. Two conventions are recognized, both two levels deep
//! under the discovery root:
//!
//! - `{module}/controllers/{name}-controller.*`
//! - `{module}/schemas/{name}-schema.*`
//!
//! Path segments that do not match the shape are silently skipped. Files
//! are loaded through the injected [`ModuleLoader`](crate::loader::ModuleLoader)
//! in fixed-size chunks, every file in a chunk running in its own
//! coroutine and all chunks dispatched together; the fan-out is bounded
//! by chunk size, not a global semaphore. A failing file never aborts the
//! pass: failures are collected per file and reported in one summary.
//!
//! Only an unreadable root is fatal ([`DiscoveryError::RootUnreadable`]).
//!
//! Catalog building is deterministic: results are re-ordered to
//! directory-listing order before grouping, and duplicate keys resolve
//! first-wins with a warning naming every colliding path.

pub mod controllers;
pub mod schemas;

use crate::loader::LoadError;
use crate::runtime_config::RuntimeConfig;
use may::coroutine;
use may::sync::mpsc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use controllers::{ControllerCatalog, ControllerDiscovery, ControllerRecord};
pub use schemas::{SchemaCatalog, SchemaDiscovery, SchemaRecord};

/// Fatal discovery failure. Per-file failures are never raised through
/// this type; they land in [`DiscoverySummary::failures`].
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read discovery root {root}: {source}")]
    RootUnreadable {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One isolated file failure.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub file: PathBuf,
    pub error: String,
}

/// Outcome counters for one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySummary {
    /// Files that matched the naming convention and were processed.
    pub processed: usize,
    /// Records that made it into the catalog.
    pub found: usize,
    pub failures: Vec<FileFailure>,
}

/// Which convention a file matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConventionKind {
    Controller,
    Schema,
}

impl ConventionKind {
    fn dir_name(self) -> &'static str {
        match self {
            ConventionKind::Controller => "controllers",
            ConventionKind::Schema => "schemas",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            ConventionKind::Controller => "-controller",
            ConventionKind::Schema => "-schema",
        }
    }
}

/// Identity extracted from a convention-compliant path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionPath {
    pub module: String,
    pub name: String,
    pub kind: ConventionKind,
    pub file: PathBuf,
}

/// Parse `root`-relative structure out of `file`, or `None` when the path
/// does not match `{module}/{controllers|schemas}/{name}-{suffix}.*`.
pub fn parse_convention_path(root: &Path, file: &Path, kind: ConventionKind) -> Option<ConventionPath> {
    let relative = file.strip_prefix(root).ok()?;
    let mut components = relative.components();

    let module = components.next()?.as_os_str().to_str()?.to_string();
    let dir = components.next()?.as_os_str().to_str()?;
    let file_name = components.next()?.as_os_str().to_str()?;
    if components.next().is_some() || dir != kind.dir_name() {
        return None;
    }

    let stem = match file_name.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => file_name,
    };
    let name = stem.strip_suffix(kind.suffix())?;
    if name.is_empty() || module.is_empty() {
        return None;
    }

    Some(ConventionPath {
        module,
        name: name.to_string(),
        kind,
        file: file.to_path_buf(),
    })
}

/// Enumerate convention-matching files under `root`, in directory-listing
/// order. An unreadable root is fatal; everything below it is best-effort.
pub(crate) fn enumerate(root: &Path, kind: ConventionKind) -> Result<Vec<ConventionPath>, DiscoveryError> {
    let entries = std::fs::read_dir(root).map_err(|source| DiscoveryError::RootUnreadable {
        root: root.to_path_buf(),
        source,
    })?;

    let mut matches = Vec::new();
    for module_entry in entries.flatten() {
        let module_dir = module_entry.path();
        if !module_dir.is_dir() {
            continue;
        }
        let kind_dir = module_dir.join(kind.dir_name());
        let files = match std::fs::read_dir(&kind_dir) {
            Ok(files) => files,
            Err(e) => {
                // A module without the conventional sub-directory is not an
                // error; it simply contributes nothing to this pass.
                debug!(dir = %kind_dir.display(), error = %e, "Skipping module sub-directory");
                continue;
            }
        };
        for file_entry in files.flatten() {
            let path = file_entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(parsed) = parse_convention_path(root, &path, kind) {
                matches.push(parsed);
            }
        }
    }
    Ok(matches)
}

/// Load every file through `load_one`, chunked, each file in its own
/// coroutine. Results come back indexed so callers can restore
/// directory-listing order before the deterministic catalog build.
pub(crate) fn load_files<T, F>(
    files: &[ConventionPath],
    config: &RuntimeConfig,
    load_one: Arc<F>,
) -> Vec<(ConventionPath, Result<T, LoadError>)>
where
    T: Send + 'static,
    F: Fn(&ConventionPath) -> Result<T, LoadError> + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel::<(usize, Result<T, LoadError>)>();
    let mut expected = 0usize;

    for chunk in files.chunks(config.chunk_size.max(1)) {
        for (offset, parsed) in chunk.iter().enumerate() {
            let idx = expected + offset;
            let parsed = parsed.clone();
            let co_tx = tx.clone();
            let load_one = Arc::clone(&load_one);
            let stack_size = config.stack_size;

            // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by
            // the may runtime. Discovery runs at startup, the closure is
            // Send + 'static, and every spawned coroutine reports exactly
            // once through the channel.
            #[allow(unsafe_code)]
            let spawn_result = unsafe {
                coroutine::Builder::new().stack_size(stack_size).spawn(move || {
                    let outcome =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| load_one(&parsed)));
                    let result = match outcome {
                        Ok(r) => r,
                        Err(panic) => Err(LoadError::Panicked {
                            message: format!("{panic:?}"),
                        }),
                    };
                    let _ = co_tx.send((idx, result));
                })
            };

            if let Err(e) = spawn_result {
                warn!(
                    file = %files[idx].file.display(),
                    error = %e,
                    "Failed to spawn discovery coroutine"
                );
                let _ = tx.send((
                    idx,
                    Err(LoadError::Failed {
                        path: files[idx].file.to_string_lossy().into_owned(),
                        message: format!("coroutine spawn failed: {e}"),
                    }),
                ));
            }
        }
        expected += chunk.len();
    }
    drop(tx);

    let mut indexed: Vec<(usize, Result<T, LoadError>)> = rx.into_iter().collect();
    indexed.sort_by_key(|(idx, _)| *idx);
    indexed
        .into_iter()
        .map(|(idx, result)| (files[idx].clone(), result))
        .collect()
}

/// Group loaded records into a catalog, first-wins on key collisions.
///
/// Returns the kept records plus the summary; a warning names every
/// colliding file path per duplicated key.
pub(crate) fn build_catalog<R>(
    loaded: Vec<(ConventionPath, Result<R, LoadError>)>,
    key_of: impl Fn(&ConventionPath) -> String,
    label: &str,
) -> (Vec<(String, ConventionPath, R)>, DiscoverySummary) {
    let mut summary = DiscoverySummary {
        processed: loaded.len(),
        ..DiscoverySummary::default()
    };
    let mut kept: Vec<(String, ConventionPath, R)> = Vec::new();
    let mut collisions: std::collections::HashMap<String, Vec<PathBuf>> =
        std::collections::HashMap::new();

    for (parsed, result) in loaded {
        match result {
            Ok(record) => {
                let key = key_of(&parsed);
                collisions
                    .entry(key.clone())
                    .or_default()
                    .push(parsed.file.clone());
                if kept.iter().any(|(k, _, _)| *k == key) {
                    continue;
                }
                kept.push((key, parsed, record));
            }
            Err(e) => {
                warn!(
                    file = %parsed.file.display(),
                    error = %e,
                    "Skipping {label} file"
                );
                summary.failures.push(FileFailure {
                    file: parsed.file,
                    error: e.to_string(),
                });
            }
        }
    }

    for (key, paths) in collisions.iter().filter(|(_, paths)| paths.len() > 1) {
        let listed: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        warn!(
            key = %key,
            files = ?listed,
            "Duplicate {label} key, keeping first discovered"
        );
    }

    summary.found = kept.len();
    info!(
        processed = summary.processed,
        found = summary.found,
        failures = summary.failures.len(),
        "{label} discovery complete"
    );
    (kept, summary)
}
