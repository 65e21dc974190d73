//! `FileTracker` — reference-counts the on-disk fragment files shared across
//! tablets (§4.7).
//!
//! A fragment stays on disk as long as any tablet still points at it as a
//! live member of its stack. Ordinarily that's one tablet, but a split
//! hands the parent's stack to both children until they each compact
//! independently, so a straight "delete on supersede" rule isn't safe
//! here — deleting on the first release would pull the file out from under
//! the sibling still using it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

/// Tracks how many tablets currently reference each fragment file path.
/// A path with a zero count is unlinked immediately.
#[derive(Debug, Default)]
pub struct FileTracker {
    counts: Mutex<HashMap<PathBuf, usize>>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self { counts: Mutex::new(HashMap::new()) }
    }

    /// Register a newly created fragment file with one reference. Call this
    /// once, right after a fragment is durably written.
    pub fn track(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut counts = self.counts.lock().unwrap();
        *counts.entry(path).or_insert(0) += 1;
    }

    /// Add one more reference to an already-tracked path, e.g. when a split
    /// hands a fragment to both children's stacks.
    pub fn acquire(&self, path: &Path) {
        let mut counts = self.counts.lock().unwrap();
        match counts.get_mut(path) {
            Some(count) => *count += 1,
            None => {
                warn!(?path, "acquire on untracked fragment path, treating as first reference");
                counts.insert(path.to_path_buf(), 1);
            }
        }
    }

    /// Drop one reference. When the count reaches zero the file is unlinked
    /// from disk and the path is dropped from the table.
    pub fn release(&self, path: &Path) -> std::io::Result<()> {
        let should_delete = {
            let mut counts = self.counts.lock().unwrap();
            match counts.get_mut(path) {
                Some(count) => {
                    *count -= 1;
                    let zero = *count == 0;
                    if zero {
                        counts.remove(path);
                    }
                    zero
                }
                None => {
                    warn!(?path, "release on untracked fragment path, ignoring");
                    false
                }
            }
        };

        if should_delete {
            debug!(?path, "fragment refcount reached zero, removing file");
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Current reference count for a path, for tests and diagnostics.
    pub fn count(&self, path: &Path) -> usize {
        self.counts.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Sweep a directory, deleting any file with the given extension that
    /// isn't present in `live`. Run once at startup against the set of
    /// fragment paths every loaded tablet's config actually references, to
    /// reclaim files orphaned by a crash between fragment creation and
    /// config snapshot.
    pub fn sweep_orphans(
        &self,
        dir: impl AsRef<Path>,
        extension: &str,
        live: impl IntoIterator<Item = PathBuf>,
    ) -> std::io::Result<()> {
        let live: std::collections::HashSet<PathBuf> = live.into_iter().collect();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file()
                && path.extension().and_then(|s| s.to_str()) == Some(extension)
                && !live.contains(&path)
            {
                debug!(?path, "removing orphaned fragment file");
                fs::remove_file(&path)?;
            }
        }
        for path in live {
            self.counts.lock().unwrap().entry(path).or_insert(1);
        }
        Ok(())
    }
}
