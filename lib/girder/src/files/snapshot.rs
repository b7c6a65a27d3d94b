//! Snapshot types describing a project's folders and files at a point in
//! time, and the coalescing fold that re-parents nested roots into their
//! ancestors.

use hashbrown::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Details for one gathered file: its root-relative name, modification time
/// in floating point seconds, and the content digest (absent when hashing
/// was skipped).
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub name: String,
    pub last_modified: f64,
    pub digest: Option<String>,
}

/// Everything gathered under one build root. A `None` record marks a file
/// that was seen in the walk but could not be opened or stat'd.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderSnapshot {
    pub root: PathBuf,
    pub files: HashMap<String, Option<FileRecord>>,
}

impl FolderSnapshot {
    pub fn new<P: Into<PathBuf>>(root: P) -> FolderSnapshot {
        FolderSnapshot {
            root: root.into(),
            files: HashMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Snapshot of the whole project, keyed by root path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectSnapshot {
    pub folders: HashMap<PathBuf, FolderSnapshot>,
}

impl ProjectSnapshot {
    pub fn new() -> ProjectSnapshot {
        ProjectSnapshot::default()
    }

    pub fn insert(&mut self, folder: FolderSnapshot) {
        self.folders.insert(folder.root.clone(), folder);
    }

    /// Root paths in (parent, basename) order; the ordering used for build
    /// ids and for deterministic folds.
    pub fn sorted_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.folders.keys().cloned().collect();
        roots.sort_by(|a, b| path_order(a).cmp(&path_order(b)));
        roots
    }

    /// Folds the snapshot so no root is a path-prefix of another: a root
    /// nested under an already-placed ancestor is absorbed into it, its files
    /// renamed with the intervening segments prepended. Roots are folded in
    /// sorted (parent, basename) order, so ancestors always land first.
    pub fn coalesce(mut self) -> ProjectSnapshot {
        let roots = self.sorted_roots();
        let mut folded = ProjectSnapshot::new();

        for root in roots {
            let folder = self
                .folders
                .remove(&root)
                .expect("sorted roots come from this snapshot");

            let ancestor = folded
                .folders
                .keys()
                .find(|placed| root.starts_with(placed))
                .map(|placed| placed.to_path_buf());

            match ancestor {
                None => {
                    folded.folders.insert(root, folder);
                }
                Some(ancestor_root) => {
                    let suffix = root
                        .strip_prefix(&ancestor_root)
                        .expect("ancestor is a path prefix")
                        .to_path_buf();

                    let target = folded
                        .folders
                        .get_mut(&ancestor_root)
                        .expect("ancestor was just found");

                    for (name, record) in folder.files {
                        let new_name = suffix.join(&name).to_string_lossy().into_owned();
                        let record = record.map(|mut record| {
                            record.name = new_name.clone();
                            record
                        });
                        target.files.insert(new_name, record);
                    }
                }
            }
        }

        folded
    }
}

/// Orders paths by (parent, basename).
pub(crate) fn path_order(path: &Path) -> (PathBuf, OsString) {
    (
        path.parent().map(Path::to_path_buf).unwrap_or_default(),
        path.file_name().map(OsString::from).unwrap_or_default(),
    )
}
