//! Walks the build roots, applies the filters and produces the project
//! snapshot the delta engine and the send path consume.

use crate::digest;
use crate::files::filter::FilterSpec;
use crate::files::snapshot::{FileRecord, FolderSnapshot, ProjectSnapshot};
use crate::files::{GatherError, GatherResult};
use plumb::time;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One folder taking part in the build, as the host's project settings
/// describe it: a path (absolute, or relative to the project anchor) plus its
/// filter lists.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FolderEntry {
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub filters: FilterSpec,
}

impl FolderEntry {
    pub fn new<P: Into<PathBuf>>(path: P) -> FolderEntry {
        FolderEntry {
            path: Some(path.into()),
            filters: FilterSpec::default(),
        }
    }

    pub fn with_filters<P: Into<PathBuf>>(path: P, filters: FilterSpec) -> FolderEntry {
        FolderEntry {
            path: Some(path.into()),
            filters,
        }
    }
}

/// Host-wide exclude lists, appended to every folder entry's own.
#[derive(Debug, Clone, Default)]
pub struct GlobalExcludes {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}

/// Gathers every folder entry into a snapshot and coalesces nested roots.
/// Structural problems (no path, unanchored relative path, bad pattern) are
/// errors; per-file trouble is recorded in the snapshot instead.
pub fn gather_project(
    entries: &[FolderEntry],
    anchor: Option<&Path>,
    globals: &GlobalExcludes,
    hash_files: bool,
) -> GatherResult<ProjectSnapshot> {
    let mut snapshot = ProjectSnapshot::new();

    for entry in entries {
        snapshot.insert(gather_folder(entry, anchor, globals, hash_files)?);
    }

    Ok(snapshot.coalesce())
}

/// Fallback for hosts with no project folders: a snapshot covering just the
/// file currently in front of the user.
pub fn gather_active_file(file: &Path, hash_files: bool) -> ProjectSnapshot {
    let mut snapshot = ProjectSnapshot::new();

    let (root, name) = match (file.parent(), file.file_name()) {
        (Some(root), Some(name)) => (root, name.to_string_lossy().into_owned()),
        _ => return snapshot,
    };

    let mut folder = FolderSnapshot::new(root);
    folder
        .files
        .insert(name.clone(), file_details(root, &name, hash_files));

    snapshot.insert(folder);
    snapshot
}

fn gather_folder(
    entry: &FolderEntry,
    anchor: Option<&Path>,
    globals: &GlobalExcludes,
    hash_files: bool,
) -> GatherResult<FolderSnapshot> {
    let path = entry.path.as_ref().ok_or(GatherError::MissingPath)?;

    let root = if path.is_absolute() {
        path.clone()
    } else {
        match anchor {
            Some(anchor) => anchor.join(path),
            None => return Err(GatherError::Unanchored(path.clone())),
        }
    };

    let mut spec = entry.filters.clone();
    spec.extend_excludes(&globals.files, &globals.folders);
    let filter = spec.compile()?;

    let mut folder = FolderSnapshot::new(root.clone());

    let walker = WalkDir::new(&root).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || filter.keep_folder(&entry.file_name().to_string_lossy())
    });

    for entry in walker {
        // Directories that vanish or refuse access mid-walk are simply not
        // part of the build.
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .strip_prefix(&root)
            .expect("walker stays under its root")
            .to_string_lossy()
            .into_owned();

        if !filter.keep_file(&name) {
            continue;
        }

        folder
            .files
            .insert(name.clone(), file_details(&root, &name, hash_files));
    }

    Ok(folder)
}

/// Stats (and optionally hashes) one file. Any failure along the way yields
/// `None`: the file stays in the mapping, flagged unreadable.
fn file_details(root: &Path, name: &str, hash_files: bool) -> Option<FileRecord> {
    let path = root.join(name);

    let metadata = path.metadata().ok()?;
    let modified = metadata.modified().ok()?;

    let digest = if hash_files {
        let mut file = File::open(&path).ok()?;
        Some(digest::stream(&mut file).ok()?)
    } else {
        None
    };

    Some(FileRecord {
        name: name.to_string(),
        last_modified: time::system_time_secs(modified),
        digest,
    })
}
