//! Computes the add/remove/modify instruction set that turns a peer's
//! reported file state into ours.

use crate::files::snapshot::{FileRecord, ProjectSnapshot};
use hashbrown::HashMap;
use std::path::PathBuf;

/// Instructions for one folder. The three maps are pairwise disjoint; `add`
/// and `modify` carry our records, `remove` carries theirs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderDelta {
    pub add: HashMap<String, Option<FileRecord>>,
    pub remove: HashMap<String, Option<FileRecord>>,
    pub modify: HashMap<String, Option<FileRecord>>,
}

impl FolderDelta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.modify.is_empty()
    }
}

/// The full instruction set, per folder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectDelta {
    pub folders: HashMap<PathBuf, FolderDelta>,
}

impl ProjectDelta {
    pub fn is_empty(&self) -> bool {
        self.folders.values().all(FolderDelta::is_empty)
    }
}

/// Diffs two snapshots. Files only we have are added; files only they have
/// are removed; shared files are modified when the content digests differ.
/// Matching digests win over mtime drift, and a missing digest (or a whole
/// record lost to an unreadable file) on either side is treated as a
/// modification, since there is nothing sound to compare.
pub fn fileset_delta(us: &ProjectSnapshot, them: &ProjectSnapshot) -> ProjectDelta {
    let mut delta = ProjectDelta::default();

    for (root, ours) in &us.folders {
        let mut folder = FolderDelta::default();

        match them.folders.get(root) {
            None => {
                // They know nothing of this folder; everything is an add.
                folder.add = ours.files.clone();
            }
            Some(theirs) => {
                for (name, record) in &ours.files {
                    match theirs.files.get(name) {
                        None => {
                            folder.add.insert(name.clone(), record.clone());
                        }
                        Some(their_record) => {
                            if changed(record, their_record) {
                                folder.modify.insert(name.clone(), record.clone());
                            }
                        }
                    }
                }

                for (name, record) in &theirs.files {
                    if !ours.files.contains_key(name) {
                        folder.remove.insert(name.clone(), record.clone());
                    }
                }
            }
        }

        delta.folders.insert(root.clone(), folder);
    }

    // Folders only the peer has are torn down wholesale.
    for (root, theirs) in &them.folders {
        if !us.folders.contains_key(root) {
            delta.folders.insert(
                root.clone(),
                FolderDelta {
                    add: HashMap::new(),
                    remove: theirs.files.clone(),
                    modify: HashMap::new(),
                },
            );
        }
    }

    delta
}

fn changed(ours: &Option<FileRecord>, theirs: &Option<FileRecord>) -> bool {
    match (ours, theirs) {
        (Some(ours), Some(theirs)) => match (&ours.digest, &theirs.digest) {
            (Some(our_digest), Some(their_digest)) => our_digest != their_digest,
            // No digest to compare; assume the worst.
            _ => true,
        },
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::snapshot::FolderSnapshot;
    use std::path::Path;

    fn record(name: &str, digest: Option<&str>, mtime: f64) -> Option<FileRecord> {
        Some(FileRecord {
            name: name.to_string(),
            last_modified: mtime,
            digest: digest.map(str::to_string),
        })
    }

    fn folder(root: &str, files: &[(&str, Option<&str>)]) -> FolderSnapshot {
        let mut folder = FolderSnapshot::new(root);
        for (name, digest) in files {
            folder
                .files
                .insert(name.to_string(), record(name, *digest, 1.0));
        }
        folder
    }

    fn snapshot(folders: Vec<FolderSnapshot>) -> ProjectSnapshot {
        let mut snapshot = ProjectSnapshot::new();
        for folder in folders {
            snapshot.insert(folder);
        }
        snapshot
    }

    fn sorted_keys(map: &HashMap<String, Option<FileRecord>>) -> Vec<String> {
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_add_remove_modify() {
        let us = snapshot(vec![folder(
            "/r",
            &[("a", Some("h1")), ("b", Some("h2"))],
        )]);
        let them = snapshot(vec![folder(
            "/r",
            &[("b", Some("h3")), ("c", Some("h4"))],
        )]);

        let delta = fileset_delta(&us, &them);
        let folder = &delta.folders[Path::new("/r")];

        assert_eq!(sorted_keys(&folder.add), vec!["a"]);
        assert_eq!(sorted_keys(&folder.remove), vec!["c"]);
        assert_eq!(sorted_keys(&folder.modify), vec!["b"]);

        // add/modify carry our records, remove carries theirs.
        assert_eq!(folder.add["a"].as_ref().unwrap().digest.as_deref(), Some("h1"));
        assert_eq!(folder.modify["b"].as_ref().unwrap().digest.as_deref(), Some("h2"));
        assert_eq!(folder.remove["c"].as_ref().unwrap().digest.as_deref(), Some("h4"));
    }

    #[test]
    fn test_folder_only_ours_is_all_adds() {
        let us = snapshot(vec![folder("/new", &[("a", Some("h1"))])]);
        let them = snapshot(vec![]);

        let delta = fileset_delta(&us, &them);
        let folder = &delta.folders[Path::new("/new")];

        assert_eq!(sorted_keys(&folder.add), vec!["a"]);
        assert!(folder.remove.is_empty());
        assert!(folder.modify.is_empty());
    }

    #[test]
    fn test_folder_only_theirs_is_all_removes() {
        let us = snapshot(vec![]);
        let them = snapshot(vec![folder("/stale", &[("old", Some("h9"))])]);

        let delta = fileset_delta(&us, &them);
        let folder = &delta.folders[Path::new("/stale")];

        assert!(folder.add.is_empty());
        assert_eq!(sorted_keys(&folder.remove), vec!["old"]);
    }

    #[test]
    fn test_equal_digests_ignore_mtime() {
        let mut us = snapshot(vec![]);
        let mut ours = FolderSnapshot::new("/r");
        ours.files
            .insert("a".to_string(), record("a", Some("same"), 100.0));
        us.insert(ours);

        let mut them = snapshot(vec![]);
        let mut theirs = FolderSnapshot::new("/r");
        theirs
            .files
            .insert("a".to_string(), record("a", Some("same"), 999.0));
        them.insert(theirs);

        let delta = fileset_delta(&us, &them);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_missing_digest_is_conservative_modify() {
        let us = snapshot(vec![folder("/r", &[("a", None)])]);
        let them = snapshot(vec![folder("/r", &[("a", Some("h1"))])]);

        let delta = fileset_delta(&us, &them);
        assert_eq!(
            sorted_keys(&delta.folders[Path::new("/r")].modify),
            vec!["a"]
        );
    }

    #[test]
    fn test_unreadable_record_is_conservative_modify() {
        let mut ours = FolderSnapshot::new("/r");
        ours.files.insert("a".to_string(), None);
        let us = snapshot(vec![ours]);

        let them = snapshot(vec![folder("/r", &[("a", Some("h1"))])]);

        let delta = fileset_delta(&us, &them);
        assert_eq!(
            sorted_keys(&delta.folders[Path::new("/r")].modify),
            vec!["a"]
        );
    }

    #[test]
    fn test_sets_pairwise_disjoint_and_apply_restores() {
        let us = snapshot(vec![
            folder(
                "/r",
                &[("a", Some("h1")), ("b", Some("h2")), ("d", Some("h5"))],
            ),
            folder("/fresh", &[("n", Some("h6"))]),
        ]);
        let them = snapshot(vec![
            folder(
                "/r",
                &[("b", Some("h3")), ("c", Some("h4")), ("d", Some("h5"))],
            ),
            folder("/stale", &[("gone", Some("h7"))]),
        ]);

        let delta = fileset_delta(&us, &them);

        for folder in delta.folders.values() {
            for name in folder.add.keys() {
                assert!(!folder.remove.contains_key(name));
                assert!(!folder.modify.contains_key(name));
            }
            for name in folder.remove.keys() {
                assert!(!folder.modify.contains_key(name));
            }
        }

        // Applying the delta to their snapshot reproduces ours under
        // (name, digest) equality.
        let mut rebuilt = them.clone();
        for (root, folder) in &delta.folders {
            let target = rebuilt
                .folders
                .entry(root.clone())
                .or_insert_with(|| FolderSnapshot::new(root.clone()));

            for name in folder.remove.keys() {
                target.files.remove(name);
            }
            for (name, record) in folder.add.iter().chain(folder.modify.iter()) {
                target.files.insert(name.clone(), record.clone());
            }
        }
        rebuilt.folders.retain(|_, folder| !folder.files.is_empty());

        let digests = |snapshot: &ProjectSnapshot| {
            let mut flat: Vec<(PathBuf, String, Option<String>)> = snapshot
                .folders
                .iter()
                .flat_map(|(root, folder)| {
                    folder.files.iter().map(move |(name, record)| {
                        (
                            root.clone(),
                            name.clone(),
                            record.as_ref().and_then(|r| r.digest.clone()),
                        )
                    })
                })
                .collect();
            flat.sort();
            flat
        };

        assert_eq!(digests(&rebuilt), digests(&us));
    }
}
