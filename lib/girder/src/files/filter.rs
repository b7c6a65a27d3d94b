//! Include/exclude filtering for the gatherer. Patterns are fnmatch-style
//! globs; an empty include list accepts everything, and excludes always win.

use crate::files::{GatherError, GatherResult};
use glob::Pattern;
use serde_derive::{Deserialize, Serialize};

/// The four pattern lists a folder entry can carry. Folder patterns are
/// matched against each directory name as the walk descends and prune whole
/// subtrees; file patterns are matched against root-relative names.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FilterSpec {
    pub folder_include_patterns: Vec<String>,
    pub folder_exclude_patterns: Vec<String>,
    pub file_include_patterns: Vec<String>,
    pub file_exclude_patterns: Vec<String>,
}

impl FilterSpec {
    /// Appends the host-wide exclude lists. Entry-local patterns stay first,
    /// so ordering-sensitive hosts see their own patterns take effect first.
    pub fn extend_excludes(&mut self, files: &[String], folders: &[String]) {
        self.file_exclude_patterns.extend_from_slice(files);
        self.folder_exclude_patterns.extend_from_slice(folders);
    }

    pub(crate) fn compile(&self) -> GatherResult<CompiledFilter> {
        Ok(CompiledFilter {
            folder_include: compile_list(&self.folder_include_patterns)?,
            folder_exclude: compile_list(&self.folder_exclude_patterns)?,
            file_include: compile_list(&self.file_include_patterns)?,
            file_exclude: compile_list(&self.file_exclude_patterns)?,
        })
    }
}

fn compile_list(patterns: &[String]) -> GatherResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|err| GatherError::BadPattern {
                pattern: pattern.clone(),
                reason: err.msg.to_string(),
            })
        })
        .collect()
}

#[derive(Debug)]
pub(crate) struct CompiledFilter {
    folder_include: Vec<Pattern>,
    folder_exclude: Vec<Pattern>,
    file_include: Vec<Pattern>,
    file_exclude: Vec<Pattern>,
}

impl CompiledFilter {
    /// Should the walk descend into a directory with this name?
    pub(crate) fn keep_folder(&self, name: &str) -> bool {
        admit(&self.folder_include, &self.folder_exclude, name)
    }

    /// Should a file with this root-relative name join the build?
    pub(crate) fn keep_file(&self, relative_name: &str) -> bool {
        admit(&self.file_include, &self.file_exclude, relative_name)
    }
}

fn matches_any(patterns: &[Pattern], candidate: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(candidate))
}

fn admit(include: &[Pattern], exclude: &[Pattern], candidate: &str) -> bool {
    (include.is_empty() || matches_any(include, candidate))
        && !matches_any(exclude, candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(
        folder_include: &[&str],
        folder_exclude: &[&str],
        file_include: &[&str],
        file_exclude: &[&str],
    ) -> FilterSpec {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        FilterSpec {
            folder_include_patterns: owned(folder_include),
            folder_exclude_patterns: owned(folder_exclude),
            file_include_patterns: owned(file_include),
            file_exclude_patterns: owned(file_exclude),
        }
    }

    #[test]
    fn test_empty_includes_accept_everything() {
        let filter = spec(&[], &[], &[], &[]).compile().unwrap();

        assert!(filter.keep_file("anything.c"));
        assert!(filter.keep_folder("src"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = spec(&[], &[], &["*.c"], &["gen_*.c"]).compile().unwrap();

        assert!(filter.keep_file("main.c"));
        assert!(!filter.keep_file("gen_tables.c"));
        assert!(!filter.keep_file("readme.md"));
    }

    #[test]
    fn test_folder_patterns_match_names() {
        let filter = spec(&[], &[".git", "build*"], &[], &[]).compile().unwrap();

        assert!(filter.keep_folder("src"));
        assert!(!filter.keep_folder(".git"));
        assert!(!filter.keep_folder("build-debug"));
    }

    #[test]
    fn test_file_patterns_see_relative_paths() {
        let filter = spec(&[], &[], &[], &["*.o"]).compile().unwrap();

        assert!(!filter.keep_file("obj/deep/thing.o"));
        assert!(filter.keep_file("obj/deep/thing.c"));
    }

    #[test]
    fn test_extend_excludes_appends() {
        let mut spec = spec(&[], &["local"], &[], &["*.tmp"]);
        spec.extend_excludes(
            &["*.pyc".to_string()],
            &[".git".to_string()],
        );

        assert_eq!(spec.file_exclude_patterns, vec!["*.tmp", "*.pyc"]);
        assert_eq!(spec.folder_exclude_patterns, vec!["local", ".git"]);
    }

    #[test]
    fn test_bad_pattern_reported() {
        let result = spec(&[], &[], &["[unclosed"], &[]).compile();

        match result {
            Err(GatherError::BadPattern { pattern, .. }) => assert_eq!(pattern, "[unclosed"),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_from_project_settings() {
        let spec: FilterSpec = serde_json::from_str(
            r#"{"file_exclude_patterns": ["*.o"], "folder_exclude_patterns": [".git"]}"#,
        )
        .unwrap();

        assert_eq!(spec.file_exclude_patterns, vec!["*.o"]);
        assert!(spec.file_include_patterns.is_empty());
    }
}
