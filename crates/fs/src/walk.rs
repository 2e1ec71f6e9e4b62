//! Directory walking.
//!
//! Both walkers yield regular files only, never follow symbolic links, and
//! visit entries in lexicographic order so staging order (and therefore WAL
//! sequence numbers) is deterministic across runs.

use crate::error::{ErrorKind, Result};
use crate::matcher::IgnoreRules;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Lazily yield every regular file under `root` that survives the ignore
/// rules. Ignored directories are pruned without descending into them.
///
/// The iterator is restartable in the sense that calling `walk` again
/// produces a fresh traversal from the filesystem's current state.
pub fn walk<'a>(root: &Path, rules: &'a IgnoreRules) -> impl Iterator<Item = Result<PathBuf>> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                return false;
            }
            !rules.is_ignored(entry.path(), file_type.is_dir())
        })
        .filter_map(yield_regular_files)
}

/// Like [`walk`] but without ignore filtering; `status` uses this so it can
/// report ignored files as IGNORED instead of not at all.
pub fn walk_unfiltered(root: &Path) -> impl Iterator<Item = Result<PathBuf>> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !entry.file_type().is_symlink())
        .filter_map(yield_regular_files)
}

fn yield_regular_files(entry: walkdir::Result<walkdir::DirEntry>) -> Option<Result<PathBuf>> {
    match entry {
        Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
        Ok(_) => None,
        Err(e) => Some(Err(exn::Exn::from(ErrorKind::Io(e.into())))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::IGNORE_FILE_NAME;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    fn collect_relative(iter: impl Iterator<Item = Result<PathBuf>>, root: &Path) -> Vec<String> {
        iter.map(|r| r.unwrap().strip_prefix(root).unwrap().to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_walk_yields_files_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.txt");
        touch(dir.path(), "a.txt");
        touch(dir.path(), "sub/c.txt");
        let rules = IgnoreRules::empty(dir.path());
        let files = collect_relative(walk(dir.path(), &rules), dir.path());
        assert_eq!(files, ["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_walk_applies_ignore_rules() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "keep.txt");
        touch(dir.path(), "skip.log");
        touch(dir.path(), "target/deep/artifact");
        let rules = IgnoreRules::compile(dir.path(), &["*.log".to_string(), "target/".to_string()]).unwrap();
        let files = collect_relative(walk(dir.path(), &rules), dir.path());
        assert_eq!(files, ["keep.txt"]);
    }

    #[test]
    fn test_walk_honors_nested_btignore() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "sub/wanted.txt");
        touch(dir.path(), "sub/cache.bin");
        std::fs::write(dir.path().join("sub").join(IGNORE_FILE_NAME), "cache.bin\n").unwrap();
        let rules = IgnoreRules::empty(dir.path());
        let files = collect_relative(walk(dir.path(), &rules), dir.path());
        assert_eq!(files, [format!("sub/{IGNORE_FILE_NAME}"), "sub/wanted.txt".to_string()]);
    }

    #[test]
    fn test_walk_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "real.txt");
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt")).unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        let rules = IgnoreRules::empty(dir.path());
        let files = collect_relative(walk(dir.path(), &rules), dir.path());
        assert_eq!(files, ["real.txt"]);
    }

    #[test]
    fn test_walk_unfiltered_includes_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.log");
        touch(dir.path(), "b.txt");
        let files = collect_relative(walk_unfiltered(dir.path()), dir.path());
        assert_eq!(files, ["a.log", "b.txt"]);
    }

    #[test]
    fn test_walk_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "one.txt");
        let rules = IgnoreRules::empty(dir.path());
        assert_eq!(walk(dir.path(), &rules).count(), 1);
        touch(dir.path(), "two.txt");
        assert_eq!(walk(dir.path(), &rules).count(), 2);
    }
}
