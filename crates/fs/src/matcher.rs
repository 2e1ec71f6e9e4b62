//! Ignore-rule engine.
//!
//! Two merged pattern sources, in increasing specificity:
//!
//! 1. Global patterns from the configuration (`ignore_list`), anchored at
//!    the tracked root.
//! 2. `.btignore` files at any depth beneath the root, each applying to its
//!    own level and below.
//!
//! Syntax follows gitignore conventions (`!` re-includes, trailing `/`
//! restricts to directories, `*` `?` `**` wildcards). When several sources
//! match a path, the closest-depth one wins; absent any match the path is
//! included.

use crate::error::{ErrorKind, Result};
use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Per-directory ignore file name, gitignore syntax.
pub const IGNORE_FILE_NAME: &str = ".btignore";

/// Compiled ignore rules for one tracked root.
///
/// `.btignore` matchers are compiled lazily per directory and cached by the
/// file's mtime, so an edited ignore file takes effect on the next path test
/// without a rebuild.
///
/// # Examples
///
/// ```
/// use bt_fs::IgnoreRules;
///
/// let dir = tempfile::tempdir().unwrap();
/// let rules = IgnoreRules::compile(dir.path(), &["*.tmp".to_string()]).unwrap();
/// assert!(rules.is_ignored(&dir.path().join("scratch.tmp"), false));
/// assert!(!rules.is_ignored(&dir.path().join("notes.txt"), false));
/// ```
pub struct IgnoreRules {
    root: PathBuf,
    global: Gitignore,
    cache: Mutex<HashMap<PathBuf, CachedMatcher>>,
}

struct CachedMatcher {
    /// mtime of the `.btignore` file when compiled; `None` when the file was
    /// absent or unreadable.
    modified: Option<SystemTime>,
    matcher: Option<Gitignore>,
}

impl IgnoreRules {
    /// Compile the global configuration patterns for a tracked root.
    pub fn compile(root: impl Into<PathBuf>, patterns: &[String]) -> Result<Self> {
        let root = root.into();
        let mut builder = GitignoreBuilder::new(&root);
        for line in patterns {
            builder
                .add_line(None, line)
                .map_err(|e| ErrorKind::InvalidPattern(format!("{line}: {e}")))?;
        }
        let global = builder.build().map_err(|e| ErrorKind::InvalidPattern(e.to_string()))?;
        Ok(Self {
            root,
            global,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Rules with no global patterns, only `.btignore` files.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        // Infallible: no patterns means nothing to fail compiling.
        Self::compile(root, &[]).expect("empty pattern list always compiles")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Test a path (absolute, under the root) against the merged rules.
    ///
    /// `is_dir` selects directory semantics for trailing-`/` patterns; when
    /// a directory is ignored the walker prunes its whole subtree.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            // The tracked root itself is never ignored.
            return false;
        }
        // Deepest .btignore first: the closest matching pattern decides.
        let mut dir = path.parent();
        while let Some(current) = dir {
            if let Some(matcher) = self.matcher_for(current) {
                match matcher.matched_path_or_any_parents(path, is_dir) {
                    Match::Ignore(_) => return true,
                    Match::Whitelist(_) => return false,
                    Match::None => {},
                }
            }
            if current == self.root {
                break;
            }
            dir = current.parent();
        }
        matches!(self.global.matched_path_or_any_parents(path, is_dir), Match::Ignore(_))
    }

    /// Cached compile of `<dir>/.btignore`, refreshed when its mtime moves.
    fn matcher_for(&self, dir: &Path) -> Option<Gitignore> {
        let file = dir.join(IGNORE_FILE_NAME);
        let modified = std::fs::metadata(&file).ok().and_then(|m| m.modified().ok());
        let mut cache = self.cache.lock().expect("ignore cache poisoned");
        if let Some(cached) = cache.get(dir)
            && cached.modified == modified
        {
            return cached.matcher.clone();
        }
        let matcher = modified.is_some().then(|| {
            let (matcher, err) = Gitignore::new(&file);
            if let Some(err) = err {
                tracing::warn!(file = %file.display(), error = %err, "skipping malformed ignore line");
            }
            matcher
        });
        cache.insert(
            dir.to_path_buf(),
            CachedMatcher {
                modified,
                matcher: matcher.clone(),
            },
        );
        matcher
    }
}
