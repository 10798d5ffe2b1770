use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::ConfigError;
use crate::module_id::{normalize_path, to_slash};

/// Path patterns anchored at a root directory.
///
/// A path matches when it matches one of the globs, or lies anywhere below
/// one of them (so `lib/vendor` also covers `lib/vendor/a/b.js`).
#[derive(Debug, Clone)]
pub struct PathMatcher {
    set: GlobSet,
}

impl Default for PathMatcher {
    fn default() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }
}

impl PathMatcher {
    pub fn new<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let anchored = to_slash(&normalize_path(&root.join(pattern)));
            let below = format!("{}/**", anchored.trim_end_matches('/'));
            for glob in [anchored.as_str(), below.as_str()] {
                let glob = Glob::new(glob).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
                builder.add(glob);
            }
        }
        let set = builder
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: patterns
                    .iter()
                    .map(|p| p.as_ref())
                    .collect::<Vec<_>>()
                    .join(", "),
                source,
            })?;
        Ok(Self { set })
    }

    pub fn is_match(&self, path: &Path) -> bool {
        if self.set.is_empty() {
            return false;
        }
        self.set.is_match(to_slash(&normalize_path(path)))
    }
}
