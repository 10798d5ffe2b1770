//! Rewrites AMD `define`/`require` calls so that modules carry canonical,
//! path-derived ids and complete dependency arrays.
//!
//! ```text
//! define(function () { var bar = require('./bar'); });
//! // at <baseUrl>/foo.js with prefix "@my-module" becomes
//! define("@my-module/foo", ["require","@my-module/bar"], function (require) { var bar = require("@my-module/bar"); });
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

pub mod error;
pub mod filter;
pub mod ledger;
pub mod module_id;
pub mod options;
pub mod rewrite;
pub mod scope;

pub use error::{ConfigError, RewriteError};
pub use options::{Alias, Options, Policy, RemoveIdentifier, Uniqueness};
pub use rewrite::rewrite;

const SCRIPT_EXTENSION: &str = "js";

// -----------------------------------------------------------------------------
// Per-file pipeline
// -----------------------------------------------------------------------------

/// A file that could not be rewritten and was passed through as-is.
#[derive(Debug, thiserror::Error)]
#[error("{} compile error \n  |__{error}", .file.display())]
pub struct FileWarning {
    pub file: PathBuf,
    #[source]
    pub error: RewriteError,
}

#[derive(Debug)]
pub struct Normalized {
    pub contents: String,
    pub warning: Option<FileWarning>,
}

impl Normalized {
    fn unchanged(contents: &str) -> Self {
        Self {
            contents: contents.to_string(),
            warning: None,
        }
    }
}

/// Normalize one file of a build.
///
/// Non-script and excluded files pass through. Rewrite failures never escape:
/// the original text comes back together with a warning.
#[instrument(level = "debug", skip_all, fields(file = %path.display()))]
pub fn normalize_file(policy: &Policy, path: &Path, contents: &str) -> Normalized {
    if !path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
        debug!("not a script, passed through");
        return Normalized::unchanged(contents);
    }
    if policy.is_excluded(path) {
        debug!("excluded, passed through");
        return Normalized::unchanged(contents);
    }

    match rewrite(policy, path, contents) {
        Ok(contents) => Normalized {
            contents,
            warning: None,
        },
        Err(error) => {
            let warning = FileWarning {
                file: path.to_path_buf(),
                error,
            };
            warn!(target: "amd", "{warning}");
            Normalized {
                contents: contents.to_string(),
                warning: Some(warning),
            }
        }
    }
}
