use thiserror::Error;

/// Failures that abort the rewrite of a single file.
///
/// None of these cross file boundaries: the caller logs them and passes the
/// original text through.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("malformed `define` call at offset {offset}: {reason}")]
    MalformedDeclaration { offset: usize, reason: &'static str },

    #[error("overlapping edits: {start}..{end} begins before offset {cursor}")]
    OverlappingEdits {
        start: usize,
        end: usize,
        cursor: usize,
    },

    #[error("source is too large to index ({len} bytes)")]
    SourceTooLarge { len: usize },
}

/// Failures while turning raw options into a [`crate::Policy`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid path pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("cannot determine the current directory")]
    CurrentDir(#[source] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
