use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::filter::PathMatcher;
use crate::module_id::normalize_path;

// -----------------------------------------------------------------------------
// Raw options (as written in a build config)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Root that module ids are computed from, relative to `project_root`
    /// when one is set and to the cwd otherwise.
    pub base_url: Option<String>,
    pub prefix: Option<String>,
    /// Files left untouched, relative to the base directory.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub alias: Vec<AliasOptions>,
    /// Files whose `define` calls carry no id.
    pub anonymous_module: Option<AnonymousModule>,
    /// Root for static resources such as JSON.
    pub static_base_url: Option<String>,
    pub use_md5: Option<UseMd5>,
    pub project_root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasOptions {
    pub module_id: String,
    /// Relative to the project root.
    pub path: String,
    #[serde(default)]
    pub prefix: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnonymousModule {
    All(bool),
    Paths(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UseMd5 {
    Enabled(bool),
    Detailed {
        #[serde(rename = "useMd5", default)]
        enabled: bool,
        // older configs spell it `exlude`
        #[serde(default, alias = "exlude")]
        exclude: Vec<String>,
    },
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn into_policy(self) -> Result<Policy, ConfigError> {
        Policy::from_options(self)
    }
}

// -----------------------------------------------------------------------------
// Normalized policy
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub identifier: String,
    /// Absolute, normalized.
    pub path: PathBuf,
    pub applies_prefix: bool,
}

#[derive(Debug, Clone, Default)]
pub enum RemoveIdentifier {
    #[default]
    Never,
    Always,
    Matching(PathMatcher),
}

impl RemoveIdentifier {
    pub fn applies_to(&self, path: &Path) -> bool {
        match self {
            RemoveIdentifier::Never => false,
            RemoveIdentifier::Always => true,
            RemoveIdentifier::Matching(m) => m.is_match(path),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Uniqueness {
    pub enabled: bool,
    pub exclude: PathMatcher,
}

/// Identifier resolution policy shared read-only by every file of a run.
#[derive(Debug, Clone)]
pub struct Policy {
    pub project_root: PathBuf,
    /// `None` resolves ids against each file's own directory.
    pub base_directory: Option<PathBuf>,
    pub static_base_directory: Option<PathBuf>,
    pub prefix: String,
    pub aliases: Vec<Alias>,
    pub exclude: PathMatcher,
    pub remove_identifier: RemoveIdentifier,
    pub uniqueness: Uniqueness,
}

impl Policy {
    /// Policy with only a base directory and a prefix configured.
    pub fn new(base_directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        let base = normalize_path(&base_directory.into());
        Self {
            project_root: base.clone(),
            base_directory: Some(base),
            static_base_directory: None,
            prefix: prefix.into(),
            aliases: vec![],
            exclude: PathMatcher::default(),
            remove_identifier: RemoveIdentifier::Never,
            uniqueness: Uniqueness::default(),
        }
    }

    pub fn from_options(options: Options) -> Result<Self, ConfigError> {
        let explicit_root = match options.project_root.as_deref() {
            Some(root) => Some(normalize_path(&absolute(Path::new(root))?)),
            None => None,
        };
        let project_root = match (&explicit_root, options.base_url.as_deref()) {
            (Some(root), _) => root.clone(),
            (None, Some(base)) => normalize_path(&absolute(Path::new(base))?),
            (None, None) => normalize_path(&std::env::current_dir().map_err(ConfigError::CurrentDir)?),
        };
        let resolve = |p: &str| normalize_path(&project_root.join(p));
        // Base directories follow `projectRoot` when one is given, the cwd otherwise.
        let locate = |p: &str| -> Result<PathBuf, ConfigError> {
            match &explicit_root {
                Some(root) => Ok(normalize_path(&root.join(p))),
                None => Ok(normalize_path(&absolute(Path::new(p))?)),
            }
        };

        let base_directory = options.base_url.as_deref().map(locate).transpose()?;
        let static_base_directory = options.static_base_url.as_deref().map(locate).transpose()?;
        let aliases = options
            .alias
            .iter()
            .map(|a| Alias {
                identifier: a.module_id.clone(),
                path: resolve(&a.path),
                applies_prefix: a.prefix,
            })
            .collect();

        let root = base_directory.clone().unwrap_or_else(|| project_root.clone());
        let exclude = PathMatcher::new(&root, &options.exclude)?;
        let remove_identifier = match options.anonymous_module {
            None | Some(AnonymousModule::All(false)) => RemoveIdentifier::Never,
            Some(AnonymousModule::All(true)) => RemoveIdentifier::Always,
            Some(AnonymousModule::Paths(paths)) => {
                RemoveIdentifier::Matching(PathMatcher::new(&root, &paths)?)
            }
        };
        let uniqueness = match options.use_md5 {
            None => Uniqueness::default(),
            Some(UseMd5::Enabled(enabled)) => Uniqueness {
                enabled,
                exclude: PathMatcher::default(),
            },
            Some(UseMd5::Detailed { enabled, exclude }) => Uniqueness {
                enabled,
                exclude: PathMatcher::new(&root, &exclude)?,
            },
        };

        Ok(Self {
            project_root,
            base_directory,
            static_base_directory,
            prefix: options.prefix.unwrap_or_default(),
            aliases,
            exclude,
            remove_identifier,
            uniqueness,
        })
    }

    /// Files the pipeline should pass through untouched.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.is_match(path)
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .map_err(ConfigError::CurrentDir)?
        .join(path))
}
