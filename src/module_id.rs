use std::path::{Component, Path, PathBuf};

use md5::{Digest, Md5};
use tracing::warn;

use crate::options::{Alias, Policy};

/// Hex digits of the content hash kept in a uniqueness suffix.
pub const SUFFIX_LEN: usize = 7;

const RUNTIME_EXTENSION: &str = "js";
const SOURCE_EXTENSION: &str = "ts";
/// Extensions resolved against the static base directory, when one is set.
const STATIC_EXTENSIONS: &[&str] = &["json"];

// -----------------------------------------------------------------------------
// Path helpers
// -----------------------------------------------------------------------------

/// Lexically resolve `.` and `..` without touching the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` expressed relative to `base`; both are expected to be normalized.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component> = path.components().collect();
    let base: Vec<Component> = base.components().collect();
    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for comp in &path[common..] {
        out.push(comp.as_os_str());
    }
    out
}

pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn strip_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.with_extension("")
    } else {
        path.to_path_buf()
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

/// The authored source file a runtime module is compiled from
/// (`foo.js` -> `foo.ts`, `foo` -> `foo.ts`). Other resources have none.
pub fn source_sibling(path: &Path) -> Option<PathBuf> {
    match path.extension() {
        None => {
            let mut s = path.as_os_str().to_owned();
            s.push(".");
            s.push(SOURCE_EXTENSION);
            Some(PathBuf::from(s))
        }
        Some(ext) if ext == RUNTIME_EXTENSION || ext == SOURCE_EXTENSION => {
            Some(path.with_extension(SOURCE_EXTENSION))
        }
        Some(_) => None,
    }
}

/// `./x` and `../x`; anything else is a bare (external) reference.
pub fn is_relative(reference: &str) -> bool {
    reference.starts_with("./") || reference.starts_with("../")
}

fn with_prefix(prefix: &str, id: &str) -> String {
    if prefix.is_empty() {
        id.to_string()
    } else {
        format!("{prefix}/{id}")
    }
}

// -----------------------------------------------------------------------------
// Identifier computation
// -----------------------------------------------------------------------------

fn alias_id(aliases: &[Alias], target: &Path, prefix: &str) -> Option<String> {
    let key = strip_extension(target);
    aliases
        .iter()
        .find(|a| strip_extension(&a.path) == key)
        .map(|a| {
            if a.applies_prefix {
                with_prefix(prefix, &a.identifier)
            } else {
                a.identifier.clone()
            }
        })
}

/// Module id of `path`: an alias when one is configured for it, otherwise
/// the extension-less path relative to `base`, under `prefix`.
pub fn module_id(base: &Path, path: &Path, prefix: &str, aliases: &[Alias]) -> String {
    if let Some(id) = alias_id(aliases, path, prefix) {
        return id;
    }
    let rel = relative_to(&strip_extension(&normalize_path(path)), &normalize_path(base));
    with_prefix(prefix, &to_slash(&rel))
}

/// `_` plus the leading digits of the MD5 of the module's source file, or
/// nothing when suffixes are off, the path is excluded, or hashing fails.
pub fn uniqueness_suffix(policy: &Policy, path: &Path) -> String {
    let uniqueness = &policy.uniqueness;
    if !uniqueness.enabled || uniqueness.exclude.is_match(path) {
        return String::new();
    }
    let source = source_sibling(path).unwrap_or_else(|| path.to_path_buf());
    match std::fs::read(&source) {
        Ok(bytes) => {
            let digest = format!("{:x}", Md5::digest(&bytes));
            format!("_{}", &digest[..SUFFIX_LEN])
        }
        Err(err) => {
            warn!(file = %source.display(), error = %err, "cannot hash module source, id left without suffix");
            String::new()
        }
    }
}

/// Resolves references made from inside one file.
pub struct Resolver<'a> {
    policy: &'a Policy,
    file: &'a Path,
    dir: PathBuf,
}

impl<'a> Resolver<'a> {
    pub fn new(policy: &'a Policy, file: &'a Path) -> Self {
        let dir = file
            .parent()
            .map(normalize_path)
            .unwrap_or_default();
        Self { policy, file, dir }
    }

    pub fn file(&self) -> &'a Path {
        self.file
    }

    fn base(&self) -> &Path {
        self.policy.base_directory.as_deref().unwrap_or(&self.dir)
    }

    fn base_for(&self, target: &Path) -> &Path {
        let is_static = STATIC_EXTENSIONS.iter().any(|ext| has_extension(target, ext));
        match (&self.policy.static_base_directory, is_static) {
            (Some(static_base), true) => static_base,
            _ => self.base(),
        }
    }

    /// Canonical id of the file being rewritten, suffix included.
    pub fn own_id(&self) -> String {
        let mut id = module_id(self.base(), self.file, &self.policy.prefix, &self.policy.aliases);
        id.push_str(&uniqueness_suffix(self.policy, self.file));
        id
    }

    /// Id for a dependency string written in this file.
    ///
    /// References whose source file exists are project modules and always get
    /// the prefix and suffix. Relative references to missing files resolve by
    /// path alone; bare ones go through the alias table and are otherwise kept.
    pub fn resolve(&self, reference: &str) -> String {
        let target = normalize_path(&self.dir.join(reference));
        let policy = self.policy;

        if let Some(source) = source_sibling(&target).filter(|p| p.is_file()) {
            // Suffix exclusions name runtime files, as they do for the module's own id.
            let runtime = source.with_extension(RUNTIME_EXTENSION);
            let mut id = module_id(self.base(), &runtime, &policy.prefix, &policy.aliases);
            id.push_str(&uniqueness_suffix(policy, &runtime));
            return id;
        }
        if is_relative(reference) {
            module_id(self.base_for(&target), &target, &policy.prefix, &policy.aliases)
        } else {
            alias_id(&policy.aliases, &target, &policy.prefix)
                .unwrap_or_else(|| reference.to_string())
        }
    }
}
