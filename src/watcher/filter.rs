//! Declarative path predicates and object resolvers.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which raw file paths a watcher cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", content = "value", rename_all = "snake_case")]
pub enum WatchFilter {
    Any,
    /// Exact file name, e.g. `rocketfile.yaml`.
    FileName(String),
    /// Any of these extensions, without the dot, compared case-insensitively.
    Extensions(Vec<String>),
}

impl WatchFilter {
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            WatchFilter::Any => true,
            WatchFilter::FileName(name) => path.file_name() == Some(OsStr::new(name)),
            WatchFilter::Extensions(extensions) => path
                .extension()
                .and_then(OsStr::to_str)
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))),
        }
    }
}

/// How a raw path maps to the object it belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectResolver {
    #[default]
    Identity,
    /// The containing directory, for objects described by a manifest file.
    Parent,
}

impl ObjectResolver {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match self {
            ObjectResolver::Identity => path.to_path_buf(),
            ObjectResolver::Parent => path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(path)
                .to_path_buf(),
        }
    }
}
