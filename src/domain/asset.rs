//! Asset provisioning units and manifests.
//!
//! Manifests are plain JSON objects. Extension manifests map a directory name
//! to an ordered list of candidate repository URLs; asset manifests map a
//! category directory to a list of download URLs.
//!
//! Keys become directory names on the volume. A key that is not a single
//! plain path component is rejected on its own; the rest of the manifest
//! stays usable.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Extension,
    Binary,
}

impl AssetKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    /// Destination already existed; nothing fetched.
    Skipped,
    /// Fetched from the named source.
    Completed { source: String },
    Failed { reason: String },
}

impl AssetStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One fetch-if-absent unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetTask {
    pub kind: AssetKind,
    /// Manifest key (extension name or asset category).
    pub label: String,
    pub sources: Vec<String>,
    pub destination: PathBuf,
    pub status: AssetStatus,
}

impl AssetTask {
    #[must_use]
    pub fn new(
        kind: AssetKind,
        label: impl Into<String>,
        sources: Vec<String>,
        destination: PathBuf,
    ) -> Self {
        Self {
            kind,
            label: label.into(),
            sources,
            destination,
            status: AssetStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(url) => vec![url],
            OneOrMany::Many(urls) => urls,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Entries {
    valid: BTreeMap<String, Vec<String>>,
    rejected: Vec<String>,
}

fn parse_manifest(json: &str) -> Result<Entries> {
    let raw: BTreeMap<String, OneOrMany> = serde_json::from_str(json)?;
    let mut entries = Entries::default();
    for (key, value) in raw {
        if validate_key(&key).is_err() {
            entries.rejected.push(key);
            continue;
        }
        let urls: Vec<String> = Vec::from(value)
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        entries.valid.insert(key, urls);
    }
    Ok(entries)
}

/// Keys become directory names on the volume; refuse anything that escapes.
fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let single_component = path.components().count() == 1
        && matches!(path.components().next(), Some(std::path::Component::Normal(_)));
    if key.trim().is_empty() || !single_component {
        return Err(Error::Manifest(format!("invalid manifest key '{key}'")));
    }
    Ok(())
}

/// `{extension name -> ordered candidate URLs}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionManifest {
    entries: BTreeMap<String, Vec<String>>,
    rejected: Vec<String>,
}

impl ExtensionManifest {
    /// Parse a manifest, setting aside keys that are not plain names.
    ///
    /// # Errors
    ///
    /// Returns an error only when the document is not a JSON object of
    /// URL strings or lists.
    pub fn parse(json: &str) -> Result<Self> {
        let Entries { valid, rejected } = parse_manifest(json)?;
        Ok(Self {
            entries: valid,
            rejected,
        })
    }

    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            entries,
            rejected: Vec::new(),
        }
    }

    /// Keys dropped because they would escape the target directory.
    #[must_use]
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    /// One task per extension, destined for `base/<name>`.
    #[must_use]
    pub fn tasks(&self, base: &Path) -> Vec<AssetTask> {
        self.entries
            .iter()
            .map(|(name, candidates)| {
                AssetTask::new(
                    AssetKind::Extension,
                    name.clone(),
                    candidates.clone(),
                    base.join(name),
                )
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `{asset category -> download URLs}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
    entries: BTreeMap<String, Vec<String>>,
    rejected: Vec<String>,
}

impl AssetManifest {
    /// Parse a manifest, setting aside keys that are not plain names.
    ///
    /// # Errors
    ///
    /// Returns an error only when the document is not a JSON object of
    /// URL strings or lists.
    pub fn parse(json: &str) -> Result<Self> {
        let Entries { valid, rejected } = parse_manifest(json)?;
        Ok(Self {
            entries: valid,
            rejected,
        })
    }

    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            entries,
            rejected: Vec::new(),
        }
    }

    /// Keys dropped because they would escape the target directory.
    #[must_use]
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    /// One task per URL, destined for `base/<category>/<file name>`.
    ///
    /// URLs without a usable file name produce a failed task instead of an
    /// error so the rest of the batch still runs.
    #[must_use]
    pub fn tasks(&self, base: &Path) -> Vec<AssetTask> {
        let mut tasks = Vec::new();
        for (category, urls) in &self.entries {
            let dir = base.join(category);
            for url in urls {
                match file_name_from_url(url) {
                    Some(name) => tasks.push(AssetTask::new(
                        AssetKind::Binary,
                        category.clone(),
                        vec![url.clone()],
                        dir.join(name),
                    )),
                    None => {
                        let mut task =
                            AssetTask::new(AssetKind::Binary, category.clone(), vec![url.clone()], dir.clone());
                        task.status = AssetStatus::Failed {
                            reason: format!("cannot derive a file name from '{url}'"),
                        };
                        tasks.push(task);
                    }
                }
            }
        }
        tasks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Last non-empty path segment of a URL, ignoring query and fragment.
#[must_use]
pub fn file_name_from_url(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    let name = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// Outcome of one provisioning task (all entries of one manifest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub kind: AssetKind,
    pub items: Vec<AssetTask>,
    /// Every item reached a terminal status.
    pub complete: bool,
}

impl TaskReport {
    #[must_use]
    pub fn new(kind: AssetKind, items: Vec<AssetTask>) -> Self {
        let complete = items.iter().all(|item| item.status.is_terminal());
        Self {
            kind,
            items,
            complete,
        }
    }

    /// A task that could not run at all (e.g. it panicked).
    #[must_use]
    pub fn aborted(kind: AssetKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
            complete: false,
        }
    }

    #[must_use]
    pub fn count(&self, predicate: impl Fn(&AssetStatus) -> bool) -> usize {
        self.items.iter().filter(|item| predicate(&item.status)).count()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, AssetStatus::Skipped))
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, AssetStatus::Completed { .. }))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, AssetStatus::Failed { .. }))
    }
}
