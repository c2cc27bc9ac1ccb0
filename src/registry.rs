//! Worker registry: the static catalog of specialist workers.
//!
//! The catalog is a TOML file with one `[[worker]]` table per worker:
//!
//! ```toml
//! [[worker]]
//! id = "backend"
//! summary = "Builds server-side features"
//! tags = ["rust", "api"]
//! kb_location = "kb/backend"
//! escalation_targets = ["architect"]
//! delegation_targets = ["tester"]
//! ```
//!
//! The registry is validated as a whole when loaded and is read-only
//! afterwards, so it can be shared freely behind an `Arc`.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// A capability descriptor for one specialist worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Worker {
    pub id: String,
    pub summary: String,
    /// Lower-cased capability tags.
    pub capability_tags: BTreeSet<String>,
    /// Knowledge-base directory, relative to the configured KB root.
    pub kb_location: PathBuf,
    /// Workers to hand a blocked task to, in priority order.
    pub escalation_targets: Vec<String>,
    /// Workers this worker may delegate sub-tasks to.
    pub delegation_targets: BTreeSet<String>,
}

impl Worker {
    /// Tags from `wanted` this worker declares, in sorted order.
    pub fn matching_tags(&self, wanted: &BTreeSet<String>) -> Vec<String> {
        self.capability_tags.intersection(wanted).cloned().collect()
    }
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default, rename = "worker")]
    workers: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    tags: Vec<String>,
    kb_location: Option<PathBuf>,
    #[serde(default)]
    escalation_targets: Vec<String>,
    #[serde(default)]
    delegation_targets: Vec<String>,
}

impl From<CatalogEntry> for Worker {
    fn from(entry: CatalogEntry) -> Self {
        let kb_location = entry
            .kb_location
            .unwrap_or_else(|| PathBuf::from("kb").join(&entry.id));
        Self {
            capability_tags: normalize_tags(&entry.tags),
            id: entry.id,
            summary: entry.summary,
            kb_location,
            escalation_targets: entry.escalation_targets,
            delegation_targets: entry.delegation_targets.into_iter().collect(),
        }
    }
}

/// Lower-case, trim and de-duplicate a tag list.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Validated, immutable catalog of workers.
#[derive(Debug, Clone)]
pub struct Registry {
    /// Sorted by id.
    workers: Vec<Worker>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Load and validate the catalog at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading worker registry");
        let text = fs::read_to_string(path).map_err(|e| Error::RegistryLoad {
            problems: vec![format!("cannot read {}: {}", path.display(), e)],
        })?;
        let registry = Self::from_toml_str(&text)?;
        info!(workers = registry.len(), path = %path.display(), "worker registry loaded");
        Ok(registry)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let catalog: Catalog = toml::from_str(text).map_err(|e| Error::RegistryLoad {
            problems: vec![format!("invalid catalog: {}", e)],
        })?;
        Self::from_workers(catalog.workers.into_iter().map(Worker::from).collect())
    }

    /// Validate a set of workers.
    ///
    /// Every problem is collected so a broken catalog can be fixed in one
    /// pass; nothing is partially loaded.
    pub fn from_workers(mut workers: Vec<Worker>) -> Result<Self> {
        let mut problems = Vec::new();
        let mut index = HashMap::new();

        workers.sort_by(|a, b| a.id.cmp(&b.id));
        for (i, worker) in workers.iter().enumerate() {
            if worker.id.trim().is_empty() {
                problems.push(format!("worker #{} has an empty id", i + 1));
                continue;
            }
            if index.insert(worker.id.clone(), i).is_some() {
                problems.push(format!("duplicate worker id '{}'", worker.id));
            }
        }

        for worker in &workers {
            for target in &worker.escalation_targets {
                if target == &worker.id {
                    problems.push(format!("worker '{}' escalates to itself", worker.id));
                } else if !index.contains_key(target) {
                    problems.push(format!(
                        "worker '{}' escalates to unknown worker '{}'",
                        worker.id, target
                    ));
                }
            }
            for target in &worker.delegation_targets {
                if !index.contains_key(target) {
                    problems.push(format!(
                        "worker '{}' delegates to unknown worker '{}'",
                        worker.id, target
                    ));
                }
            }
        }

        if !problems.is_empty() {
            return Err(Error::RegistryLoad { problems });
        }
        Ok(Self { workers, index })
    }

    pub fn find(&self, id: &str) -> Result<&Worker> {
        self.index
            .get(id)
            .map(|&i| &self.workers[i])
            .ok_or_else(|| Error::WorkerNotFound(id.to_string()))
    }

    /// Workers declaring at least one of `tags`.
    ///
    /// Ranked by number of matching tags, most first; ties go to the
    /// lexically smaller id.
    pub fn find_by_capability<S: AsRef<str>>(&self, tags: &[S]) -> Vec<&Worker> {
        let wanted = normalize_tags(tags);
        let mut ranked: Vec<(usize, &Worker)> = self
            .workers
            .iter()
            .map(|w| (w.capability_tags.intersection(&wanted).count(), w))
            .filter(|(count, _)| *count > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        ranked.into_iter().map(|(_, w)| w).collect()
    }

    /// All workers, ordered by id.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
