//! Knowledge resolver: locates a worker's reference documents by topic.
//!
//! Each worker's `kb_location` (relative to the KB root) holds Markdown
//! documents. A document may declare tags in TOML front matter:
//!
//! ```text
//! +++
//! tags = ["auth", "jwt"]
//! +++
//! # Token handling
//! ```
//!
//! The index is built once at startup and never mutated. Document
//! content is read on demand.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::record::split_front_matter;
use crate::registry::{normalize_tags, Registry};
use crate::{Error, Result};

/// A read-only reference document belonging to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeDocument {
    pub worker_id: String,
    pub path: PathBuf,
    /// Lower-cased declared tags.
    pub tags: BTreeSet<String>,
}

impl KnowledgeDocument {
    /// Read the document's content from disk.
    pub fn read(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DocumentMeta {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Clone)]
enum WorkerKb {
    Indexed(Vec<KnowledgeDocument>),
    Unavailable(PathBuf),
}

/// Immutable index of every worker's knowledge documents.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeIndex {
    workers: HashMap<String, WorkerKb>,
}

impl KnowledgeIndex {
    /// Scan the KB of every registered worker under `kb_root`.
    ///
    /// Never fails: a missing or unreadable KB root, or an unreadable
    /// worker directory, is remembered and reported by `resolve`. A worker
    /// whose directory simply does not exist has an empty KB.
    pub fn load(kb_root: &Path, registry: &Registry) -> Self {
        let root_ok = kb_root.is_dir();
        if !root_ok {
            warn!(root = %kb_root.display(), "knowledge root unavailable");
        }

        let mut workers = HashMap::new();
        for worker in registry.workers() {
            let dir = kb_root.join(&worker.kb_location);
            let entry = if !root_ok {
                WorkerKb::Unavailable(kb_root.to_path_buf())
            } else if !dir.exists() {
                WorkerKb::Indexed(Vec::new())
            } else {
                match scan_worker(&worker.id, &dir) {
                    Ok(docs) => {
                        debug!(worker = %worker.id, documents = docs.len(), "indexed knowledge");
                        WorkerKb::Indexed(docs)
                    }
                    Err(e) => {
                        warn!(worker = %worker.id, dir = %dir.display(), error = %e, "knowledge directory unreadable");
                        WorkerKb::Unavailable(dir)
                    }
                }
            };
            workers.insert(worker.id.clone(), entry);
        }

        let documents: usize = workers
            .values()
            .map(|kb| match kb {
                WorkerKb::Indexed(docs) => docs.len(),
                WorkerKb::Unavailable(_) => 0,
            })
            .sum();
        info!(workers = workers.len(), documents, "knowledge index loaded");
        Self { workers }
    }

    /// Documents of `worker_id` whose tags intersect `keywords`
    /// (case-insensitive).
    ///
    /// Ordered by number of matching tags, most first, then by path. An
    /// empty result is normal; only an unavailable KB is an error.
    pub fn resolve<S: AsRef<str>>(
        &self,
        worker_id: &str,
        keywords: &[S],
    ) -> Result<Vec<KnowledgeDocument>> {
        let docs = match self.workers.get(worker_id) {
            None => return Ok(Vec::new()),
            Some(WorkerKb::Unavailable(path)) => {
                return Err(Error::KbUnavailable {
                    worker: worker_id.to_string(),
                    path: path.clone(),
                })
            }
            Some(WorkerKb::Indexed(docs)) => docs,
        };

        let wanted = normalize_tags(keywords);
        let mut matches: Vec<(usize, &KnowledgeDocument)> = docs
            .iter()
            .map(|doc| (doc.tags.intersection(&wanted).count(), doc))
            .filter(|(count, _)| *count > 0)
            .collect();
        matches.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.path.cmp(&b.1.path)));
        Ok(matches.into_iter().map(|(_, doc)| doc.clone()).collect())
    }

    /// Every indexed document of a worker, ordered by path.
    ///
    /// Availability follows [`resolve`](Self::resolve).
    pub fn documents(&self, worker_id: &str) -> Result<&[KnowledgeDocument]> {
        match self.workers.get(worker_id) {
            None => Ok(&[]),
            Some(WorkerKb::Unavailable(path)) => Err(Error::KbUnavailable {
                worker: worker_id.to_string(),
                path: path.clone(),
            }),
            Some(WorkerKb::Indexed(docs)) => Ok(docs),
        }
    }
}

fn scan_worker(worker_id: &str, dir: &Path) -> io::Result<Vec<KnowledgeDocument>> {
    let mut files = Vec::new();
    collect_markdown(dir, &mut files)?;
    files.sort();

    let mut docs = Vec::with_capacity(files.len());
    for path in files {
        let text = fs::read_to_string(&path)?;
        let meta = match split_front_matter(&text) {
            Some((meta, _)) => toml::from_str::<DocumentMeta>(&meta).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring malformed knowledge front matter");
                DocumentMeta::default()
            }),
            None => DocumentMeta::default(),
        };
        docs.push(KnowledgeDocument {
            worker_id: worker_id.to_string(),
            tags: normalize_tags(&meta.tags),
            path,
        });
    }
    Ok(docs)
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_markdown(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
    Ok(())
}
