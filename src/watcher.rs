//! Corpus watcher.
//!
//! Turns raw filesystem notifications into [`CorpusEvent`]s keyed by
//! document id and pushes them onto the coordinator's channel.
//!
//! | notify event | Corpus events |
//! |--------------|---------------|
//! | create (file) | `Added` |
//! | create (folder) | `Added` for every matching file inside |
//! | modify (data, metadata) | `Changed` |
//! | rename `from → to` | `Removed(from)`, `Added(to)` |
//! | remove | `Removed` |
//! | access | none |
//!
//! Paths outside the vault's include/exclude globs are dropped here.
//! Bursts are not coalesced here; the coordinator debounces per document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::corpus::Corpus;

/// A normalized change to the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusEvent {
    Added(String),
    Changed(String),
    Removed(String),
}

impl CorpusEvent {
    pub fn document_id(&self) -> &str {
        match self {
            CorpusEvent::Added(id) | CorpusEvent::Changed(id) | CorpusEvent::Removed(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CorpusEvent::Added(_) => "added",
            CorpusEvent::Changed(_) => "changed",
            CorpusEvent::Removed(_) => "removed",
        }
    }
}

/// Keeps the underlying OS watcher alive; dropping it stops events.
pub struct CorpusWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl CorpusWatcher {
    /// Watch the corpus root recursively, sending events to `tx`.
    pub fn start(
        corpus: Arc<dyn Corpus>,
        tx: mpsc::UnboundedSender<CorpusEvent>,
    ) -> Result<Self> {
        let root = corpus
            .watch_root()
            .map(Path::to_path_buf)
            .context("corpus has no directory to watch")?;

        let callback_corpus = corpus.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for ev in translate(&event, callback_corpus.as_ref()) {
                        tracing::debug!(kind = ev.kind(), id = ev.document_id(), "corpus event");
                        if tx.send(ev).is_err() {
                            // Receiver gone: the coordinator has shut down.
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "file watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        tracing::info!(root = %root.display(), "watching vault for changes");
        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map one notify event onto zero or more corpus events.
pub fn translate(event: &Event, corpus: &dyn Corpus) -> Vec<CorpusEvent> {
    let id = |p: &PathBuf| corpus.document_id_for(p);
    let mut out = Vec::new();

    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                added_under(path, corpus, &mut out);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both if event.paths.len() == 2 => {
                out.extend(id(&event.paths[0]).map(CorpusEvent::Removed));
                added_under(&event.paths[1], corpus, &mut out);
            }
            RenameMode::From => {
                out.extend(event.paths.iter().filter_map(id).map(CorpusEvent::Removed));
            }
            RenameMode::To => {
                for path in &event.paths {
                    added_under(path, corpus, &mut out);
                }
            }
            _ => {
                // Direction unknown: decide from what is on disk now.
                for path in &event.paths {
                    if path.exists() {
                        added_under(path, corpus, &mut out);
                    } else {
                        out.extend(id(path).map(CorpusEvent::Removed));
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            out.extend(event.paths.iter().filter_map(id).map(CorpusEvent::Changed));
        }
        EventKind::Remove(_) => {
            out.extend(event.paths.iter().filter_map(id).map(CorpusEvent::Removed));
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    out
}

/// `Added` for a file, or for every matching file under a directory.
fn added_under(path: &Path, corpus: &dyn Corpus, out: &mut Vec<CorpusEvent>) {
    if path.is_dir() {
        for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                out.extend(corpus.document_id_for(entry.path()).map(CorpusEvent::Added));
            }
        }
    } else {
        out.extend(corpus.document_id_for(path).map(CorpusEvent::Added));
    }
}
