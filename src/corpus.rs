//! Access to the user's notes.
//!
//! The engine never reads files directly; it goes through the [`Corpus`]
//! trait so the same coordinator and assembler run against a real vault
//! ([`FsCorpus`]) or an in-memory one ([`MemoryCorpus`]).
//!
//! Document ids are paths relative to the vault root with `/` separators,
//! e.g. `Daily/2026-10-16.md`.
//!
//! # Title resolution
//!
//! 1. `title:` in YAML front matter.
//! 2. The first `# ` heading.
//! 3. The file stem.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use vault_context_core::models::{file_stem, Document, Metadata, RESERVED_METADATA_KEYS};

use crate::config::VaultConfig;

/// A corpus listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub modified_at: DateTime<Utc>,
}

/// Read access to the note collection.
#[async_trait]
pub trait Corpus: Send + Sync {
    /// All documents currently present, sorted by id.
    async fn list(&self) -> Result<Vec<DocumentRef>>;

    /// Load one document. `Ok(None)` means it does not exist (any more).
    async fn load(&self, id: &str) -> Result<Option<Document>>;

    /// Map a filesystem path to a document id, if it belongs to this corpus.
    fn document_id_for(&self, _path: &Path) -> Option<String> {
        None
    }

    /// Directory to watch for changes, if this corpus lives on disk.
    fn watch_root(&self) -> Option<&Path> {
        None
    }
}

// ============ Filesystem corpus ============

/// Notes under a vault directory, filtered by include/exclude globs.
pub struct FsCorpus {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl FsCorpus {
    pub fn new(config: &VaultConfig) -> Result<Self> {
        if !config.root.is_dir() {
            bail!("Vault root does not exist: {}", config.root.display());
        }
        let root = config
            .root
            .canonicalize()
            .with_context(|| format!("Failed to resolve vault root: {}", config.root.display()))?;

        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/.obsidian/**".to_string(),
            "**/.trash/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            root,
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a relative id passes the include/exclude globs.
    pub fn matches(&self, id: &str) -> bool {
        !self.exclude.is_match(id) && self.include.is_match(id)
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let rel = Path::new(id);
        // Ids never escape the vault.
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(rel))
    }
}

#[async_trait]
impl Corpus for FsCorpus {
    async fn list(&self) -> Result<Vec<DocumentRef>> {
        let root = self.root.clone();
        let include = self.include.clone();
        let exclude = self.exclude.clone();
        let follow = self.follow_symlinks;

        tokio::task::spawn_blocking(move || {
            let mut refs = Vec::new();
            for entry in WalkDir::new(&root).follow_links(follow) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable vault entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(id) = relative_id(&root, entry.path()) else {
                    continue;
                };
                if exclude.is_match(&id) || !include.is_match(&id) {
                    continue;
                }
                let modified_at = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_default();
                refs.push(DocumentRef { id, modified_at });
            }
            // Sort for deterministic ordering
            refs.sort_by(|a, b| a.id.cmp(&b.id));
            refs
        })
        .await
        .context("vault scan task failed")
    }

    async fn load(&self, id: &str) -> Result<Option<Document>> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let modified_at = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();

        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(Some(parse_document(id, &text, modified_at)))
    }

    fn document_id_for(&self, path: &Path) -> Option<String> {
        let id = relative_id(&self.root, path)?;
        self.matches(&id).then_some(id)
    }

    fn watch_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

// ============ Parsing ============

/// Build a [`Document`] from raw note text: front matter becomes
/// metadata, the body (without front matter) is what gets indexed.
pub fn parse_document(id: &str, raw: &str, modified_at: DateTime<Utc>) -> Document {
    let (front, body) = split_front_matter(raw);
    let mut metadata = front.map(parse_front_matter).unwrap_or_default();

    let title = metadata
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| first_heading(body))
        .unwrap_or_else(|| file_stem(id).to_string());

    for key in RESERVED_METADATA_KEYS {
        metadata.remove(key);
    }

    Document::new(id, title, body, modified_at, metadata)
}

/// Split `---\n…\n---` front matter from the body.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let Some(rest) = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    else {
        return (None, raw);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body.trim_start_matches(['\r', '\n']));
        }
        offset += line.len();
    }
    (None, raw)
}

fn parse_front_matter(yaml: &str) -> Metadata {
    match serde_yaml::from_str::<BTreeMap<String, serde_json::Value>>(yaml) {
        Ok(map) => map,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed front matter");
            Metadata::new()
        }
    }
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

// ============ In-memory corpus ============

/// A corpus held in memory. Writes through [`MemoryCorpus::put`] and
/// [`MemoryCorpus::remove`] are visible immediately.
#[derive(Default)]
pub struct MemoryCorpus {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a note, stamping it with the current time.
    pub fn put(&self, id: &str, text: &str) {
        self.put_at(id, text, Utc::now());
    }

    pub fn put_at(&self, id: &str, text: &str, modified_at: DateTime<Utc>) {
        let doc = parse_document(id, text, modified_at);
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(id.to_string(), doc);
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.remove(id).is_some()
    }
}

#[async_trait]
impl Corpus for MemoryCorpus {
    async fn list(&self) -> Result<Vec<DocumentRef>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs
            .values()
            .map(|d| DocumentRef {
                id: d.id.clone(),
                modified_at: d.modified_at,
            })
            .collect())
    }

    async fn load(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(id).cloned())
    }
}
