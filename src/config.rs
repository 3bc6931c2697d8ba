//! TOML configuration.
//!
//! Every section except `[vault]` is optional and falls back to defaults.
//! [`load_config`] parses and validates the file; a minimal config is:
//!
//! ```toml
//! [vault]
//! root = "/home/me/notes"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vault_context_core::chunk::ChunkerConfig;
use vault_context_core::search::{SearchMode, SearchParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub anchor: AnchorConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/vault.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    50
}

impl ChunkingConfig {
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            min_chunk_size: self.min_chunk_size,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_search_mode")]
    pub search_mode: String,
    #[serde(default = "default_filename_boost")]
    pub filename_boost: f32,
    #[serde(default = "default_term_boost")]
    pub term_boost: f32,
    #[serde(default)]
    pub priority_paths: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_budget_chars: default_context_budget_chars(),
            history_turns: default_history_turns(),
            query_timeout_ms: default_query_timeout_ms(),
            search_limit: default_search_limit(),
            search_mode: default_search_mode(),
            filename_boost: default_filename_boost(),
            term_boost: default_term_boost(),
            priority_paths: Vec::new(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_context_budget_chars() -> usize {
    6000
}
fn default_history_turns() -> usize {
    3
}
fn default_query_timeout_ms() -> u64 {
    5000
}
fn default_search_limit() -> usize {
    10
}
fn default_search_mode() -> String {
    "hybrid".to_string()
}
fn default_filename_boost() -> f32 {
    0.5
}
fn default_term_boost() -> f32 {
    0.1
}

impl RetrievalConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Search parameters for `limit` results in `mode`.
    pub fn search_params(&self, mode: SearchMode, limit: usize) -> SearchParams {
        SearchParams {
            mode,
            limit,
            filename_boost: self.filename_boost,
            term_boost: self.term_boost,
            priority_paths: self.priority_paths.clone(),
            ..SearchParams::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnchorConfig {
    /// `chrono` format string resolving today's anchor document id.
    #[serde(default = "default_anchor_pattern")]
    pub pattern: String,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            pattern: default_anchor_pattern(),
            preview_chars: default_preview_chars(),
            enabled: true,
        }
    }
}

fn default_anchor_pattern() -> String {
    "Daily/%Y-%m-%d.md".to_string()
}
fn default_preview_chars() -> usize {
    500
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_debounce_ms")]
    pub max_debounce_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_index_timeout_ms")]
    pub index_timeout_ms: u64,
    /// Periodic reconciliation while serving; `0` disables it.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_debounce_ms: default_max_debounce_ms(),
            workers: default_workers(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            max_attempts: default_max_attempts(),
            index_timeout_ms: default_index_timeout_ms(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    400
}
fn default_max_debounce_ms() -> u64 {
    2000
}
fn default_workers() -> usize {
    4
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_max_attempts() -> u32 {
    8
}
fn default_index_timeout_ms() -> u64 {
    10_000
}
fn default_reconcile_interval_secs() -> u64 {
    300
}

impl IndexingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_debounce(&self) -> Duration {
        Duration::from_millis(self.max_debounce_ms)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns_per_session: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns_per_session: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// A config with defaults everywhere, rooted at `vault_root`.
    pub fn for_vault(vault_root: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig::default(),
            vault: VaultConfig {
                root: vault_root.into(),
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
                follow_symlinks: false,
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            anchor: AnchorConfig::default(),
            indexing: IndexingConfig::default(),
            conversation: ConversationConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if let Err(msg) = config.chunking.chunker().validate() {
        bail!("chunking: {}", msg);
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.search_limit == 0 {
        bail!("retrieval.search_limit must be >= 1");
    }
    if let Err(msg) = config.retrieval.search_mode.parse::<SearchMode>() {
        bail!("retrieval.search_mode: {}", msg);
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "ollama" | "openai" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, ollama, openai, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "ollama" | "openai") {
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    // Validate indexing
    if config.indexing.workers == 0 {
        bail!("indexing.workers must be >= 1");
    }
    if config.indexing.max_debounce_ms < config.indexing.debounce_ms {
        bail!("indexing.max_debounce_ms must be >= indexing.debounce_ms");
    }
    if config.indexing.max_attempts == 0 {
        bail!("indexing.max_attempts must be >= 1");
    }

    if config.anchor.enabled {
        if config.anchor.pattern.trim().is_empty() {
            bail!("anchor.pattern must not be empty when the anchor is enabled");
        }
        crate::assembler::AnchorResolver::new(&config.anchor.pattern)
            .context("anchor.pattern")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[vault]\nroot = \"/tmp/notes\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.indexing.debounce_ms, 400);
        assert_eq!(config.generation.model, "llama3.1:8b");
        assert_eq!(config.anchor.pattern, "Daily/%Y-%m-%d.md");
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_missing_vault_rejected() {
        assert!(parse("[db]\npath = \"x.sqlite\"\n").is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse(
            "[vault]\nroot = \"/n\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_ollama_requires_model_and_dims() {
        let err = parse("[vault]\nroot = \"/n\"\n[embedding]\nprovider = \"ollama\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let ok = parse(
            "[vault]\nroot = \"/n\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse("[vault]\nroot = \"/n\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[vault]\nroot = \"/n\"\n[generation]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_debounce_cap_must_cover_window() {
        let err = parse(
            "[vault]\nroot = \"/n\"\n[indexing]\ndebounce_ms = 500\nmax_debounce_ms = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_debounce_ms"));
    }
}
