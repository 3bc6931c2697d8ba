//! Wiring: one [`Vault`] holds every component of the engine.
//!
//! ```text
//! CorpusWatcher ──events──▶ Coordinator ──upsert/delete──▶ VectorIndex
//!                                                             ▲
//! ChatEngine ──▶ ContextAssembler ──embed + query─────────────┘
//!     │
//!     └──▶ ConversationStore, Generator
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vault_context_core::conversation::InMemoryConversationStore;
use vault_context_core::embedding::Embedder;
use vault_context_core::index::VectorIndex;

use crate::assembler::{AssemblerSettings, ContextAssembler};
use crate::chat::ChatEngine;
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorSettings};
use crate::corpus::{Corpus, FsCorpus};
use crate::embedding::create_embedder;
use crate::generation::{create_generator, Generator};
use crate::sqlite_index::SqliteIndex;
use crate::watcher::CorpusWatcher;

pub struct Vault {
    pub config: Config,
    pub corpus: Arc<dyn Corpus>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub coordinator: Coordinator,
    pub assembler: Arc<ContextAssembler>,
    pub chat: Arc<ChatEngine>,
}

impl Vault {
    /// Filesystem vault, SQLite index and the configured providers.
    pub async fn open(config: &Config) -> Result<Self> {
        let corpus: Arc<dyn Corpus> = Arc::new(FsCorpus::new(&config.vault)?);
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::open(&config.db.path).await?);
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::from_parts(config, corpus, index, embedder, generator)
    }

    /// Like [`Vault::open`], but first reconciles the vault with the index
    /// so notes edited or deleted since the last index run are excluded
    /// from retrieval until their passes land.
    pub async fn open_for_query(config: &Config) -> Result<Self> {
        let vault = Self::open(config).await?;
        vault.prepare_queries().await?;
        Ok(vault)
    }

    /// Reconcile before serving queries without a running watcher.
    pub async fn prepare_queries(&self) -> Result<()> {
        let report = self.coordinator.reconcile().await?;
        if !report.is_clean() {
            tracing::info!(
                added = report.added,
                changed = report.changed,
                removed = report.removed,
                "index behind the vault, refreshing"
            );
        }
        Ok(())
    }

    /// Assemble a vault from explicit components.
    pub fn from_parts(
        config: &Config,
        corpus: Arc<dyn Corpus>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let coordinator = Coordinator::new(
            corpus.clone(),
            index.clone(),
            embedder.clone(),
            CoordinatorSettings::from_config(config),
        );
        let assembler = Arc::new(
            ContextAssembler::new(
                corpus.clone(),
                index.clone(),
                embedder.clone(),
                AssemblerSettings::from_config(config)?,
            )
            .with_coordinator(coordinator.clone()),
        );
        let conversations = Arc::new(InMemoryConversationStore::with_max_turns(
            config.conversation.max_turns_per_session,
        ));
        let chat = Arc::new(
            ChatEngine::new(
                assembler.clone(),
                conversations,
                generator.clone(),
                index.clone(),
                embedder.clone(),
                config,
            )
            .with_coordinator(coordinator.clone()),
        );

        tracing::info!(
            embedding = embedder.model_name(),
            generation = generator.model_name(),
            "vault engine ready"
        );

        Ok(Self {
            config: config.clone(),
            corpus,
            index,
            embedder,
            generator,
            coordinator,
            assembler,
            chat,
        })
    }

    /// Start the file watcher and feed its events to the coordinator.
    ///
    /// The watcher stops when the returned handle is dropped; the task ends
    /// on coordinator shutdown.
    pub fn watch(&self) -> Result<(CorpusWatcher, JoinHandle<()>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = CorpusWatcher::start(self.corpus.clone(), tx)?;
        let coordinator = self.coordinator.clone();
        let task = tokio::spawn(async move { coordinator.run(rx).await });
        Ok((watcher, task))
    }

    /// Periodic reconciliation until the coordinator shuts down.
    pub fn spawn_reconciler(&self) -> Option<JoinHandle<()>> {
        let secs = self.config.indexing.reconcile_interval_secs;
        if secs == 0 {
            return None;
        }
        let coordinator = self.coordinator.clone();
        let cancel = coordinator.cancellation_token();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.reconcile().await {
                            tracing::warn!(error = %e, "periodic reconciliation failed");
                        }
                    }
                }
            }
        }))
    }

    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
