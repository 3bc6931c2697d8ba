//! Implementations of the `vault` subcommands.
//!
//! Each command opens what it needs, prints a human-readable result to
//! stdout and returns. Logs go to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};

use vault_context_core::search::SearchMode;

use crate::chat::{ChatRequest, Health};
use crate::config::Config;
use crate::engine::Vault;
use crate::migrate;
use crate::server;

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized at {}.", config.db.path.display());
    Ok(())
}

/// Reconcile the vault with the index and wait for every pass to finish.
pub async fn run_index(config: &Config) -> Result<()> {
    let vault = Vault::open(config).await?;
    let report = vault.coordinator.reconcile().await?;
    vault.coordinator.wait_idle().await;
    let stats = vault.coordinator.stats();
    vault.shutdown().await;

    println!("Indexed vault {}", config.vault.root.display());
    println!("  added:     {}", report.added);
    println!("  changed:   {}", report.changed);
    println!("  removed:   {}", report.removed);
    println!("  unchanged: {}", report.unchanged);
    if stats.failed > 0 {
        println!("  failed:    {} (see logs)", stats.failed);
    }
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let vault = Vault::open(config).await?;
    let health = vault.chat.health().await;
    print_health(config, &health);
    Ok(())
}

fn print_health(config: &Config, health: &Health) {
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Vault Context — Index Status");
    println!("============================");
    println!();
    println!("  Vault:       {}", config.vault.root.display());
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Ready:       {}", if health.ready { "yes" } else { "no" });
    println!("  Documents:   {}", health.documents);
    println!("  Entries:     {}", health.entries);
    println!("  Embedding:   {}", health.embedding_model);
    println!("  Generation:  {}", health.generation_model);
    if let Some(ts) = health.last_reconciled_at {
        println!("  Reconciled:  {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(err) = &health.error {
        println!("  Error:       {}", err);
    }
    println!();
}

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    mode: Option<&str>,
) -> Result<()> {
    let mode = mode
        .map(|m| m.parse::<SearchMode>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let vault = Vault::open_for_query(config).await?;
    let results = vault.chat.search(query, limit, mode).await;
    vault.shutdown().await;
    let results = results.context("Search failed")?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            hit.score,
            hit.document_id,
            hit.title
        );
        println!("    updated: {}", hit.modified_at.format("%Y-%m-%d"));
        println!("    chunk: {}", hit.chunk_index);
        println!(
            "    excerpt: \"{}\"",
            excerpt(&hit.text, 200).replace('\n', " ").trim()
        );
        println!();
    }
    Ok(())
}

pub async fn run_ask(config: &Config, message: &str, session: Option<String>) -> Result<()> {
    let vault = Vault::open_for_query(config).await?;
    let reply = vault
        .chat
        .ask(ChatRequest {
            message: message.to_string(),
            session_id: session,
        })
        .await;
    vault.shutdown().await;

    println!("{}", reply.response.trim());
    println!();
    if !reply.sources.is_empty() {
        println!("Sources:");
        for source in &reply.sources {
            println!("  - {} ({:.2})", source.document_id, source.score);
        }
    }
    for d in &reply.degraded {
        eprintln!("note: {:?} unavailable: {}", d.section, d.reason);
    }
    println!("session: {}", reply.session_id);
    Ok(())
}

/// Watch the vault, keep the index current and serve the HTTP API until
/// Ctrl-C.
pub async fn run_serve(config: &Config) -> Result<()> {
    let vault = Arc::new(Vault::open(config).await?);

    let (watcher, forward) = vault.watch()?;
    if let Err(e) = vault.coordinator.reconcile().await {
        tracing::warn!(error = %e, "startup reconciliation failed");
    }
    let reconciler = vault.spawn_reconciler();

    let cancel = vault.coordinator.cancellation_token();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        }
        cancel.cancel();
    };

    let served = server::run_server(vault.clone(), shutdown).await;

    drop(watcher);
    vault.shutdown().await;
    let _ = forward.await;
    if let Some(task) = reconciler {
        let _ = task.await;
    }
    served
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}…", &text[..byte]),
        None => text.to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_excerpt_is_char_safe() {
        assert_eq!(excerpt("héllo wörld", 4), "héll…");
        assert_eq!(excerpt("short", 10), "short");
    }
}
