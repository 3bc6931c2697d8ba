//! # Vault Context
//!
//! A local-first retrieval-augmented context engine for a personal note
//! vault. Notes are chunked, embedded and kept in a SQLite vector index
//! that follows the vault as it changes; every chat message is answered
//! with a bounded context of the current time, today's note and the most
//! relevant passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Watcher   │──▶│ Coordinator │──▶│ SQLite index │
//! │  (notify)   │   │ chunk+embed │   │   vectors    │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │ (vault)  │         │  (axum)  │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vault init                        # create database
//! vault index                       # index the whole vault
//! vault search "garden plan"        # passage search
//! vault ask "what's on today?"      # answer with vault context
//! vault serve                       # watch + HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`corpus`] | Reading notes from the vault |
//! | [`watcher`] | File change events |
//! | [`coordinator`] | Debounced, per-document indexing queue |
//! | [`sqlite_index`] | Persistent vector index |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Language model providers |
//! | [`assembler`] | Context payload for a query |
//! | [`chat`] | Query entry point and health |
//! | [`prompt`] | Prompt rendering |
//! | [`engine`] | Component wiring |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//!
//! Domain types, chunking, ranking and the capability traits live in the
//! [`vault_context_core`] crate.

pub mod assembler;
pub mod chat;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod migrate;
pub mod prompt;
pub mod server;
pub mod sqlite_index;
pub mod timeout;
pub mod watcher;

pub use vault_context_core;
