//! # Vault Context Core
//!
//! Runtime-agnostic logic for Vault Context: data models, chunking, the
//! embedder and vector index contracts, hybrid re-ranking, conversation
//! history and the context payload budget rules.
//!
//! This crate contains no tokio, sqlx, filesystem I/O or HTTP. The
//! `vault-context` app crate supplies those and drives the pipeline.

pub mod chunk;
pub mod context;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod search;
