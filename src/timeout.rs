//! Time limits for calls into slow capabilities.
//!
//! Embedder and vector index calls can stall (a busy model server, a
//! locked database). Every such call made by the coordinator, assembler
//! or chat engine goes through one of these so an elapsed limit surfaces
//! as the capability's own timeout error.

use std::future::Future;
use std::time::Duration;

use vault_context_core::error::{EmbedError, EmbedResult, IndexError, IndexResult};

pub async fn embed<T, F>(limit: Duration, fut: F) -> EmbedResult<T>
where
    F: Future<Output = EmbedResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(EmbedError::Timeout(limit.as_millis() as u64)),
    }
}

pub async fn index<T, F>(limit: Duration, fut: F) -> IndexResult<T>
where
    F: Future<Output = IndexResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(IndexError::Timeout(limit.as_millis() as u64)),
    }
}
