//! Path metadata lookup with caching.
//!
//! Metadata records live in a [`MetaStore`] (a database in production, a
//! map in tests). Lookups by path are cached, positive and negative alike,
//! and any write evicts the affected path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;

use strata_types::Meta;
use strata_types::path::{self, fix_and_clean_path};

use crate::cache::MemoCache;
use crate::vfs::{FsError, FsResult};

/// Backing store for metadata records.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn meta_by_path(&self, path: &str) -> FsResult<Option<Meta>>;

    async fn meta_by_id(&self, id: u64) -> FsResult<Option<Meta>>;

    /// Persist a new record, returning its assigned id.
    async fn create(&self, meta: Meta) -> FsResult<u64>;

    async fn update(&self, meta: Meta) -> FsResult<()>;

    async fn delete(&self, id: u64) -> FsResult<()>;
}

/// In-memory [`MetaStore`].
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    metas: DashMap<u64, Meta>,
    next_id: AtomicU64,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn meta_by_path(&self, path: &str) -> FsResult<Option<Meta>> {
        Ok(self
            .metas
            .iter()
            .find(|m| m.path == path)
            .map(|m| m.value().clone()))
    }

    async fn meta_by_id(&self, id: u64) -> FsResult<Option<Meta>> {
        Ok(self.metas.get(&id).map(|m| m.value().clone()))
    }

    async fn create(&self, mut meta: Meta) -> FsResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        meta.id = id;
        self.metas.insert(id, meta);
        Ok(id)
    }

    async fn update(&self, meta: Meta) -> FsResult<()> {
        match self.metas.get_mut(&meta.id) {
            Some(mut slot) => {
                *slot = meta;
                Ok(())
            }
            None => Err(FsError::MetaNotFound(format!("id {}", meta.id))),
        }
    }

    async fn delete(&self, id: u64) -> FsResult<()> {
        self.metas
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| FsError::MetaNotFound(format!("id {id}")))
    }
}

/// Cached metadata resolution over a [`MetaStore`].
pub struct MetaCache {
    store: Arc<dyn MetaStore>,
    cache: MemoCache<String, Option<Meta>>,
    ttl: Duration,
}

impl MetaCache {
    /// Default lifetime of a cached lookup.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(store: Arc<dyn MetaStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: MemoCache::new(),
            ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetaStore> {
        &self.store
    }

    /// Metadata recorded exactly at `path`.
    pub async fn get_meta_by_path(&self, path: &str) -> FsResult<Meta> {
        let path = fix_and_clean_path(path);
        let store = Arc::clone(&self.store);
        let lookup = path.clone();
        self.cache
            .get_or_load(path.clone(), Some(self.ttl), || async move {
                store.meta_by_path(&lookup).await
            })
            .await?
            .ok_or(FsError::MetaNotFound(path))
    }

    /// Metadata at `path` or its closest ancestor that has any.
    #[instrument(skip(self), name = "meta.nearest")]
    pub async fn get_nearest_meta(&self, path: &str) -> FsResult<Meta> {
        let mut current = fix_and_clean_path(path);
        loop {
            match self.get_meta_by_path(&current).await {
                Ok(meta) => return Ok(meta),
                Err(FsError::MetaNotFound(_)) if current != "/" => {
                    current = path::parent(&current);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn create_meta(&self, mut meta: Meta) -> FsResult<u64> {
        meta.path = fix_and_clean_path(&meta.path);
        let path = meta.path.clone();
        let id = self.store.create(meta).await?;
        self.cache.del(&path);
        Ok(id)
    }

    pub async fn update_meta(&self, mut meta: Meta) -> FsResult<()> {
        meta.path = fix_and_clean_path(&meta.path);
        // Evict the old path too when a record moves.
        if let Some(old) = self.store.meta_by_id(meta.id).await? {
            self.cache.del(&old.path);
        }
        let path = meta.path.clone();
        self.store.update(meta).await?;
        self.cache.del(&path);
        Ok(())
    }

    pub async fn delete_meta(&self, id: u64) -> FsResult<()> {
        let old = self.store.meta_by_id(id).await?;
        self.store.delete(id).await?;
        if let Some(old) = old {
            self.cache.del(&old.path);
        }
        Ok(())
    }
}
