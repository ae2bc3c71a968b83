//! Process-scoped metadata cache and the request-scoped resolver in front of it.
//!
//! The cache holds whole `Arc` snapshots (a model with its columns, a view with
//! its columns, filters and sorts). Entries expire after a TTL and the oldest
//! entry is evicted at capacity, but correctness relies only on explicit
//! invalidation. Population never takes a lock across the meta-store read:
//! concurrent misses may both fetch, and the later insert wins.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::MetaCacheConfig;
use crate::error::{MetaqueryError, Result};
use crate::fanout::{for_each_best_effort, try_for_each_bounded, FanoutReport};
use crate::meta_store::MetaStore;
use crate::models::{ColOptions, Model, View};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: String,
    id: String,
}

/// Cache entry with timestamp for TTL tracking.
#[derive(Debug)]
struct CacheEntry<T> {
    value: Arc<T>,
    /// Base of a model, or model of a view; used for grouped invalidation.
    owner: String,
    inserted_at: Instant,
}

/// What a structural mutation touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// A model and every cached view of it.
    Model(String),
    View(String),
    /// Every model of a base and every view of those models.
    Base(String),
}

#[derive(Debug)]
pub struct MetaCache {
    scope: String,
    models: DashMap<CacheKey, CacheEntry<Model>>,
    views: DashMap<CacheKey, CacheEntry<View>>,
    ttl: Duration,
    max_size: usize,
    generation: AtomicU64,
}

impl MetaCache {
    /// `scope` is the workspace the cached ids belong to.
    pub fn new(scope: impl Into<String>, config: &MetaCacheConfig) -> Self {
        Self {
            scope: scope.into(),
            models: DashMap::new(),
            views: DashMap::new(),
            ttl: Duration::from_secs(config.ttl_secs),
            max_size: config.max_size.max(1),
            generation: AtomicU64::new(0),
        }
    }

    /// Bumped on every invalidation. A fetch that started in an older
    /// generation is returned to its caller but never cached.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn key(&self, id: &str) -> CacheKey {
        CacheKey {
            scope: self.scope.clone(),
            id: id.to_string(),
        }
    }

    pub fn cached_model(&self, id: &str) -> Option<Arc<Model>> {
        fresh(&self.models, &self.key(id), self.ttl)
    }

    pub fn cached_view(&self, id: &str) -> Option<Arc<View>> {
        fresh(&self.views, &self.key(id), self.ttl)
    }

    /// Cached model snapshot, loading it from the store on a miss.
    pub async fn get_model(&self, store: &dyn MetaStore, id: &str) -> Result<Arc<Model>> {
        if let Some(model) = self.cached_model(id) {
            tracing::debug!(scope = %self.scope, model = %id, "meta cache hit");
            return Ok(model);
        }
        tracing::debug!(scope = %self.scope, model = %id, "meta cache miss");

        let generation = self.generation();
        let meta = store
            .get_model(id)
            .await?
            .ok_or_else(|| MetaqueryError::not_found("model", id))?;
        let columns = store.get_columns_for_model(id).await?;
        let model = Arc::new(Model::new(meta, columns));
        self.store_entry(
            &self.models,
            id,
            model.base_id.clone(),
            model.clone(),
            generation,
        );
        Ok(model)
    }

    /// Cached view snapshot, loading it from the store on a miss.
    pub async fn get_view(&self, store: &dyn MetaStore, id: &str) -> Result<Arc<View>> {
        if let Some(view) = self.cached_view(id) {
            tracing::debug!(scope = %self.scope, view = %id, "meta cache hit");
            return Ok(view);
        }
        tracing::debug!(scope = %self.scope, view = %id, "meta cache miss");

        let generation = self.generation();
        let meta = store
            .get_view(id)
            .await?
            .ok_or_else(|| MetaqueryError::not_found("view", id))?;
        let columns = store.get_view_columns(id).await?;
        let filters = store.get_view_filters(id).await?;
        let sorts = store.get_view_sorts(id).await?;
        let view = Arc::new(View {
            meta,
            columns,
            filters,
            sorts,
        });
        self.store_entry(
            &self.views,
            id,
            view.meta.model_id.clone(),
            view.clone(),
            generation,
        );
        Ok(view)
    }

    fn store_entry<T>(
        &self,
        map: &DashMap<CacheKey, CacheEntry<T>>,
        id: &str,
        owner: String,
        value: Arc<T>,
        generation: u64,
    ) {
        if self.generation() != generation {
            tracing::debug!(scope = %self.scope, id = %id, "skipping cache fill from stale generation");
            return;
        }
        if map.len() >= self.max_size {
            self.evict_oldest(map);
        }
        let key = self.key(id);
        map.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                owner,
                inserted_at: Instant::now(),
            },
        );
        // An invalidation bumps the generation before it removes entries, so one
        // that raced past the check above is seen here.
        if self.generation() != generation {
            tracing::debug!(scope = %self.scope, id = %id, "dropping cache fill raced by invalidation");
            map.remove_if(&key, |_, entry| Arc::ptr_eq(&entry.value, &value));
        }
    }

    /// Remove the oldest entry from a map.
    fn evict_oldest<T>(&self, map: &DashMap<CacheKey, CacheEntry<T>>) {
        let oldest = map
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            tracing::debug!(scope = %key.scope, id = %key.id, "evicting oldest metadata from cache");
            map.remove(&key);
        }
    }

    pub fn invalidate(&self, target: &Invalidation) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        match target {
            Invalidation::Model(id) => {
                self.models.remove(&self.key(id));
                self.views
                    .retain(|key, entry| key.scope != self.scope || entry.owner != *id);
            }
            Invalidation::View(id) => {
                self.views.remove(&self.key(id));
            }
            Invalidation::Base(base_id) => {
                let mut dropped = HashSet::new();
                self.models.retain(|key, entry| {
                    let hit = key.scope == self.scope && entry.owner == *base_id;
                    if hit {
                        dropped.insert(key.id.clone());
                    }
                    !hit
                });
                // Views whose model is no longer cached have an unknown base; drop them too.
                self.views.retain(|key, entry| {
                    key.scope != self.scope
                        || !(dropped.contains(&entry.owner)
                            || !self.models.contains_key(&self.key(&entry.owner)))
                });
            }
        }
        tracing::debug!(scope = %self.scope, target = ?target, generation = self.generation(), "invalidated metadata");
    }

    pub fn invalidate_model(&self, id: &str) {
        self.invalidate(&Invalidation::Model(id.to_string()));
    }

    pub fn invalidate_view(&self, id: &str) {
        self.invalidate(&Invalidation::View(id.to_string()));
    }

    pub fn invalidate_base(&self, base_id: &str) {
        self.invalidate(&Invalidation::Base(base_id.to_string()));
    }

    /// Awaits a structural mutation and invalidates `targets` only once it has
    /// committed. A failed commit leaves the cache untouched.
    pub async fn invalidate_after_commit<F, T>(&self, commit: F, targets: &[Invalidation]) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match commit.await {
            Ok(out) => {
                for target in targets {
                    self.invalidate(target);
                }
                Ok(out)
            }
            Err(err) => {
                tracing::debug!(scope = %self.scope, error = %err, "commit failed, cache left untouched");
                Err(err)
            }
        }
    }

    /// Remove expired entries from the cache.
    pub fn evict_expired(&self) {
        self.models.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        self.views.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.models.len() + self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.views.is_empty()
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.models.clear();
        self.views.clear();
    }
}

fn fresh<T>(map: &DashMap<CacheKey, CacheEntry<T>>, key: &CacheKey, ttl: Duration) -> Option<Arc<T>> {
    let hit = map
        .get(key)
        .map(|entry| (entry.value.clone(), entry.inserted_at.elapsed() < ttl));
    match hit {
        Some((value, true)) => Some(value),
        Some((_, false)) => {
            map.remove(key);
            None
        }
        None => None,
    }
}

/// Synchronous access to models that were resolved earlier in the request.
pub trait ModelLookup {
    fn lookup_model(&self, id: &str) -> Option<Arc<Model>>;
}

impl ModelLookup for HashMap<String, Arc<Model>> {
    fn lookup_model(&self, id: &str) -> Option<Arc<Model>> {
        self.get(id).cloned()
    }
}

/// Request-scoped view of the metadata. The first snapshot seen for an id is
/// pinned, so every lookup within one request sees the same columns even if
/// the cache is invalidated or refilled meanwhile.
pub struct MetaResolver {
    cache: Arc<MetaCache>,
    store: Arc<dyn MetaStore>,
    concurrency: usize,
    models: Mutex<HashMap<String, Arc<Model>>>,
    views: Mutex<HashMap<String, Arc<View>>>,
}

impl MetaResolver {
    pub fn new(cache: Arc<MetaCache>, store: Arc<dyn MetaStore>) -> Self {
        Self {
            cache,
            store,
            concurrency: 8,
            models: Mutex::new(HashMap::new()),
            views: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn model(&self, id: &str) -> Result<Arc<Model>> {
        if let Some(model) = self.pinned_model(id) {
            return Ok(model);
        }
        let loaded = self.cache.get_model(self.store.as_ref(), id).await?;
        let mut pinned = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(pinned.entry(id.to_string()).or_insert(loaded).clone())
    }

    pub async fn view(&self, id: &str) -> Result<Arc<View>> {
        if let Some(view) = self.pinned_view(id) {
            return Ok(view);
        }
        let loaded = self.cache.get_view(self.store.as_ref(), id).await?;
        let mut pinned = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(pinned.entry(id.to_string()).or_insert(loaded).clone())
    }

    /// Already-resolved model, without I/O.
    pub fn pinned_model(&self, id: &str) -> Option<Arc<Model>> {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn pinned_view(&self, id: &str) -> Option<Arc<View>> {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Resolves every id, aborting on the first failure.
    pub async fn prefetch(&self, ids: Vec<String>) -> Result<Vec<Arc<Model>>> {
        try_for_each_bounded(self.concurrency, ids, |id| async move { self.model(&id).await }).await
    }

    /// Resolves every id independently; each failure is reported.
    pub async fn warm(&self, ids: Vec<String>) -> FanoutReport<Arc<Model>> {
        for_each_best_effort(self.concurrency, ids, |id| async move { self.model(&id).await }).await
    }

    /// Resolves the models reachable from `root` through relation columns.
    /// Targets that no longer exist are left unresolved, so the columns
    /// pointing at them surface as broken when they are compiled. Any other
    /// failure aborts.
    pub async fn resolve_relation_graph(&self, root: &Model) -> Result<()> {
        let mut seen: HashSet<String> = HashSet::from([root.id.clone()]);
        let mut frontier = referenced_models(root);
        loop {
            frontier.retain(|id| seen.insert(id.clone()));
            if frontier.is_empty() {
                return Ok(());
            }
            let report = self.warm(std::mem::take(&mut frontier)).await;
            for (_, err) in report.failures {
                if !matches!(err, MetaqueryError::NotFound { .. }) {
                    return Err(err);
                }
            }
            for (_, model) in report.successes {
                frontier.extend(referenced_models(&model));
            }
        }
    }
}

impl ModelLookup for MetaResolver {
    fn lookup_model(&self, id: &str) -> Option<Arc<Model>> {
        self.pinned_model(id)
    }
}

/// Models a model's relation columns point at, including junction models.
fn referenced_models(model: &Model) -> Vec<String> {
    let mut ids = Vec::new();
    for column in &model.columns {
        if let ColOptions::Link(opts) = &column.options {
            ids.push(opts.related_model_id.clone());
            if let Some(junction) = &opts.junction_model_id {
                ids.push(junction.clone());
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta_store::InMemoryMetaStore;
    use crate::models::{Column, LinkOptions, RelationType, TableMeta, Uidt};

    fn model(id: &str, base: &str, columns: Vec<Column>) -> Model {
        Model::new(
            TableMeta {
                id: id.into(),
                base_id: base.into(),
                title: id.into(),
                table_name: id.into(),
            },
            columns,
        )
    }

    fn store() -> Arc<InMemoryMetaStore> {
        let link = Column::plain("c_orders", "m1", "Orders", "orders", Uidt::Links).with_options(
            ColOptions::Link(LinkOptions {
                relation_type: RelationType::HasMany,
                related_model_id: "m2".into(),
                child_column_id: "c_fk".into(),
                parent_column_id: "c_id".into(),
                junction_model_id: None,
                junction_child_column_id: None,
                junction_parent_column_id: None,
                related_base_id: None,
                junction_base_id: None,
            }),
        );
        Arc::new(InMemoryMetaStore::with_models([
            model(
                "m1",
                "b1",
                vec![Column::plain("c_id", "m1", "Id", "id", Uidt::ID).primary(), link],
            ),
            model("m2", "b1", vec![Column::plain("c_fk", "m2", "Customer", "customer_id", Uidt::ForeignKey)]),
            model("m3", "b2", vec![]),
        ]))
    }

    #[tokio::test]
    async fn second_read_is_a_hit() {
        let store = store();
        let cache = MetaCache::new("ws", &MetaCacheConfig::default());
        cache.get_model(store.as_ref(), "m1").await.unwrap();
        cache.get_model(store.as_ref(), "m1").await.unwrap();
        assert_eq!(store.model_reads(), 1);
    }

    #[tokio::test]
    async fn missing_model_is_not_found() {
        let cache = MetaCache::new("ws", &MetaCacheConfig::default());
        let err = cache.get_model(store().as_ref(), "gone").await.unwrap_err();
        assert!(matches!(err, MetaqueryError::NotFound { kind: "model", id } if id == "gone"));
    }

    #[tokio::test]
    async fn evicts_oldest_at_capacity() {
        let store = store();
        let cache = MetaCache::new(
            "ws",
            &MetaCacheConfig {
                ttl_secs: 300,
                max_size: 2,
            },
        );
        for id in ["m1", "m2", "m3"] {
            cache.get_model(store.as_ref(), id).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.cached_model("m1").is_none());
        assert!(cache.cached_model("m3").is_some());
    }

    #[tokio::test]
    async fn base_invalidation_is_scoped() {
        let store = store();
        let cache = MetaCache::new("ws", &MetaCacheConfig::default());
        for id in ["m1", "m2", "m3"] {
            cache.get_model(store.as_ref(), id).await.unwrap();
        }
        let before = cache.generation();
        cache.invalidate_base("b1");
        assert!(cache.generation() > before);
        assert!(cache.cached_model("m1").is_none());
        assert!(cache.cached_model("m2").is_none());
        assert!(cache.cached_model("m3").is_some());
    }

    #[tokio::test]
    async fn invalidates_only_after_successful_commit() {
        let store = store();
        let cache = MetaCache::new("ws", &MetaCacheConfig::default());
        cache.get_model(store.as_ref(), "m1").await.unwrap();

        let failed: Result<()> = cache
            .invalidate_after_commit(
                async { Err(MetaqueryError::Execution("rollback".into())) },
                &[Invalidation::Model("m1".into())],
            )
            .await;
        assert!(failed.is_err());
        assert!(cache.cached_model("m1").is_some());

        let rows = cache
            .invalidate_after_commit(async { Ok(3u64) }, &[Invalidation::Model("m1".into())])
            .await
            .unwrap();
        assert_eq!(rows, 3);
        assert!(cache.cached_model("m1").is_none());
    }

    #[tokio::test]
    async fn resolver_pins_first_snapshot() {
        let store = store();
        let cache = Arc::new(MetaCache::new("ws", &MetaCacheConfig::default()));
        let resolver = MetaResolver::new(cache.clone(), store.clone());
        let first = resolver.model("m2").await.unwrap();

        store.update_model("m2", |m| m.columns.clear());
        cache.invalidate_model("m2");

        let again = resolver.model("m2").await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.columns.len(), 1);
    }

    /// Store that invalidates the cache while a model read is in flight.
    struct InvalidatingStore {
        inner: Arc<InMemoryMetaStore>,
        cache: Arc<MetaCache>,
    }

    #[async_trait::async_trait]
    impl MetaStore for InvalidatingStore {
        async fn get_model(&self, id: &str) -> Result<Option<TableMeta>> {
            self.inner.get_model(id).await
        }

        async fn get_columns_for_model(&self, model_id: &str) -> Result<Vec<Column>> {
            self.cache.invalidate_model(model_id);
            self.inner.get_columns_for_model(model_id).await
        }

        async fn get_view(&self, id: &str) -> Result<Option<crate::models::ViewMeta>> {
            self.inner.get_view(id).await
        }

        async fn get_view_columns(&self, view_id: &str) -> Result<Vec<crate::models::ViewColumn>> {
            self.inner.get_view_columns(view_id).await
        }

        async fn get_relation_column(&self, id: &str) -> Result<Option<Column>> {
            self.inner.get_relation_column(id).await
        }
    }

    #[tokio::test]
    async fn fill_started_before_invalidation_is_not_cached() {
        let cache = Arc::new(MetaCache::new("ws", &MetaCacheConfig::default()));
        let store = InvalidatingStore {
            inner: store(),
            cache: cache.clone(),
        };
        let model = cache.get_model(&store, "m1").await.unwrap();
        assert_eq!(model.id, "m1");
        assert!(cache.cached_model("m1").is_none());
    }

    #[tokio::test]
    async fn concurrent_cold_reads_share_one_snapshot() {
        let store = store();
        let cache = Arc::new(MetaCache::new("ws", &MetaCacheConfig::default()));
        let resolver = Arc::new(MetaResolver::new(cache.clone(), store.clone()));

        let first = (0..8).map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.model("m1").await })
        });
        let mut handles: Vec<_> = first.collect();

        store.update_model("m1", |m| m.title = "changed".into());
        cache.invalidate_model("m1");

        handles.extend((0..8).map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.model("m1").await })
        }));

        let models: Vec<Arc<Model>> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();
        let pinned = resolver.pinned_model("m1").unwrap();
        assert!(models.iter().all(|m| Arc::ptr_eq(m, &pinned)));
    }

    #[tokio::test]
    async fn relation_graph_tolerates_deleted_targets() {
        let store = store();
        store.remove_model("m2");
        let cache = Arc::new(MetaCache::new("ws", &MetaCacheConfig::default()));
        let resolver = MetaResolver::new(cache, store.clone());
        let root = resolver.model("m1").await.unwrap();
        resolver.resolve_relation_graph(&root).await.unwrap();
        assert!(resolver.pinned_model("m2").is_none());
        assert!(resolver.prefetch(vec!["m1".into(), "m2".into()]).await.is_err());
    }
}
