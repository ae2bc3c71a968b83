//! Read contract of the persisted metadata store, plus an in-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Column, Filter, Model, Sort, TableMeta, View, ViewColumn, ViewMeta};

/// Metadata reads this crate needs. Structural writes belong to the host
/// service, which calls back into the cache to invalidate after commit.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get_model(&self, id: &str) -> Result<Option<TableMeta>>;

    async fn get_columns_for_model(&self, model_id: &str) -> Result<Vec<Column>>;

    async fn get_view(&self, id: &str) -> Result<Option<ViewMeta>>;

    async fn get_view_columns(&self, view_id: &str) -> Result<Vec<ViewColumn>>;

    async fn get_relation_column(&self, id: &str) -> Result<Option<Column>>;

    async fn get_view_filters(&self, _view_id: &str) -> Result<Vec<Filter>> {
        Ok(Vec::new())
    }

    async fn get_view_sorts(&self, _view_id: &str) -> Result<Vec<Sort>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
struct StoreData {
    models: HashMap<String, Model>,
    views: HashMap<String, View>,
}

/// Meta store backed by maps, for tests and demos. Counts model reads so
/// callers can observe cache behaviour.
#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    data: RwLock<StoreData>,
    model_reads: AtomicUsize,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(models: impl IntoIterator<Item = Model>) -> Self {
        let store = Self::new();
        for model in models {
            store.put_model(model);
        }
        store
    }

    pub fn put_model(&self, model: Model) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.models.insert(model.id.clone(), model);
    }

    pub fn put_view(&self, view: View) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.views.insert(view.meta.id.clone(), view);
    }

    pub fn remove_model(&self, id: &str) -> Option<Model> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.models.remove(id)
    }

    /// Applies a change to a stored model, as a schema mutation would.
    pub fn update_model(&self, id: &str, f: impl FnOnce(&mut Model)) -> bool {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        match data.models.get_mut(id) {
            Some(model) => {
                f(model);
                true
            }
            None => false,
        }
    }

    pub fn model_reads(&self) -> usize {
        self.model_reads.load(Ordering::SeqCst)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> T {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&data)
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn get_model(&self, id: &str) -> Result<Option<TableMeta>> {
        self.model_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.read(|data| {
            data.models.get(id).map(|m| TableMeta {
                id: m.id.clone(),
                base_id: m.base_id.clone(),
                title: m.title.clone(),
                table_name: m.table_name.clone(),
            })
        }))
    }

    async fn get_columns_for_model(&self, model_id: &str) -> Result<Vec<Column>> {
        Ok(self.read(|data| {
            data.models
                .get(model_id)
                .map(|m| m.columns.clone())
                .unwrap_or_default()
        }))
    }

    async fn get_view(&self, id: &str) -> Result<Option<ViewMeta>> {
        Ok(self.read(|data| data.views.get(id).map(|v| v.meta.clone())))
    }

    async fn get_view_columns(&self, view_id: &str) -> Result<Vec<ViewColumn>> {
        Ok(self.read(|data| {
            data.views
                .get(view_id)
                .map(|v| v.columns.clone())
                .unwrap_or_default()
        }))
    }

    async fn get_relation_column(&self, id: &str) -> Result<Option<Column>> {
        Ok(self.read(|data| {
            data.models
                .values()
                .flat_map(|m| m.columns.iter())
                .find(|c| c.id == id)
                .cloned()
        }))
    }

    async fn get_view_filters(&self, view_id: &str) -> Result<Vec<Filter>> {
        Ok(self.read(|data| {
            data.views
                .get(view_id)
                .map(|v| v.filters.clone())
                .unwrap_or_default()
        }))
    }

    async fn get_view_sorts(&self, view_id: &str) -> Result<Vec<Sort>> {
        Ok(self.read(|data| {
            data.views
                .get(view_id)
                .map(|v| v.sorts.clone())
                .unwrap_or_default()
        }))
    }
}
