use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    database::{MappingStore, StoreError},
    models::UrlRecord,
};

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    urls: DashMap<String, UrlRecord>,
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn find(&self, id: &str) -> Result<Option<UrlRecord>, StoreError> {
        Ok(self.urls.get(id).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, record: &UrlRecord) -> Result<(), StoreError> {
        match self.urls.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(record.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn increment_visits(&self, id: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.urls.get_mut(id) {
            entry.visits += 1;
        }

        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.urls.len() as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
