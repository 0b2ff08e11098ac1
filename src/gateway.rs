use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::timeout};

use crate::{
    database::{MappingStore, StoreError},
    error::ShortenError,
    models::UrlRecord,
};

/// Owns the store handle shared by every request.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn MappingStore>,
    visit_timeout: Duration,
    /// Visit updates still running. Dropping a handle detaches the task.
    pending_visits: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Gateway {
    pub fn new(store: Arc<dyn MappingStore>, visit_timeout: Duration) -> Self {
        Self {
            store,
            visit_timeout,
            pending_visits: Arc::default(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub async fn count(&self) -> Result<u64, ShortenError> {
        self.store
            .count()
            .await
            .map_err(|err| ShortenError::store_unkeyed("count", err))
    }

    /// Returns the record stored under `id`, inserting one for `url` if
    /// there is none yet.
    ///
    /// An existing record is returned untouched, even when it was created for
    /// a different URL that hashed to the same id.
    #[tracing::instrument(skip(self, url))]
    pub async fn create_or_get(&self, id: &str, url: &str) -> Result<UrlRecord, ShortenError> {
        if let Some(existing) = self.find(id).await? {
            warn_on_collision(&existing, url);
            return Ok(existing);
        }

        let record = UrlRecord::new(id.to_owned(), url.to_owned());
        match self.store.insert(&record).await {
            Ok(()) => {
                tracing::debug!("created short link");
                Ok(record)
            }
            Err(StoreError::DuplicateKey(_)) => {
                tracing::debug!("lost insert race, refetching");
                let existing = self.find(id).await?.ok_or_else(|| {
                    ShortenError::store(
                        "refetch",
                        id,
                        StoreError::Backend("record vanished after duplicate key".to_owned()),
                    )
                })?;
                warn_on_collision(&existing, url);
                Ok(existing)
            }
            Err(err) => Err(ShortenError::store("insert", id, err)),
        }
    }

    /// Looks up `id` and schedules a visit increment in the background.
    ///
    /// The returned record reflects the state before the increment.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, id: &str) -> Result<UrlRecord, ShortenError> {
        let record = self
            .find(id)
            .await?
            .ok_or_else(|| ShortenError::NotFound(id.to_owned()))?;

        self.record_visit(id);

        Ok(record)
    }

    /// Spawns the increment detached from the caller so a finished or
    /// dropped request never cancels it.
    pub(crate) fn record_visit(&self, id: &str) {
        let store = Arc::clone(&self.store);
        let limit = self.visit_timeout;
        let id = id.to_owned();

        let handle = tokio::spawn(async move {
            match timeout(limit, store.increment_visits(&id)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(id = %id, err = ?err, "failed to update visit count");
                }
                Err(_) => {
                    let err = StoreError::Timeout(limit);
                    tracing::warn!(id = %id, err = ?err, "visit count update abandoned");
                }
            }
        });

        let mut pending = self.pending_visits.lock();
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
    }

    /// Waits for every visit update spawned so far.
    pub(crate) async fn drain_visits(&self) {
        let pending = std::mem::take(&mut *self.pending_visits.lock());
        for handle in pending {
            if let Err(err) = handle.await {
                tracing::error!(err = ?err, "visit count task failed");
            }
        }
    }

    /// Lets outstanding visit updates finish, then releases the store.
    pub async fn close(&self) {
        // Each update is already bounded by `visit_timeout`; the slack only
        // covers scheduling.
        let limit = self.visit_timeout.saturating_mul(2);
        if timeout(limit, self.drain_visits()).await.is_err() {
            tracing::warn!(?limit, "visit count updates still pending at close");
        }
        self.store.close().await;
    }

    async fn find(&self, id: &str) -> Result<Option<UrlRecord>, ShortenError> {
        self.store
            .find(id)
            .await
            .map_err(|err| ShortenError::store("find", id, err))
    }
}

fn warn_on_collision(existing: &UrlRecord, url: &str) {
    if existing.original_url != url {
        tracing::warn!(
            id = %existing.id,
            stored = %existing.original_url,
            requested = %url,
            "identifier collision, keeping stored url"
        );
    }
}
