use std::time::Duration;

use async_trait::async_trait;
use bson::doc;
use mongodb::{
    Client, Collection,
    error::{Error, ErrorKind, WriteError, WriteFailure},
    options::{ClientOptions, ServerApi, ServerApiVersion},
};

use crate::models::UrlRecord;

const COLLECTION: &str = "urls";
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record {0} already exists")]
    DuplicateKey(String),
    #[error("mongodb: {0}")]
    Mongo(#[from] Error),
    #[error("{0}")]
    Backend(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Persistent collection of [`UrlRecord`]s keyed by id.
///
/// Every operation is atomic on its own; callers never need a transaction.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<UrlRecord>, StoreError>;

    /// Inserts a new record, failing with [`StoreError::DuplicateKey`] when
    /// the id is taken.
    async fn insert(&self, record: &UrlRecord) -> Result<(), StoreError>;

    /// Adds one to `visits`. Unknown ids are left alone.
    async fn increment_visits(&self, id: &str) -> Result<(), StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn close(&self) {}

    fn backend_name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    urls: Collection<UrlRecord>,
}

impl MongoStore {
    pub async fn connect(connection_string: &str, database: &str) -> Result<Self, StoreError> {
        let mut client_options = ClientOptions::parse(connection_string).await?;
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        let urls = client.database(database).collection::<UrlRecord>(COLLECTION);
        tracing::info!(database, collection = COLLECTION, "connected to mongodb");

        Ok(Self { client, urls })
    }
}

#[async_trait]
impl MappingStore for MongoStore {
    async fn find(&self, id: &str) -> Result<Option<UrlRecord>, StoreError> {
        Ok(self.urls.find_one(doc! { "_id": id }).await?)
    }

    async fn insert(&self, record: &UrlRecord) -> Result<(), StoreError> {
        match self.urls.insert_one(record).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StoreError::DuplicateKey(record.id.clone())),
            Err(err) => Err(err.into()),
        }
    }

    async fn increment_visits(&self, id: &str) -> Result<(), StoreError> {
        self.urls
            .update_one(doc! { "_id": id }, doc! { "$inc": { "visits": 1 } })
            .await?;

        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.urls.count_documents(doc! {}).await?)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
        tracing::info!("disconnected from mongodb");
    }

    fn backend_name(&self) -> &'static str {
        "mongodb"
    }
}

fn is_duplicate_key(err: &Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(WriteError {
            code: DUPLICATE_KEY_CODE,
            ..
        }))
    )
}
