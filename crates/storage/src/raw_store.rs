//! Retrieval of stored raw payloads.
//!
//! Collectors store every raw payload once; downstream consumers receive a
//! [`RawReference`] and fetch the payload by `(db, collection, id)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ingress_common::{IngressError, IngressResult};

use crate::object_store::ObjectStorage;

/// Pointer to a stored raw payload, as carried on the update streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawReference {
    pub id: String,
    pub db: String,
    pub collection: String,
}

impl RawReference {
    pub fn new(db: impl Into<String>, collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            db: db.into(),
            collection: collection.into(),
        }
    }

    /// Object key: `{db}/{collection}/{id}.json`.
    pub fn object_path(&self) -> String {
        format!("{}/{}/{}.json", self.db, self.collection, self.id)
    }
}

impl std::fmt::Display for RawReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.db, self.collection, self.id)
    }
}

/// A stored raw payload with its receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub provider: String,
    pub timestamp: DateTime<Utc>,
    /// Either the payload text or an already-parsed JSON document.
    pub rawdata: serde_json::Value,
}

impl RawRecord {
    /// Payload as text. String payloads are returned verbatim, documents
    /// are serialized.
    pub fn payload_text(&self) -> String {
        match &self.rawdata {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Storage collaborator: raw payloads retrievable by reference.
#[async_trait]
pub trait RawPayloadStore: Send + Sync {
    async fn get_raw(&self, reference: &RawReference) -> IngressResult<RawRecord>;
}

/// [`RawPayloadStore`] backed by object storage.
pub struct ObjectRawStore {
    storage: ObjectStorage,
}

impl ObjectRawStore {
    pub fn new(storage: ObjectStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl RawPayloadStore for ObjectRawStore {
    #[instrument(skip(self), fields(reference = %reference))]
    async fn get_raw(&self, reference: &RawReference) -> IngressResult<RawRecord> {
        let bytes = self.storage.get(&reference.object_path()).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            IngressError::Serialization(format!("Invalid raw record {}: {}", reference, e))
        })
    }
}
