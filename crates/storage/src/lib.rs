//! Adapters for the external collaborators of the ingestion services.
//!
//! Provides:
//! - Redis streams for the delivery channels and update streams
//! - Object storage (MinIO/S3) for stored raw payloads
//! - HTTP client for the time-series writer API

pub mod object_store;
pub mod queue;
pub mod raw_store;
pub mod timeseries;

pub use self::object_store::{ObjectStorage, ObjectStorageConfig};
pub use queue::{ChannelPublisher, ChannelStreams, RedisChannelPublisher, StreamConsumer, StreamDelivery};
pub use raw_store::{ObjectRawStore, RawPayloadStore, RawRecord, RawReference};
pub use timeseries::{TimeSeriesClient, TimeSeriesConfig};
