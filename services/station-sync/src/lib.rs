//! Station sync service.
//!
//! Consumes references to stored provider payloads, maps them to stations
//! and measurements, reconciles station metadata through the merge cache
//! and pushes the result to the time-series store. A separate stream
//! carries enrichment workbooks that trigger a full metadata sync.

pub mod config;
pub mod config_loader;
pub mod listener;
pub mod mapping;
pub mod server;

pub use config::{MetadataConfig, OriginConfig, SyncConfig};
pub use listener::{
    run_listener, HandleSummary, ListenerStats, MessageHandler, MetadataHandler, OriginHandler,
    UpdateStream,
};
pub use mapping::{map_payload, FieldMapping, MappedPayload};
