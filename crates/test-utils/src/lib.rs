//! Shared test utilities for the ingestion workspace.
//!
//! This crate provides:
//! - In-memory fakes for every external collaborator trait
//! - Common fixtures (stations, raw records, encoded workbooks)
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, InMemoryStationSource, RecordingSink};
//! ```

pub mod fakes;
pub mod fixtures;

pub use fakes::*;

/// Assert that a result failed with the given `IngressError` kind label.
///
/// ```ignore
/// use test_utils::assert_error_kind;
///
/// assert_error_kind!(cache.merge_and_push(batch).await, "upsert_failure");
/// ```
#[macro_export]
macro_rules! assert_error_kind {
    ($result:expr, $kind:expr) => {{
        match $result {
            Ok(_) => panic!("expected error of kind `{}`, got Ok", $kind),
            Err(e) => assert_eq!(e.kind(), $kind, "unexpected error: {}", e),
        }
    }};
}
