//! HTTP delivery for trace pipelines.
//!
//! This crate provides:
//! - HttpSink: POSTs transformed batches to an HTTP endpoint
//! - TransformRegistry: named batch transforms (`json`, `ndjson`, `envelope`)

mod error;
mod sink;
mod transform;

pub use error::{HttpSinkError, HttpSinkResult};
pub use sink::{HttpSink, USER_AGENT};
pub use transform::{envelope, json_array, ndjson, TransformFn, TransformRegistry};
