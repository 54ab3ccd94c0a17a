//! Ingestion pipeline for the Rhode Island Open Meetings Portal: fetch
//! meeting and public body pages, parse and normalize them, and keep the
//! results in a local document store.

pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod ingest;
pub mod parse;
pub mod progress;
pub mod raw;
pub mod resource;
pub mod schema;
pub mod store;
pub mod validate;

pub use config::Config;
pub use db::DocumentStore;
pub use error::{Error, ErrorKind, Result};
pub use ingest::{IngestOptions, IngestReport, Pipeline, UpdateOutcome};
pub use resource::ResourceType;
