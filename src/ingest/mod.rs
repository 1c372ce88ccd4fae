//! Org-chart roster ingestion from CSV.

pub mod encoding;
pub mod roster;
pub mod routes;
pub mod service;

pub use routes::{IngestRouteState, ingest_routes};
pub use service::{IngestReport, IngestService, IngestStatus, fix_encoding};
