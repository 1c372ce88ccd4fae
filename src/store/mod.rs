//! Persistence layer — the knowledge graph behind one trait, with a Neo4j
//! backend for production and an embedded libSQL backend for local use.

pub mod libsql_backend;
pub mod migrations;
pub mod neo4j;
pub mod traits;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use libsql_backend::LibSqlBackend;
pub use neo4j::Neo4jBackend;
pub use traits::{AppliedMigration, GraphCounts, GraphStore};

use crate::config::StoreConfig;
use crate::error::DatabaseError;

/// Open the configured backend. Pending migrations run before it is returned.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn GraphStore>, DatabaseError> {
    match config {
        StoreConfig::LibSql { path } => Ok(Arc::new(LibSqlBackend::new_local(path).await?)),
        StoreConfig::Neo4j(neo4j) => Ok(Arc::new(Neo4jBackend::connect(neo4j).await?)),
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // SQLite datetime() output, with and without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats() {
        let rfc = parse_datetime("2026-03-01T10:20:30Z");
        assert_eq!(rfc.to_rfc3339(), "2026-03-01T10:20:30+00:00");
        let sqlite = parse_datetime("2026-03-01 10:20:30");
        assert_eq!(sqlite, rfc);
        let fractional = parse_datetime("2026-03-01 10:20:30.500");
        assert!(fractional > rfc);
    }

    #[test]
    fn unparseable_is_min() {
        assert_eq!(parse_datetime(""), DateTime::<Utc>::MIN_UTC);
        assert_eq!(parse_datetime("yesterday"), DateTime::<Utc>::MIN_UTC);
    }
}
