//! Repository trait for the attempt log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{AttemptKey, AttemptRecord, NewAttemptRecord, RecordFilter},
};

/// Storage for the append-only attempt log.
///
/// The tracker derives all lockout state from this log, so implementations
/// only need to append records and answer filtered queries for one
/// `(identity, origin)` pair. Ids must grow in append order: the tracker uses
/// them to tell which of two records sharing a timestamp came last.
///
/// Backends should surface a connection failure as
/// [`StorageError::Unavailable`](crate::error::StorageError::Unavailable) so
/// the gate can apply its lookup-failure policy.
#[async_trait]
pub trait AttemptRepository: Send + Sync + 'static {
    /// Append a record and return it with its assigned id.
    async fn append_record(&self, record: NewAttemptRecord) -> Result<AttemptRecord, Error>;

    /// Records for the pair matching `filter`, most recent first.
    async fn query_recent(
        &self,
        key: &AttemptKey,
        filter: &RecordFilter,
    ) -> Result<Vec<AttemptRecord>, Error>;

    /// Number of records for the pair matching `filter`. `filter.limit` is
    /// ignored.
    async fn count_records(&self, key: &AttemptKey, filter: &RecordFilter) -> Result<u64, Error>;

    /// Delete records older than `before`, keeping any lockout that is still
    /// in force at `before` along with every later record for its pair.
    ///
    /// # Returns
    ///
    /// The number of records deleted.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error>;

    async fn health_check(&self) -> Result<(), Error>;

    /// Create or upgrade whatever schema the backend needs. Backends without
    /// a schema keep the default no-op.
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }
}
