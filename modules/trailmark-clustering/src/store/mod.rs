//! Persistence boundary for grouping records.
//!
//! Sync reads before it writes, so uniqueness violations only surface when two
//! syncs for the same scope race. Implementations report those as
//! [`StoreError::Duplicate`] so the caller can skip instead of failing.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use trailmark_common::{DateRange, GroupingRecord, NewGroupingRecord, SyncScope, TrailmarkError};

pub use memory::InMemoryGroupingStore;
pub use postgres::PgGroupingStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate grouping record: {0}")]
    Duplicate(String),

    #[error("Grouping record not found: {0}")]
    NotFound(Uuid),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for TrailmarkError {
    fn from(e: StoreError) -> Self {
        TrailmarkError::Store(e.to_string())
    }
}

#[async_trait]
pub trait GroupingStore: Send + Sync {
    /// Active cluster-based record for `(author, mode, cluster_ref)`.
    async fn find_cluster_record(
        &self,
        scope: &SyncScope,
        cluster_ref: &str,
    ) -> Result<Option<GroupingRecord>, StoreError>;

    /// Cluster-based record sharing the most activities with `activity_ids`,
    /// oldest first on ties. `None` when no record shares any.
    async fn find_cluster_record_sharing(
        &self,
        scope: &SyncScope,
        activity_ids: &[String],
    ) -> Result<Option<GroupingRecord>, StoreError>;

    /// Temporal records whose time range overlaps `range` (inclusive), in
    /// chronological order.
    async fn find_overlapping_time_records(
        &self,
        scope: &SyncScope,
        range: &DateRange,
    ) -> Result<Vec<GroupingRecord>, StoreError>;

    /// Insert a record with `narrative_pending = true`.
    async fn create(&self, record: NewGroupingRecord) -> Result<GroupingRecord, StoreError>;

    /// Replace a record's membership and mark its narrative pending again.
    /// `time_range`, when given, replaces the stored range.
    async fn update_activities(
        &self,
        id: Uuid,
        activity_ids: &[String],
        time_range: Option<DateRange>,
    ) -> Result<GroupingRecord, StoreError>;

    /// Collapse temporal records into `survivor`: `retired` records are
    /// deleted and the survivor takes `activity_ids` and `time_range`, as one
    /// atomic write. The survivor's narrative is pending again.
    async fn merge_time_records(
        &self,
        survivor: Uuid,
        retired: &[Uuid],
        activity_ids: &[String],
        time_range: DateRange,
    ) -> Result<GroupingRecord, StoreError>;

    /// Called by the narrative generator once a record's story is written.
    async fn mark_narrative_generated(&self, id: Uuid) -> Result<(), StoreError>;

    /// Every record in the scope, oldest first.
    async fn list(&self, scope: &SyncScope) -> Result<Vec<GroupingRecord>, StoreError>;
}

fn ranges_overlap(a: &DateRange, b: &DateRange) -> bool {
    a.start <= b.end && b.start <= a.end
}
