//! Postgres persistence for grouping records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use trailmark_common::{DateRange, GroupingMethod, GroupingRecord, NewGroupingRecord, SyncScope};

use super::{GroupingStore, StoreError};

/// unique_violation, exclusion_violation
const DUPLICATE_SQLSTATES: [&str; 2] = ["23505", "23P01"];

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db
                .code()
                .is_some_and(|code| DUPLICATE_SQLSTATES.contains(&code.as_ref()))
            {
                return StoreError::Duplicate(db.message().to_string());
            }
        }
        StoreError::Backend(e.to_string())
    }
}

/// A row from the grouping_records table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct GroupingRow {
    id: Uuid,
    author: String,
    mode: String,
    grouping_method: String,
    activity_ids: Vec<String>,
    cluster_ref: Option<String>,
    time_range_start: Option<DateTime<Utc>>,
    time_range_end: Option<DateTime<Utc>>,
    narrative_pending: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GroupingRow> for GroupingRecord {
    type Error = StoreError;

    fn try_from(row: GroupingRow) -> Result<Self, Self::Error> {
        let grouping_method = GroupingMethod::parse(&row.grouping_method).ok_or_else(|| {
            StoreError::Backend(format!(
                "record {} has unknown grouping_method '{}'",
                row.id, row.grouping_method
            ))
        })?;
        Ok(GroupingRecord {
            id: row.id,
            author: row.author,
            mode: row.mode,
            grouping_method,
            activity_ids: row.activity_ids,
            cluster_ref: row.cluster_ref,
            time_range_start: row.time_range_start,
            time_range_end: row.time_range_end,
            narrative_pending: row.narrative_pending,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_record(row: Option<GroupingRow>) -> Result<Option<GroupingRecord>, StoreError> {
    row.map(GroupingRecord::try_from).transpose()
}

pub struct PgGroupingStore {
    pool: PgPool,
}

impl PgGroupingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("Connected to grouping store");
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl GroupingStore for PgGroupingStore {
    async fn find_cluster_record(
        &self,
        scope: &SyncScope,
        cluster_ref: &str,
    ) -> Result<Option<GroupingRecord>, StoreError> {
        let row = sqlx::query_as::<_, GroupingRow>(
            r#"
            SELECT * FROM grouping_records
            WHERE author = $1 AND mode = $2
              AND grouping_method = 'cluster' AND cluster_ref = $3
            LIMIT 1
            "#,
        )
        .bind(&scope.author)
        .bind(&scope.mode)
        .bind(cluster_ref)
        .fetch_optional(&self.pool)
        .await?;

        into_record(row)
    }

    async fn find_cluster_record_sharing(
        &self,
        scope: &SyncScope,
        activity_ids: &[String],
    ) -> Result<Option<GroupingRecord>, StoreError> {
        let row = sqlx::query_as::<_, GroupingRow>(
            r#"
            SELECT * FROM grouping_records
            WHERE author = $1 AND mode = $2
              AND grouping_method = 'cluster' AND activity_ids && $3
            ORDER BY cardinality(ARRAY(
                         SELECT unnest(activity_ids) INTERSECT SELECT unnest($3::text[])
                     )) DESC,
                     created_at, id
            LIMIT 1
            "#,
        )
        .bind(&scope.author)
        .bind(&scope.mode)
        .bind(activity_ids)
        .fetch_optional(&self.pool)
        .await?;

        into_record(row)
    }

    async fn find_overlapping_time_records(
        &self,
        scope: &SyncScope,
        range: &DateRange,
    ) -> Result<Vec<GroupingRecord>, StoreError> {
        let rows = sqlx::query_as::<_, GroupingRow>(
            r#"
            SELECT * FROM grouping_records
            WHERE author = $1 AND mode = $2 AND grouping_method = 'time'
              AND time_range_start <= $4 AND time_range_end >= $3
            ORDER BY time_range_start
            "#,
        )
        .bind(&scope.author)
        .bind(&scope.mode)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(GroupingRecord::try_from).collect()
    }

    async fn create(&self, new: NewGroupingRecord) -> Result<GroupingRecord, StoreError> {
        let row = sqlx::query_as::<_, GroupingRow>(
            r#"
            INSERT INTO grouping_records
                (author, mode, grouping_method, activity_ids, cluster_ref,
                 time_range_start, time_range_end, narrative_pending)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            RETURNING *
            "#,
        )
        .bind(&new.scope.author)
        .bind(&new.scope.mode)
        .bind(new.grouping_method.as_str())
        .bind(&new.activity_ids)
        .bind(&new.cluster_ref)
        .bind(new.time_range.map(|r| r.start))
        .bind(new.time_range.map(|r| r.end))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn update_activities(
        &self,
        id: Uuid,
        activity_ids: &[String],
        time_range: Option<DateRange>,
    ) -> Result<GroupingRecord, StoreError> {
        let row = sqlx::query_as::<_, GroupingRow>(
            r#"
            UPDATE grouping_records
            SET activity_ids = $2,
                time_range_start = COALESCE($3, time_range_start),
                time_range_end = COALESCE($4, time_range_end),
                narrative_pending = TRUE,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(activity_ids)
        .bind(time_range.map(|r| r.start))
        .bind(time_range.map(|r| r.end))
        .fetch_optional(&self.pool)
        .await?;

        into_record(row)?.ok_or(StoreError::NotFound(id))
    }

    async fn merge_time_records(
        &self,
        survivor: Uuid,
        retired: &[Uuid],
        activity_ids: &[String],
        time_range: DateRange,
    ) -> Result<GroupingRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Retired windows go first so the widened survivor never overlaps them.
        let deleted: Vec<Uuid> = sqlx::query_scalar(
            r#"
            DELETE FROM grouping_records
            WHERE id = ANY($1) AND grouping_method = 'time'
            RETURNING id
            "#,
        )
        .bind(retired)
        .fetch_all(&mut *tx)
        .await?;
        if let Some(missing) = retired.iter().find(|id| !deleted.contains(id)) {
            return Err(StoreError::NotFound(*missing));
        }

        let row = sqlx::query_as::<_, GroupingRow>(
            r#"
            UPDATE grouping_records
            SET activity_ids = $2,
                time_range_start = $3,
                time_range_end = $4,
                narrative_pending = TRUE,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(survivor)
        .bind(activity_ids)
        .bind(time_range.start)
        .bind(time_range.end)
        .fetch_optional(&mut *tx)
        .await?;
        let record = into_record(row)?.ok_or(StoreError::NotFound(survivor))?;

        tx.commit().await?;
        Ok(record)
    }

    async fn mark_narrative_generated(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE grouping_records
            SET narrative_pending = FALSE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self, scope: &SyncScope) -> Result<Vec<GroupingRecord>, StoreError> {
        let rows = sqlx::query_as::<_, GroupingRow>(
            r#"
            SELECT * FROM grouping_records
            WHERE author = $1 AND mode = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(&scope.author)
        .bind(&scope.mode)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(GroupingRecord::try_from).collect()
    }
}
