use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use trailmark_common::{DateRange, GroupingMethod, GroupingRecord, NewGroupingRecord, SyncScope};

use super::{ranges_overlap, GroupingStore, StoreError};

/// Process-local store with the same uniqueness rules as the Postgres schema.
#[derive(Default)]
pub struct InMemoryGroupingStore {
    records: RwLock<Vec<GroupingRecord>>,
}

impl InMemoryGroupingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn in_scope(record: &GroupingRecord, scope: &SyncScope) -> bool {
    record.author == scope.author && record.mode == scope.mode
}

fn record_range(record: &GroupingRecord) -> Option<DateRange> {
    Some(DateRange {
        start: record.time_range_start?,
        end: record.time_range_end?,
    })
}

/// Whether a temporal record in `scope`, other than those in `except`,
/// overlaps `range`.
fn time_clash(
    records: &[GroupingRecord],
    scope: &SyncScope,
    range: &DateRange,
    except: &[Uuid],
) -> bool {
    records.iter().any(|r| {
        in_scope(r, scope)
            && r.grouping_method == GroupingMethod::Time
            && !except.contains(&r.id)
            && record_range(r).is_some_and(|existing| ranges_overlap(&existing, range))
    })
}

fn overlap_error(author: &str, mode: &str) -> StoreError {
    StoreError::Duplicate(format!("{author}/{mode}: overlapping time window"))
}

fn shared_count(record: &GroupingRecord, activity_ids: &[String]) -> usize {
    record
        .activity_ids
        .iter()
        .filter(|id| activity_ids.contains(id))
        .count()
}

#[async_trait]
impl GroupingStore for InMemoryGroupingStore {
    async fn find_cluster_record(
        &self,
        scope: &SyncScope,
        cluster_ref: &str,
    ) -> Result<Option<GroupingRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| {
                in_scope(r, scope)
                    && r.grouping_method == GroupingMethod::Cluster
                    && r.cluster_ref.as_deref() == Some(cluster_ref)
            })
            .cloned())
    }

    async fn find_cluster_record_sharing(
        &self,
        scope: &SyncScope,
        activity_ids: &[String],
    ) -> Result<Option<GroupingRecord>, StoreError> {
        let records = self.records.read().await;
        let mut best: Option<(&GroupingRecord, usize)> = None;
        for record in records
            .iter()
            .filter(|r| in_scope(r, scope) && r.grouping_method == GroupingMethod::Cluster)
        {
            let shared = shared_count(record, activity_ids);
            if shared > 0 && best.map_or(true, |(_, most)| shared > most) {
                best = Some((record, shared));
            }
        }
        Ok(best.map(|(record, _)| record.clone()))
    }

    async fn find_overlapping_time_records(
        &self,
        scope: &SyncScope,
        range: &DateRange,
    ) -> Result<Vec<GroupingRecord>, StoreError> {
        let records = self.records.read().await;
        let mut found: Vec<GroupingRecord> = records
            .iter()
            .filter(|r| {
                in_scope(r, scope)
                    && r.grouping_method == GroupingMethod::Time
                    && record_range(r).is_some_and(|existing| ranges_overlap(&existing, range))
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| r.time_range_start);
        Ok(found)
    }

    async fn create(&self, new: NewGroupingRecord) -> Result<GroupingRecord, StoreError> {
        let mut records = self.records.write().await;

        let clash = records.iter().any(|r| {
            if !in_scope(r, &new.scope) || r.grouping_method != new.grouping_method {
                return false;
            }
            match new.grouping_method {
                GroupingMethod::Cluster => r.cluster_ref.is_some() && r.cluster_ref == new.cluster_ref,
                GroupingMethod::Time => match (record_range(r), new.time_range) {
                    (Some(existing), Some(range)) => ranges_overlap(&existing, &range),
                    _ => false,
                },
                GroupingMethod::Manual => false,
            }
        });
        if clash {
            let key = new
                .cluster_ref
                .clone()
                .unwrap_or_else(|| "overlapping time window".to_string());
            return Err(StoreError::Duplicate(format!(
                "{}/{}: {key}",
                new.scope.author, new.scope.mode
            )));
        }

        let now = Utc::now();
        let record = GroupingRecord {
            id: Uuid::new_v4(),
            author: new.scope.author,
            mode: new.scope.mode,
            grouping_method: new.grouping_method,
            activity_ids: new.activity_ids,
            cluster_ref: new.cluster_ref,
            time_range_start: new.time_range.map(|r| r.start),
            time_range_end: new.time_range.map(|r| r.end),
            narrative_pending: true,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn update_activities(
        &self,
        id: Uuid,
        activity_ids: &[String],
        time_range: Option<DateRange>,
    ) -> Result<GroupingRecord, StoreError> {
        let mut records = self.records.write().await;
        let index = records
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if let Some(range) = &time_range {
            let current = &records[index];
            if current.grouping_method == GroupingMethod::Time {
                let scope = SyncScope::new(current.author.clone(), current.mode.clone());
                if time_clash(&records, &scope, range, &[id]) {
                    return Err(overlap_error(&scope.author, &scope.mode));
                }
            }
        }
        let record = &mut records[index];
        record.activity_ids = activity_ids.to_vec();
        if let Some(range) = time_range {
            record.time_range_start = Some(range.start);
            record.time_range_end = Some(range.end);
        }
        record.narrative_pending = true;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn merge_time_records(
        &self,
        survivor: Uuid,
        retired: &[Uuid],
        activity_ids: &[String],
        time_range: DateRange,
    ) -> Result<GroupingRecord, StoreError> {
        let mut records = self.records.write().await;
        for id in std::iter::once(&survivor).chain(retired) {
            if !records.iter().any(|r| r.id == *id) {
                return Err(StoreError::NotFound(*id));
            }
        }
        let index = records
            .iter()
            .position(|r| r.id == survivor)
            .ok_or(StoreError::NotFound(survivor))?;
        let scope = SyncScope::new(records[index].author.clone(), records[index].mode.clone());
        let mut except = retired.to_vec();
        except.push(survivor);
        if time_clash(&records, &scope, &time_range, &except) {
            return Err(overlap_error(&scope.author, &scope.mode));
        }

        records.retain(|r| !retired.contains(&r.id));
        let record = records
            .iter_mut()
            .find(|r| r.id == survivor)
            .ok_or(StoreError::NotFound(survivor))?;
        record.activity_ids = activity_ids.to_vec();
        record.time_range_start = Some(time_range.start);
        record.time_range_end = Some(time_range.end);
        record.narrative_pending = true;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn mark_narrative_generated(&self, id: Uuid) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        record.narrative_pending = false;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, scope: &SyncScope) -> Result<Vec<GroupingRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| in_scope(r, scope)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn scope() -> SyncScope {
        SyncScope::new("dana", "work")
    }

    fn range(from_day: u32, to_day: u32) -> DateRange {
        DateRange {
            start: Utc.with_ymd_and_hms(2026, 3, from_day, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, to_day, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn duplicate_cluster_ref_is_rejected_per_scope() {
        let store = InMemoryGroupingStore::new();
        store
            .create(NewGroupingRecord::cluster(&scope(), "web", vec!["a".into()]))
            .await
            .unwrap();

        let err = store
            .create(NewGroupingRecord::cluster(&scope(), "web", vec!["b".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        let other = SyncScope::new("eve", "work");
        store
            .create(NewGroupingRecord::cluster(&other, "web", vec!["b".into()]))
            .await
            .unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn overlapping_time_windows_are_rejected() {
        let store = InMemoryGroupingStore::new();
        store
            .create(NewGroupingRecord::temporal(&scope(), range(1, 10), vec!["a".into()]))
            .await
            .unwrap();

        let overlapping = store
            .create(NewGroupingRecord::temporal(&scope(), range(10, 20), vec!["b".into()]))
            .await;
        assert!(matches!(overlapping, Err(StoreError::Duplicate(_))));

        store
            .create(NewGroupingRecord::temporal(&scope(), range(11, 20), vec!["b".into()]))
            .await
            .unwrap();

        let found = store
            .find_overlapping_time_records(&scope(), &range(5, 6))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].activity_ids, vec!["a"]);

        let both = store
            .find_overlapping_time_records(&scope(), &range(9, 12))
            .await
            .unwrap();
        let starts: Vec<_> = both.iter().map(|r| r.time_range_start).collect();
        assert_eq!(starts, vec![Some(range(1, 10).start), Some(range(11, 20).start)]);
    }

    #[tokio::test]
    async fn widening_a_window_into_its_neighbour_is_rejected() {
        let store = InMemoryGroupingStore::new();
        let first = store
            .create(NewGroupingRecord::temporal(&scope(), range(1, 3), vec!["a".into()]))
            .await
            .unwrap();
        store
            .create(NewGroupingRecord::temporal(&scope(), range(15, 17), vec!["b".into()]))
            .await
            .unwrap();

        let err = store
            .update_activities(first.id, &["a".to_string(), "c".to_string()], Some(range(1, 16)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        let stored = store
            .find_overlapping_time_records(&scope(), &range(1, 1))
            .await
            .unwrap();
        assert_eq!(stored[0].time_range_end, Some(range(1, 3).end));
        assert_eq!(stored[0].activity_ids, vec!["a"]);

        store
            .update_activities(first.id, &["a".to_string(), "c".to_string()], Some(range(1, 10)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn merge_retires_absorbed_windows() {
        let store = InMemoryGroupingStore::new();
        let first = store
            .create(NewGroupingRecord::temporal(&scope(), range(1, 3), vec!["a".into()]))
            .await
            .unwrap();
        let second = store
            .create(NewGroupingRecord::temporal(&scope(), range(15, 17), vec!["b".into()]))
            .await
            .unwrap();
        store.mark_narrative_generated(first.id).await.unwrap();

        let merged = store
            .merge_time_records(
                first.id,
                &[second.id],
                &["a".to_string(), "b".to_string(), "c".to_string()],
                range(1, 17),
            )
            .await
            .unwrap();
        assert_eq!(merged.id, first.id);
        assert!(merged.narrative_pending);
        assert_eq!(merged.activity_ids, vec!["a", "b", "c"]);
        assert_eq!(store.len().await, 1);

        let err = store
            .merge_time_records(first.id, &[second.id], &[], range(1, 17))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == second.id));
    }

    #[tokio::test]
    async fn sharing_lookup_prefers_the_largest_overlap() {
        let store = InMemoryGroupingStore::new();
        store
            .create(NewGroupingRecord::cluster(&scope(), "web", vec!["a".into(), "b".into()]))
            .await
            .unwrap();
        store
            .create(NewGroupingRecord::cluster(
                &scope(),
                "api",
                vec!["c".into(), "d".into(), "e".into()],
            ))
            .await
            .unwrap();

        let ids: Vec<String> = ["b", "d", "e", "z"].iter().map(|s| s.to_string()).collect();
        let found = store.find_cluster_record_sharing(&scope(), &ids).await.unwrap().unwrap();
        assert_eq!(found.cluster_ref.as_deref(), Some("api"));

        let none = store
            .find_cluster_record_sharing(&scope(), &["z".to_string()])
            .await
            .unwrap();
        assert!(none.is_none());
        let other_scope = store
            .find_cluster_record_sharing(&SyncScope::new("eve", "work"), &ids)
            .await
            .unwrap();
        assert!(other_scope.is_none());
    }

    #[tokio::test]
    async fn narrative_state_round_trip() {
        let store = InMemoryGroupingStore::new();
        let record = store
            .create(NewGroupingRecord::cluster(&scope(), "web", vec!["a".into()]))
            .await
            .unwrap();
        assert!(record.narrative_pending);

        store.mark_narrative_generated(record.id).await.unwrap();
        let stored = store.find_cluster_record(&scope(), "web").await.unwrap().unwrap();
        assert!(!stored.narrative_pending);

        let updated = store
            .update_activities(record.id, &["a".to_string(), "b".to_string()], None)
            .await
            .unwrap();
        assert!(updated.narrative_pending);
        assert_eq!(updated.activity_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = InMemoryGroupingStore::new();
        let err = store.mark_narrative_generated(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
