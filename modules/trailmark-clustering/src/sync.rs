//! Idempotent materialization of clusters and orphan windows into grouping
//! records.
//!
//! Every write is read-before-write: a record is looked up by its natural key
//! (display name for clusters, overlapping time range for windows) and either
//! unioned into or created. A cluster whose display name changed between runs
//! is matched to the record already holding its activities, and a window that
//! bridges several temporal records collapses them into one. Re-running with
//! the same input is a no-op.

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use trailmark_common::{
    Activity, Cluster, DateRange, GroupingRecord, NewGroupingRecord, SyncScope, TrailmarkError,
};

use crate::graph::short_repo_name;
use crate::store::{GroupingStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Writes that lost a race with a concurrent sync.
    pub skipped: usize,
    pub windows_below_threshold: usize,
    /// Temporal records folded into a neighbour by a bridging window.
    pub retired: usize,
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sync: {} created, {} updated, {} unchanged, {} skipped, {} retired, {} windows below threshold",
            self.created,
            self.updated,
            self.unchanged,
            self.skipped,
            self.retired,
            self.windows_below_threshold,
        )
    }
}

/// The name a new cluster record is stored under, and the first key sync
/// looks it up by.
pub fn display_name(cluster: &Cluster) -> String {
    if let Some(name) = cluster.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Some(container) = cluster.dominant_container.as_deref() {
        return short_repo_name(container);
    }
    format!("Cluster {}", cluster.id)
}

/// Split orphans into consecutive windows of `window` length, each anchored at
/// its first member. Input order is irrelevant; output is chronological.
pub fn temporal_windows<'a>(orphans: &[&'a Activity], window: Duration) -> Vec<Vec<&'a Activity>> {
    let mut sorted: Vec<&Activity> = orphans.to_vec();
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    let mut windows: Vec<Vec<&Activity>> = Vec::new();
    let mut anchor = None;
    for activity in sorted {
        match anchor {
            Some(start) if activity.timestamp < start + window => {
                if let Some(current) = windows.last_mut() {
                    current.push(activity);
                }
            }
            _ => {
                anchor = Some(activity.timestamp);
                windows.push(vec![activity]);
            }
        }
    }
    windows
}

enum Outcome {
    Created,
    Updated,
    Unchanged,
    /// Survivor updated, this many neighbours retired.
    Merged(usize),
}

pub struct SyncOrchestrator<'a> {
    store: &'a dyn GroupingStore,
    window: Duration,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(store: &'a dyn GroupingStore, window_days: i64) -> Self {
        Self {
            store,
            window: Duration::days(window_days.max(1)),
        }
    }

    /// Materialize `clusters` and the windows of `orphans` that reach
    /// `min_activities_per_entry`.
    pub async fn sync(
        &self,
        scope: &SyncScope,
        clusters: &[Cluster],
        orphans: &[&Activity],
        min_activities_per_entry: usize,
    ) -> Result<SyncReport, TrailmarkError> {
        let mut report = SyncReport::default();

        for cluster in clusters.iter().filter(|c| !c.is_empty()) {
            let name = display_name(cluster);
            let result = self.sync_cluster(scope, &name, &cluster.activity_ids).await;
            self.tally(&mut report, result, &name)?;
        }

        for window in temporal_windows(orphans, self.window) {
            if window.len() < min_activities_per_entry {
                report.windows_below_threshold += 1;
                continue;
            }
            let result = self.sync_window(scope, &window).await;
            self.tally(&mut report, result, "temporal window")?;
        }

        info!(
            author = scope.author.as_str(),
            mode = scope.mode.as_str(),
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "Sync complete"
        );
        Ok(report)
    }

    fn tally(
        &self,
        report: &mut SyncReport,
        result: Result<Outcome, StoreError>,
        key: &str,
    ) -> Result<(), TrailmarkError> {
        match result {
            Ok(Outcome::Created) => report.created += 1,
            Ok(Outcome::Updated) => report.updated += 1,
            Ok(Outcome::Unchanged) => report.unchanged += 1,
            Ok(Outcome::Merged(retired)) => {
                report.updated += 1;
                report.retired += retired;
            }
            Err(e @ (StoreError::Duplicate(_) | StoreError::NotFound(_))) => {
                warn!(key, error = %e, "Concurrent sync won the write, skipping");
                report.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn sync_cluster(
        &self,
        scope: &SyncScope,
        cluster_ref: &str,
        activity_ids: &[String],
    ) -> Result<Outcome, StoreError> {
        let existing = match self.store.find_cluster_record(scope, cluster_ref).await? {
            Some(record) => Some(record),
            // Names come back from the LLM slightly different each run, so
            // fall back to the record that already holds these activities.
            None => {
                self.store
                    .find_cluster_record_sharing(scope, activity_ids)
                    .await?
            }
        };
        match existing {
            Some(existing) => {
                if existing.cluster_ref.as_deref() != Some(cluster_ref) {
                    debug!(
                        id = %existing.id,
                        stored = existing.cluster_ref.as_deref().unwrap_or_default(),
                        cluster_ref,
                        "Matched cluster to record by membership"
                    );
                }
                self.union_into(existing, activity_ids, None).await
            }
            None => {
                let record = self
                    .store
                    .create(NewGroupingRecord::cluster(scope, cluster_ref, activity_ids.to_vec()))
                    .await?;
                debug!(id = %record.id, cluster_ref, members = activity_ids.len(), "Created cluster record");
                Ok(Outcome::Created)
            }
        }
    }

    async fn sync_window(&self, scope: &SyncScope, window: &[&Activity]) -> Result<Outcome, StoreError> {
        let Some(range) = window_range(window) else {
            return Ok(Outcome::Unchanged);
        };
        let ids: Vec<String> = window.iter().map(|a| a.id.clone()).collect();

        let overlapping = self.store.find_overlapping_time_records(scope, &range).await?;
        match overlapping.split_first() {
            None => {
                let record = self
                    .store
                    .create(NewGroupingRecord::temporal(scope, range, ids))
                    .await?;
                debug!(id = %record.id, members = window.len(), "Created temporal record");
                Ok(Outcome::Created)
            }
            Some((existing, [])) => {
                let merged = record_range(existing).map_or(range, |r| r.union(&range));
                self.union_into(existing.clone(), &ids, Some(merged)).await
            }
            Some((survivor, retired)) => {
                let mut merged_range = range;
                for record in std::iter::once(survivor).chain(retired) {
                    if let Some(r) = record_range(record) {
                        merged_range = merged_range.union(&r);
                    }
                }
                let mut merged_ids = survivor.activity_ids.clone();
                for id in retired.iter().flat_map(|r| &r.activity_ids).chain(&ids) {
                    if !merged_ids.contains(id) {
                        merged_ids.push(id.clone());
                    }
                }

                let retired_ids: Vec<Uuid> = retired.iter().map(|r| r.id).collect();
                self.store
                    .merge_time_records(survivor.id, &retired_ids, &merged_ids, merged_range)
                    .await?;
                info!(
                    id = %survivor.id,
                    retired = retired_ids.len(),
                    members = merged_ids.len(),
                    "Window bridged temporal records, merged them"
                );
                Ok(Outcome::Merged(retired_ids.len()))
            }
        }
    }

    async fn union_into(
        &self,
        existing: GroupingRecord,
        incoming: &[String],
        time_range: Option<DateRange>,
    ) -> Result<Outcome, StoreError> {
        let Some(merged) = union_ids(&existing.activity_ids, incoming) else {
            return Ok(Outcome::Unchanged);
        };
        let id: Uuid = existing.id;
        self.store.update_activities(id, &merged, time_range).await?;
        debug!(
            %id,
            before = existing.activity_ids.len(),
            after = merged.len(),
            "Unioned activities into record"
        );
        Ok(Outcome::Updated)
    }
}

/// Existing ids followed by any new ones, or `None` when nothing is new.
fn union_ids(existing: &[String], incoming: &[String]) -> Option<Vec<String>> {
    let mut merged = existing.to_vec();
    for id in incoming {
        if !merged.contains(id) {
            merged.push(id.clone());
        }
    }
    (merged.len() > existing.len()).then_some(merged)
}

fn record_range(record: &GroupingRecord) -> Option<DateRange> {
    Some(DateRange {
        start: record.time_range_start?,
        end: record.time_range_end?,
    })
}

fn window_range(window: &[&Activity]) -> Option<DateRange> {
    let (first, rest) = window.split_first()?;
    let mut range = DateRange::at(first.timestamp);
    for activity in rest {
        range.include(activity.timestamp);
    }
    Some(range)
}
