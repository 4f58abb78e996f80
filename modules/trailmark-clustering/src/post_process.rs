//! Deterministic cluster post-processing: size the entry target from the data,
//! merge small clusters toward it, then collapse same-container duplicates.
//!
//! All functions here are pure. Degenerate input (empty lists, zero targets)
//! is a no-op rather than an error.

use std::collections::HashMap;

use tracing::{debug, info};

use trailmark_common::{Activity, Cluster};

use crate::signals::declared_repository;

/// Groups with at least this many activities count as significant projects.
const SIGNIFICANT_GROUP_SIZE: usize = 3;
const MAX_SIGNIFICANT_PROJECTS: usize = 10;
const MIN_TARGET_ENTRIES: usize = 3;
const MIN_ACTIVITIES_PER_ENTRY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryTarget {
    /// 0 means the existing entries already cover every significant project.
    pub target_entries: usize,
    pub min_activities_per_entry: usize,
}

/// How many new entries this run should aim for, given how many exist already.
pub fn compute_entry_target(activities: &[Activity], existing_entry_count: usize) -> EntryTarget {
    let mut group_order: Vec<String> = Vec::new();
    let mut group_sizes: HashMap<String, usize> = HashMap::new();
    for activity in activities {
        let key = project_key(activity);
        let size = group_sizes.entry(key.clone()).or_insert(0);
        if *size == 0 {
            group_order.push(key);
        }
        *size += 1;
    }

    let significant = group_order
        .iter()
        .filter(|key| group_sizes[key.as_str()] >= SIGNIFICANT_GROUP_SIZE)
        .count()
        .min(MAX_SIGNIFICANT_PROJECTS);

    let target = if significant > existing_entry_count {
        let target_entries = (significant - existing_entry_count).max(MIN_TARGET_ENTRIES);
        EntryTarget {
            target_entries,
            min_activities_per_entry: (activities.len() / (target_entries * 3))
                .max(MIN_ACTIVITIES_PER_ENTRY),
        }
    } else {
        EntryTarget {
            target_entries: 0,
            min_activities_per_entry: MIN_ACTIVITIES_PER_ENTRY,
        }
    };

    debug!(
        groups = group_order.len(),
        significant,
        existing = existing_entry_count,
        target = target.target_entries,
        min_per_entry = target.min_activities_per_entry,
        "Computed entry target"
    );
    target
}

/// Enriched GitHub activities with a repository always carry a container, so
/// the declared repository only decides for activities that were not run
/// through enrichment. It is keyed like the container enrichment would give.
fn project_key(activity: &Activity) -> String {
    if let Some(container) = activity.container.as_deref().filter(|c| !c.is_empty()) {
        return container.to_string();
    }
    if let Some(repo) = declared_repository(activity.source, &activity.raw_data) {
        return format!("repo:{}", repo.trim());
    }
    format!("tool:{}", activity.source)
}

/// Merge the smallest clusters until at most `ceil(target * 1.2)` remain.
///
/// The smallest cluster (earliest on ties) folds into the smallest other
/// cluster sharing its dominant container, or the smallest other cluster when
/// none does. Total activity count is conserved.
pub fn merge_small_clusters(mut clusters: Vec<Cluster>, target_entries: usize) -> Vec<Cluster> {
    if target_entries == 0 {
        return clusters;
    }
    let ceiling = (target_entries * 6).div_ceil(5);
    let before = clusters.len();

    while clusters.len() > ceiling && clusters.len() > 1 {
        let Some(smallest) = smallest_index(&clusters, |_| true) else {
            break;
        };
        let container = clusters[smallest].dominant_container.clone();
        let partner = container
            .as_deref()
            .and_then(|c| {
                smallest_index(&clusters, |(i, other)| {
                    i != smallest && other.dominant_container.as_deref() == Some(c)
                })
            })
            .or_else(|| smallest_index(&clusters, |(i, _)| i != smallest));
        let Some(partner) = partner else {
            break;
        };

        let absorbed = clusters.remove(smallest);
        let partner = if partner > smallest { partner - 1 } else { partner };
        debug!(
            from = absorbed.id.as_str(),
            into = clusters[partner].id.as_str(),
            size = absorbed.len(),
            "Merging small cluster"
        );
        clusters[partner].absorb(absorbed);
    }

    if clusters.len() != before {
        info!(before, after = clusters.len(), ceiling, "Merged small clusters");
    }
    clusters
}

fn smallest_index(clusters: &[Cluster], keep: impl Fn((usize, &Cluster)) -> bool) -> Option<usize> {
    clusters
        .iter()
        .enumerate()
        .filter(|&(i, c)| keep((i, c)))
        .min_by_key(|&(i, c)| (c.len(), i))
        .map(|(i, _)| i)
}

/// Collapse clusters that share a dominant container.
///
/// Two clusters only merge when at least one of them is smaller than
/// `max_merge_size`, so deliberately split large repositories stay split.
/// Clusters without a dominant container pass through untouched.
pub fn dedup_clusters_by_container(clusters: Vec<Cluster>, max_merge_size: usize) -> Vec<Cluster> {
    let before = clusters.len();
    let mut out: Vec<Cluster> = Vec::with_capacity(clusters.len());

    for cluster in clusters {
        let Some(container) = cluster.dominant_container.clone() else {
            out.push(cluster);
            continue;
        };
        let target = out.iter().position(|kept| {
            kept.dominant_container.as_deref() == Some(container.as_str())
                && (kept.len() < max_merge_size || cluster.len() < max_merge_size)
        });
        match target {
            Some(i) => {
                debug!(
                    from = cluster.id.as_str(),
                    into = out[i].id.as_str(),
                    container = container.as_str(),
                    "Deduplicating cluster by container"
                );
                out[i].absorb(cluster);
            }
            None => out.push(cluster),
        }
    }

    if out.len() != before {
        info!(before, after = out.len(), "Deduplicated clusters by container");
    }
    out
}
