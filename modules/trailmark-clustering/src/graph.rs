//! Graph clustering over enriched activities.
//!
//! Every activity is a node. Two activities are linked when they share a
//! cross-tool ref, share a non-null container, or share a collaborator while
//! also being close in time. Connected components of at least
//! `min_cluster_size` members become clusters; everything else is an orphan.
//!
//! Pure and deterministic: the same input order always produces the same
//! clusters, ids and member order.

use std::collections::HashMap;

use chrono::Duration;
use tracing::info;

use trailmark_common::{Activity, Cluster};

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub min_cluster_size: usize,
    /// Collaborator overlap only links activities at most this far apart.
    /// `None` turns collaborator links off.
    pub collaborator_window: Option<Duration>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            collaborator_window: Some(Duration::hours(48)),
        }
    }
}

/// Number of unions each signal performed (links that joined two sets).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub ref_links: usize,
    pub container_links: usize,
    pub collaborator_links: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    pub clusters: Vec<Cluster>,
    /// Ids of activities outside every cluster, in input order.
    pub orphans: Vec<String>,
    pub links: LinkStats,
}

pub struct GraphClusterer {
    options: ClusterOptions,
}

impl GraphClusterer {
    pub fn new(options: ClusterOptions) -> Self {
        Self { options }
    }

    pub fn cluster(&self, activities: &[Activity]) -> ClusterOutcome {
        let mut sets = DisjointSet::new(activities.len());
        let mut links = LinkStats::default();

        let mut by_ref: HashMap<&str, usize> = HashMap::new();
        let mut by_container: HashMap<&str, usize> = HashMap::new();
        let mut by_collaborator: HashMap<&str, Vec<usize>> = HashMap::new();

        for (idx, activity) in activities.iter().enumerate() {
            for r in &activity.cross_tool_refs {
                match by_ref.get(r.as_str()) {
                    Some(&first) => {
                        if sets.union(first, idx) {
                            links.ref_links += 1;
                        }
                    }
                    None => {
                        by_ref.insert(r.as_str(), idx);
                    }
                }
            }
            if let Some(container) = activity.container.as_deref() {
                match by_container.get(container) {
                    Some(&first) => {
                        if sets.union(first, idx) {
                            links.container_links += 1;
                        }
                    }
                    None => {
                        by_container.insert(container, idx);
                    }
                }
            }
            for person in &activity.collaborators {
                by_collaborator.entry(person.as_str()).or_default().push(idx);
            }
        }

        if let Some(window) = self.options.collaborator_window {
            // Sorted by time, linking neighbours within the window connects
            // exactly the pairs that are within the window of each other.
            let mut people: Vec<&str> = by_collaborator.keys().copied().collect();
            people.sort_unstable();
            for person in people {
                let mut members = by_collaborator[person].clone();
                members.sort_by_key(|&i| (activities[i].timestamp, i));
                for pair in members.windows(2) {
                    let gap = activities[pair[1]].timestamp - activities[pair[0]].timestamp;
                    if gap <= window && sets.union(pair[0], pair[1]) {
                        links.collaborator_links += 1;
                    }
                }
            }
        }

        // Components keyed by root, ordered by their first member.
        let mut order: Vec<usize> = Vec::new();
        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for idx in 0..activities.len() {
            let root = sets.find(idx);
            let members = components.entry(root).or_insert_with(|| {
                order.push(root);
                Vec::new()
            });
            members.push(idx);
        }

        let min_size = self.options.min_cluster_size.max(1);
        let mut outcome = ClusterOutcome {
            links,
            ..Default::default()
        };
        for root in order {
            let members = &components[&root];
            if members.len() < min_size {
                outcome
                    .orphans
                    .extend(members.iter().map(|&i| activities[i].id.clone()));
                continue;
            }
            let refs: Vec<&Activity> = members.iter().map(|&i| &activities[i]).collect();
            let id = format!("cluster_{}", outcome.clusters.len() + 1);
            let mut cluster = Cluster::from_members(id, &refs);
            cluster.name = initial_name(&cluster, &refs);
            outcome.clusters.push(cluster);
        }

        info!(
            activities = activities.len(),
            clusters = outcome.clusters.len(),
            orphans = outcome.orphans.len(),
            ref_links = outcome.links.ref_links,
            container_links = outcome.links.container_links,
            collaborator_links = outcome.links.collaborator_links,
            "Graph clustering complete"
        );
        outcome
    }
}

/// Display form of a container: `repo:org/name` becomes `name`.
pub fn short_repo_name(container: &str) -> String {
    match container.strip_prefix("repo:") {
        Some(repo) => repo
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(repo)
            .to_string(),
        None => container.to_string(),
    }
}

/// Machine-ish placeholder name; the namer replaces it later.
fn initial_name(cluster: &Cluster, members: &[&Activity]) -> Option<String> {
    if let Some(container) = &cluster.dominant_container {
        return Some(short_repo_name(container));
    }
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for r in members.iter().flat_map(|a| a.cross_tool_refs.iter()) {
        match counts.iter_mut().find(|(seen, _)| *seen == r.as_str()) {
            Some((_, n)) => *n += 1,
            None => counts.push((r.as_str(), 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (r, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((r, n));
        }
    }
    best.map(|(r, _)| r.to_string())
}

/// Union-find whose root is always the smallest index in the set.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Returns true if two distinct sets were joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[merge] = keep;
        true
    }
}
