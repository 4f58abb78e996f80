use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Activities ---

/// The work tool an activity was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Github,
    Jira,
    Slack,
    Confluence,
    Figma,
    #[serde(other)]
    Other,
}

impl ToolSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolSource::Github => "github",
            ToolSource::Jira => "jira",
            ToolSource::Slack => "slack",
            ToolSource::Confluence => "confluence",
            ToolSource::Figma => "figma",
            ToolSource::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "github" => ToolSource::Github,
            "jira" => ToolSource::Jira,
            "slack" => ToolSource::Slack,
            "confluence" => ToolSource::Confluence,
            "figma" => ToolSource::Figma,
            _ => ToolSource::Other,
        }
    }
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingested event from an external work tool.
///
/// `cross_tool_refs`, `container` and `collaborators` are enrichment fields,
/// recomputed on every run. The rest is identity and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub source: ToolSource,
    pub source_id: String,
    #[serde(default)]
    pub source_url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub raw_data: serde_json::Value,
    #[serde(default)]
    pub cross_tool_refs: Vec<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub collaborators: Vec<String>,
}

impl Activity {
    pub fn new(
        id: impl Into<String>,
        source: ToolSource,
        title: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            source_id: id.clone(),
            id,
            source,
            source_url: None,
            title: title.into(),
            description: None,
            timestamp,
            raw_data: serde_json::Value::Null,
            cross_tool_refs: Vec::new(),
            container: None,
            collaborators: Vec::new(),
        }
    }
}

// --- Clusters ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self { start: ts, end: ts }
    }

    pub fn include(&mut self, ts: DateTime<Utc>) {
        if ts < self.start {
            self.start = ts;
        }
        if ts > self.end {
            self.end = ts;
        }
    }

    pub fn union(&self, other: &DateRange) -> DateRange {
        DateRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Aggregates recomputed whenever cluster membership changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetrics {
    pub date_range: Option<DateRange>,
    pub tool_types: Vec<ToolSource>,
    /// Member count per non-null container, in first-seen order.
    pub container_counts: Vec<(String, usize)>,
}

impl ClusterMetrics {
    pub fn from_activities<'a>(activities: impl IntoIterator<Item = &'a Activity>) -> Self {
        let mut metrics = Self::default();
        for activity in activities {
            metrics.add(activity);
        }
        metrics
    }

    pub fn add(&mut self, activity: &Activity) {
        match self.date_range.as_mut() {
            Some(range) => range.include(activity.timestamp),
            None => self.date_range = Some(DateRange::at(activity.timestamp)),
        }
        if !self.tool_types.contains(&activity.source) {
            self.tool_types.push(activity.source);
        }
        if let Some(container) = &activity.container {
            self.bump_container(container, 1);
        }
    }

    /// Fold another cluster's metrics into this one. `self` keeps first-seen
    /// precedence for tool types and containers.
    pub fn absorb(&mut self, other: &ClusterMetrics) {
        self.date_range = match (self.date_range, other.date_range) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        };
        for tool in &other.tool_types {
            if !self.tool_types.contains(tool) {
                self.tool_types.push(*tool);
            }
        }
        for (container, count) in &other.container_counts {
            self.bump_container(container, *count);
        }
    }

    /// Most frequent container; the first-seen one wins ties.
    pub fn dominant_container(&self) -> Option<String> {
        let mut best: Option<&(String, usize)> = None;
        for entry in &self.container_counts {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(c, _)| c.clone())
    }

    fn bump_container(&mut self, container: &str, by: usize) {
        match self.container_counts.iter_mut().find(|(c, _)| c == container) {
            Some((_, count)) => *count += by,
            None => self.container_counts.push((container.to_string(), by)),
        }
    }
}

/// A connected set of activities believed to represent one project.
/// Ephemeral: produced fresh each run and discarded after sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: Option<String>,
    pub dominant_container: Option<String>,
    pub activity_ids: Vec<String>,
    pub metrics: ClusterMetrics,
}

impl Cluster {
    pub fn from_members(id: impl Into<String>, members: &[&Activity]) -> Self {
        let metrics = ClusterMetrics::from_activities(members.iter().copied());
        let mut seen = HashSet::new();
        let activity_ids = members
            .iter()
            .filter(|a| seen.insert(a.id.as_str()))
            .map(|a| a.id.clone())
            .collect();
        Self {
            id: id.into(),
            name: None,
            dominant_container: metrics.dominant_container(),
            activity_ids,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.activity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activity_ids.is_empty()
    }

    pub fn contains(&self, activity_id: &str) -> bool {
        self.activity_ids.iter().any(|id| id == activity_id)
    }

    /// Union `other` into `self`: ids appended without duplicates, metrics
    /// recomputed from the union, the longer name kept.
    pub fn absorb(&mut self, other: Cluster) {
        let existing: HashSet<String> = self.activity_ids.iter().cloned().collect();
        self.activity_ids.extend(
            other
                .activity_ids
                .into_iter()
                .filter(|id| !existing.contains(id)),
        );
        self.metrics.absorb(&other.metrics);
        self.dominant_container = self.metrics.dominant_container();

        let own_len = self.name.as_deref().map_or(0, |n| n.chars().count());
        let other_len = other.name.as_deref().map_or(0, |n| n.chars().count());
        if other_len > own_len {
            self.name = other.name;
        }
    }
}

// --- Grouping records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMethod {
    Time,
    Cluster,
    Manual,
}

impl GroupingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingMethod::Time => "time",
            GroupingMethod::Cluster => "cluster",
            GroupingMethod::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "time" => Some(GroupingMethod::Time),
            "cluster" => Some(GroupingMethod::Cluster),
            "manual" => Some(GroupingMethod::Manual),
            _ => None,
        }
    }
}

/// Per-user sync partition. Nothing is shared across scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncScope {
    pub author: String,
    pub mode: String,
}

impl SyncScope {
    pub fn new(author: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            mode: mode.into(),
        }
    }
}

/// The persisted unit materialized from a cluster or a temporal window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingRecord {
    pub id: Uuid,
    pub author: String,
    pub mode: String,
    pub grouping_method: GroupingMethod,
    pub activity_ids: Vec<String>,
    pub cluster_ref: Option<String>,
    pub time_range_start: Option<DateTime<Utc>>,
    pub time_range_end: Option<DateTime<Utc>>,
    pub narrative_pending: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a grouping record. Records are always created with a
/// pending narrative.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroupingRecord {
    pub scope: SyncScope,
    pub grouping_method: GroupingMethod,
    pub activity_ids: Vec<String>,
    pub cluster_ref: Option<String>,
    pub time_range: Option<DateRange>,
}

impl NewGroupingRecord {
    pub fn cluster(scope: &SyncScope, cluster_ref: &str, activity_ids: Vec<String>) -> Self {
        Self {
            scope: scope.clone(),
            grouping_method: GroupingMethod::Cluster,
            activity_ids,
            cluster_ref: Some(cluster_ref.to_string()),
            time_range: None,
        }
    }

    pub fn temporal(scope: &SyncScope, range: DateRange, activity_ids: Vec<String>) -> Self {
        Self {
            scope: scope.clone(),
            grouping_method: GroupingMethod::Time,
            activity_ids,
            cluster_ref: None,
            time_range: Some(range),
        }
    }
}
