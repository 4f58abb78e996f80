//! LLM-assisted second pass for activities the graph could not place.
//!
//! The model sees a snapshot of the current clusters plus a batch of
//! candidates and answers, per candidate, one of:
//!
//! - `KEEP:<cluster_id>`: stay in the current cluster (only legal when the
//!   candidate already belongs to that cluster)
//! - `MOVE:<cluster_id>`: join an existing cluster other than the current one
//! - `NEW:<name>`: start a fresh cluster; candidates sharing a name in one
//!   response end up together
//!
//! A response is validated as a whole and either applied completely or not at
//! all. Batches run sequentially so clusters created by one batch show up in
//! the next batch's snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use ai_client::{strip_code_blocks, truncate_to_char_boundary, Message};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use trailmark_common::{Activity, Cluster};

use crate::llm::{run_with_timeout, QualityTier, TaskExecutor, TaskOptions, TaskType};

static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(KEEP|MOVE|NEW):(.*)$").unwrap());

const SNAPSHOT_SAMPLE_TITLES: usize = 5;
const DESCRIPTION_PREVIEW_BYTES: usize = 300;

/// An activity up for (re)assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementCandidate {
    pub activity_id: String,
    pub current_cluster_id: Option<String>,
}

impl RefinementCandidate {
    pub fn unclustered(activity_id: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            current_cluster_id: None,
        }
    }

    pub fn in_cluster(activity_id: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            current_cluster_id: Some(cluster_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Keep(String),
    Move(String),
    New(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    /// Present only when the whole response is valid.
    pub parsed: Option<BTreeMap<String, Assignment>>,
}

impl AssignmentValidation {
    fn rejected(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            parsed: None,
        }
    }
}

/// Check a raw model response against the assignment contract, collecting
/// every violation in one pass.
pub fn validate_cluster_assignment(
    raw: &str,
    candidates: &[RefinementCandidate],
    existing_cluster_ids: &HashSet<String>,
) -> AssignmentValidation {
    let value: Value = match serde_json::from_str(strip_code_blocks(raw)) {
        Ok(v) => v,
        Err(e) => return AssignmentValidation::rejected(vec![format!("response is not valid JSON: {e}")]),
    };
    let Value::Object(map) = value else {
        let kind = match value {
            Value::Array(_) => "an array",
            Value::String(_) => "a string",
            Value::Number(_) => "a number",
            Value::Bool(_) => "a boolean",
            _ => "null",
        };
        return AssignmentValidation::rejected(vec![format!(
            "response must be a JSON object keyed by activity id, got {kind}"
        )]);
    };

    let mut errors = Vec::new();
    let candidate_ids: HashSet<&str> = candidates.iter().map(|c| c.activity_id.as_str()).collect();
    let mut parsed = BTreeMap::new();

    for candidate in candidates {
        let id = candidate.activity_id.as_str();
        let Some(raw_action) = map.get(id) else {
            errors.push(format!("missing assignment for activity {id}"));
            continue;
        };
        let Some(action) = raw_action.as_str() else {
            errors.push(format!("assignment for activity {id} must be a string"));
            continue;
        };
        match parse_action(action) {
            Ok(assignment) => match check_assignment(&assignment, candidate, existing_cluster_ids) {
                Ok(()) => {
                    parsed.insert(id.to_string(), assignment);
                }
                Err(e) => errors.push(e),
            },
            Err(e) => errors.push(format!("activity {id}: {e}")),
        }
    }

    for key in map.keys() {
        if !candidate_ids.contains(key.as_str()) {
            errors.push(format!("unexpected activity id {key}"));
        }
    }

    if errors.is_empty() {
        AssignmentValidation {
            valid: true,
            errors,
            parsed: Some(parsed),
        }
    } else {
        AssignmentValidation::rejected(errors)
    }
}

fn parse_action(action: &str) -> Result<Assignment, String> {
    let Some(caps) = ACTION_RE.captures(action.trim()) else {
        return Err(format!("'{action}' does not match ACTION:target (KEEP|MOVE|NEW)"));
    };
    let target = caps[2].trim();
    if target.is_empty() {
        return Err(format!("'{action}' has an empty target"));
    }
    Ok(match &caps[1] {
        "KEEP" => Assignment::Keep(target.to_string()),
        "MOVE" => Assignment::Move(target.to_string()),
        _ => Assignment::New(target.to_string()),
    })
}

fn check_assignment(
    assignment: &Assignment,
    candidate: &RefinementCandidate,
    existing: &HashSet<String>,
) -> Result<(), String> {
    let id = &candidate.activity_id;
    let current = candidate.current_cluster_id.as_deref();
    match assignment {
        Assignment::Keep(target) => {
            let Some(current) = current else {
                return Err(format!("KEEP:{target} for activity {id} is illegal: it has no current cluster"));
            };
            if current != target {
                return Err(format!(
                    "KEEP:{target} for activity {id} does not match its current cluster {current}"
                ));
            }
            if !existing.contains(target) {
                return Err(format!("KEEP:{target} for activity {id} names an unknown cluster"));
            }
        }
        Assignment::Move(target) => {
            if !existing.contains(target) {
                return Err(format!("MOVE:{target} for activity {id} names an unknown cluster"));
            }
            if current == Some(target.as_str()) {
                return Err(format!("MOVE:{target} for activity {id} is its current cluster"));
            }
        }
        // Blank names are already rejected by `parse_action`.
        Assignment::New(_) => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefinementReport {
    pub batches: usize,
    pub batches_applied: usize,
    pub batches_failed: usize,
    pub kept: usize,
    pub moved: usize,
    pub assigned_to_new: usize,
    pub clusters_created: usize,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RefinementResult {
    pub clusters: Vec<Cluster>,
    /// Candidates still without a cluster, in candidate order.
    pub unclustered: Vec<String>,
    pub report: RefinementReport,
}

pub struct ClusterRefinementAssigner<'a> {
    executor: &'a dyn TaskExecutor,
    batch_size: usize,
    timeout: Duration,
}

impl<'a> ClusterRefinementAssigner<'a> {
    pub fn new(executor: &'a dyn TaskExecutor, batch_size: usize, timeout: Duration) -> Self {
        Self {
            executor,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Run every candidate through the model in sequential batches.
    ///
    /// Candidates whose batch fails keep whatever cluster they had.
    pub async fn refine(
        &self,
        clusters: Vec<Cluster>,
        activities: &[Activity],
        candidates: Vec<RefinementCandidate>,
    ) -> RefinementResult {
        let index: HashMap<&str, &Activity> = activities.iter().map(|a| (a.id.as_str(), a)).collect();
        let candidates: Vec<RefinementCandidate> = candidates
            .into_iter()
            .filter(|c| index.contains_key(c.activity_id.as_str()))
            .collect();

        let mut state = Assignments::new(clusters);
        let mut report = RefinementReport::default();

        for (n, batch) in candidates.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            // Current cluster comes from live state so earlier batches' moves are respected.
            let batch: Vec<RefinementCandidate> = batch
                .iter()
                .map(|c| RefinementCandidate {
                    activity_id: c.activity_id.clone(),
                    current_cluster_id: state.cluster_of(&c.activity_id).map(str::to_string),
                })
                .collect();

            let messages = build_messages(&state.clusters, &batch, &index);
            let options = TaskOptions {
                max_tokens: 2048,
                temperature: 0.0,
            };
            let output = run_with_timeout(
                TaskType::ClusterRefinement.as_str(),
                self.timeout,
                self.executor.execute_task(
                    TaskType::ClusterRefinement,
                    messages,
                    QualityTier::Balanced,
                    options,
                ),
            )
            .await;

            let Some(output) = output else {
                report.batches_failed += 1;
                continue;
            };
            report.estimated_cost += output.estimated_cost;

            let existing = state.cluster_ids();
            let validation = validate_cluster_assignment(&output.content, &batch, &existing);
            let Some(parsed) = validation.parsed.filter(|_| validation.valid) else {
                warn!(
                    batch = n + 1,
                    errors = ?validation.errors,
                    "Rejected refinement response, batch left unchanged"
                );
                report.batches_failed += 1;
                continue;
            };

            state.apply(&batch, &parsed, &index, &mut report);
            report.batches_applied += 1;
            debug!(batch = n + 1, size = batch.len(), "Applied refinement batch");
        }

        let unclustered = candidates
            .iter()
            .filter(|c| state.cluster_of(&c.activity_id).is_none())
            .map(|c| c.activity_id.clone())
            .collect();

        info!(
            batches = report.batches,
            applied = report.batches_applied,
            failed = report.batches_failed,
            moved = report.moved,
            created = report.clusters_created,
            "Refinement complete"
        );

        RefinementResult {
            clusters: state.clusters,
            unclustered,
            report,
        }
    }
}

/// Live cluster state across batches.
struct Assignments {
    clusters: Vec<Cluster>,
    next_new: usize,
}

impl Assignments {
    fn new(clusters: Vec<Cluster>) -> Self {
        Self {
            clusters,
            next_new: 1,
        }
    }

    fn cluster_ids(&self) -> HashSet<String> {
        self.clusters.iter().map(|c| c.id.clone()).collect()
    }

    fn cluster_of(&self, activity_id: &str) -> Option<&str> {
        self.clusters
            .iter()
            .find(|c| c.contains(activity_id))
            .map(|c| c.id.as_str())
    }

    fn fresh_id(&mut self) -> String {
        loop {
            let id = format!("refined_{}", self.next_new);
            self.next_new += 1;
            if !self.clusters.iter().any(|c| c.id == id) {
                return id;
            }
        }
    }

    fn apply(
        &mut self,
        batch: &[RefinementCandidate],
        parsed: &BTreeMap<String, Assignment>,
        index: &HashMap<&str, &Activity>,
        report: &mut RefinementReport,
    ) {
        let mut touched: HashSet<String> = HashSet::new();
        let mut new_by_name: HashMap<String, String> = HashMap::new();

        for candidate in batch {
            let Some(assignment) = parsed.get(&candidate.activity_id) else {
                continue;
            };
            let target = match assignment {
                Assignment::Keep(_) => {
                    report.kept += 1;
                    continue;
                }
                Assignment::Move(target) => {
                    report.moved += 1;
                    target.clone()
                }
                Assignment::New(name) => {
                    report.assigned_to_new += 1;
                    let key = name.trim().to_lowercase();
                    match new_by_name.get(&key) {
                        Some(id) => id.clone(),
                        None => {
                            let id = self.fresh_id();
                            self.clusters.push(Cluster {
                                id: id.clone(),
                                name: Some(name.trim().to_string()),
                                dominant_container: None,
                                activity_ids: Vec::new(),
                                metrics: Default::default(),
                            });
                            report.clusters_created += 1;
                            new_by_name.insert(key, id.clone());
                            id
                        }
                    }
                }
            };

            if let Some(current) = &candidate.current_cluster_id {
                if let Some(cluster) = self.clusters.iter_mut().find(|c| &c.id == current) {
                    cluster.activity_ids.retain(|a| a != &candidate.activity_id);
                    touched.insert(current.clone());
                }
            }
            if let Some(cluster) = self.clusters.iter_mut().find(|c| c.id == target) {
                if !cluster.contains(&candidate.activity_id) {
                    cluster.activity_ids.push(candidate.activity_id.clone());
                }
                touched.insert(target);
            }
        }

        for cluster in self.clusters.iter_mut().filter(|c| touched.contains(&c.id)) {
            let members: Vec<&Activity> = cluster
                .activity_ids
                .iter()
                .filter_map(|id| index.get(id.as_str()).copied())
                .collect();
            let mut rebuilt = Cluster::from_members(cluster.id.clone(), &members);
            rebuilt.name = cluster.name.take();
            *cluster = rebuilt;
        }
        self.clusters.retain(|c| !c.is_empty());
    }
}

const SYSTEM_PROMPT: &str = "You group work activities (commits, pull requests, tickets, chat threads, documents) \
into projects. For every candidate activity answer with exactly one action:\n\
- \"KEEP:<cluster_id>\" only if the candidate's current cluster is that cluster\n\
- \"MOVE:<cluster_id>\" to place it in a different existing cluster\n\
- \"NEW:<short project name>\" to start a new project; give candidates that belong together the same name\n\
Respond with a single JSON object mapping every candidate id to its action and nothing else.";

fn build_messages(
    clusters: &[Cluster],
    batch: &[RefinementCandidate],
    index: &HashMap<&str, &Activity>,
) -> Vec<Message> {
    let mut snapshot = String::new();
    if clusters.is_empty() {
        snapshot.push_str("(no clusters yet)\n");
    }
    for cluster in clusters {
        let titles: Vec<&str> = cluster
            .activity_ids
            .iter()
            .filter_map(|id| index.get(id.as_str()))
            .take(SNAPSHOT_SAMPLE_TITLES)
            .map(|a| a.title.as_str())
            .collect();
        snapshot.push_str(&format!(
            "- id: {} | name: {} | container: {} | size: {}\n  samples: {}\n",
            cluster.id,
            cluster.name.as_deref().unwrap_or("(unnamed)"),
            cluster.dominant_container.as_deref().unwrap_or("-"),
            cluster.len(),
            titles.join(" / "),
        ));
    }

    let mut listing = String::new();
    for candidate in batch {
        let Some(activity) = index.get(candidate.activity_id.as_str()) else {
            continue;
        };
        let description = activity
            .description
            .as_deref()
            .map(|d| truncate_to_char_boundary(d, DESCRIPTION_PREVIEW_BYTES))
            .unwrap_or("");
        listing.push_str(&format!(
            "- id: {} | tool: {} | current cluster: {}\n  title: {}\n  description: {}\n  refs: {}\n",
            activity.id,
            activity.source,
            candidate.current_cluster_id.as_deref().unwrap_or("none"),
            activity.title,
            description,
            if activity.cross_tool_refs.is_empty() {
                "-".to_string()
            } else {
                activity.cross_tool_refs.join(", ")
            },
        ));
    }

    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!(
            "Current clusters:\n{snapshot}\nCandidates:\n{listing}\nReturn the JSON object now."
        )),
    ]
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use trailmark_common::ToolSource;

    use super::*;
    use crate::testutil::{Scripted, ScriptedExecutor};

    fn existing(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn activity(id: &str, hour: i64) -> Activity {
        let base = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        Activity::new(id, ToolSource::Slack, format!("thread {id}"), base + ChronoDuration::hours(hour))
    }

    #[test]
    fn accepts_a_complete_valid_response() {
        let candidates = vec![
            RefinementCandidate::unclustered("a"),
            RefinementCandidate::in_cluster("b", "c1"),
            RefinementCandidate::in_cluster("c", "c1"),
        ];
        let raw = r#"{"a": "NEW: Billing", "b": "KEEP:c1", "c": "MOVE:c2"}"#;
        let result = validate_cluster_assignment(raw, &candidates, &existing(&["c1", "c2"]));
        assert!(result.valid, "{:?}", result.errors);
        let parsed = result.parsed.unwrap();
        assert_eq!(parsed["a"], Assignment::New("Billing".into()));
        assert_eq!(parsed["b"], Assignment::Keep("c1".into()));
        assert_eq!(parsed["c"], Assignment::Move("c2".into()));
    }

    #[test]
    fn strips_code_fences_before_parsing() {
        let candidates = vec![RefinementCandidate::unclustered("a")];
        let raw = "```json\n{\"a\": \"MOVE:c1\"}\n```";
        assert!(validate_cluster_assignment(raw, &candidates, &existing(&["c1"])).valid);
    }

    #[test]
    fn rejects_non_objects() {
        let candidates = vec![RefinementCandidate::unclustered("a")];
        for raw in ["[\"MOVE:c1\"]", "\"MOVE:c1\"", "42", "not json"] {
            let result = validate_cluster_assignment(raw, &candidates, &existing(&["c1"]));
            assert!(!result.valid);
            assert!(result.parsed.is_none());
            assert_eq!(result.errors.len(), 1, "{raw}");
        }
    }

    #[test]
    fn missing_id_is_named() {
        let candidates = vec![
            RefinementCandidate::unclustered("a"),
            RefinementCandidate::unclustered("b"),
        ];
        let raw = r#"{"a": "MOVE:c1"}"#;
        let result = validate_cluster_assignment(raw, &candidates, &existing(&["c1"]));
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("missing") && result.errors[0].contains('b'));
    }

    #[test]
    fn extra_id_is_rejected() {
        let candidates = vec![RefinementCandidate::unclustered("a")];
        let raw = r#"{"a": "MOVE:c1", "zzz": "NEW:Other"}"#;
        let result = validate_cluster_assignment(raw, &candidates, &existing(&["c1"]));
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["unexpected activity id zzz".to_string()]);
    }

    #[test]
    fn keep_requires_current_cluster() {
        let candidates = vec![RefinementCandidate::unclustered("a")];
        let raw = r#"{"a": "KEEP:c1"}"#;
        let result = validate_cluster_assignment(raw, &candidates, &existing(&["c1"]));
        assert!(!result.valid);
        assert!(result.errors[0].contains("no current cluster"));
    }

    #[test]
    fn keep_must_name_the_current_cluster() {
        let candidates = vec![RefinementCandidate::in_cluster("a", "c1")];
        let raw = r#"{"a": "KEEP:c2"}"#;
        assert!(!validate_cluster_assignment(raw, &candidates, &existing(&["c1", "c2"])).valid);
    }

    #[test]
    fn move_to_current_cluster_is_rejected() {
        let candidates = vec![RefinementCandidate::in_cluster("a", "c1")];
        let raw = r#"{"a": "MOVE:c1"}"#;
        let result = validate_cluster_assignment(raw, &candidates, &existing(&["c1"]));
        assert!(!result.valid);
        assert!(result.errors[0].contains("current cluster"));
    }

    #[test]
    fn all_violations_collected_in_one_pass() {
        let candidates = vec![
            RefinementCandidate::unclustered("a"),
            RefinementCandidate::unclustered("b"),
            RefinementCandidate::unclustered("c"),
            RefinementCandidate::unclustered("d"),
        ];
        let raw = r#"{"a": "MOVE:ghost", "b": "NEW:   ", "c": "JOIN:c1", "x": "NEW:X"}"#;
        let result = validate_cluster_assignment(raw, &candidates, &existing(&["c1"]));
        assert!(!result.valid);
        // ghost target, blank name, bad grammar, missing d, extra x
        assert_eq!(result.errors.len(), 5, "{:?}", result.errors);
    }

    #[test]
    fn non_string_value_is_rejected() {
        let candidates = vec![RefinementCandidate::unclustered("a")];
        let raw = r#"{"a": {"action": "NEW"}}"#;
        assert!(!validate_cluster_assignment(raw, &candidates, &existing(&[])).valid);
    }

    fn oauth_cluster(activities: &[Activity]) -> Cluster {
        let members: Vec<&Activity> = activities.iter().filter(|a| a.id.starts_with("oauth")).collect();
        let mut cluster = Cluster::from_members("cluster_oauth", &members);
        cluster.name = Some("OAuth rollout".into());
        cluster
    }

    #[tokio::test]
    async fn new_and_move_produce_two_disjoint_groups() {
        let mut activities: Vec<Activity> = (0..2).map(|i| activity(&format!("oauth{i}"), i)).collect();
        activities.extend((0..6).map(|i| activity(&format!("x{i}"), 10 + i)));
        let clusters = vec![oauth_cluster(&activities)];
        let candidates = (0..6).map(|i| RefinementCandidate::unclustered(format!("x{i}"))).collect();

        let executor = ScriptedExecutor::new();
        executor.push(
            TaskType::ClusterRefinement,
            Scripted::Reply(
                r#"{"x0": "NEW:Billing revamp", "x1": "NEW:billing revamp ", "x2": "NEW:Billing revamp",
                    "x3": "NEW:Billing revamp", "x4": "NEW:Billing revamp", "x5": "MOVE:cluster_oauth"}"#
                    .into(),
            ),
        );

        let assigner = ClusterRefinementAssigner::new(&executor, 20, Duration::from_secs(5));
        let result = assigner.refine(clusters, &activities, candidates).await;

        assert_eq!(result.clusters.len(), 2);
        let oauth = &result.clusters[0];
        assert_eq!(oauth.id, "cluster_oauth");
        assert_eq!(oauth.activity_ids, vec!["oauth0", "oauth1", "x5"]);
        let billing = &result.clusters[1];
        assert_eq!(billing.name.as_deref(), Some("Billing revamp"));
        assert_eq!(billing.activity_ids, vec!["x0", "x1", "x2", "x3", "x4"]);
        assert!(result.unclustered.is_empty());
        assert_eq!(result.report.clusters_created, 1);
        assert_eq!(result.report.moved, 1);
    }

    #[tokio::test]
    async fn later_batches_see_clusters_created_earlier() {
        let activities: Vec<Activity> = (0..4).map(|i| activity(&format!("x{i}"), i)).collect();
        let candidates = (0..4).map(|i| RefinementCandidate::unclustered(format!("x{i}"))).collect();

        let executor = ScriptedExecutor::new();
        executor.push(
            TaskType::ClusterRefinement,
            Scripted::Reply(r#"{"x0": "NEW:Search", "x1": "NEW:Search"}"#.into()),
        );
        executor.push(
            TaskType::ClusterRefinement,
            Scripted::Reply(r#"{"x2": "MOVE:refined_1", "x3": "MOVE:refined_1"}"#.into()),
        );

        let assigner = ClusterRefinementAssigner::new(&executor, 2, Duration::from_secs(5));
        let result = assigner.refine(Vec::new(), &activities, candidates).await;

        assert_eq!(result.report.batches_applied, 2);
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].activity_ids, vec!["x0", "x1", "x2", "x3"]);

        let prompts = executor.prompts(TaskType::ClusterRefinement);
        assert!(prompts[1].contains("refined_1"));
    }

    #[tokio::test]
    async fn invalid_or_failed_batches_are_isolated() {
        let activities: Vec<Activity> = (0..6).map(|i| activity(&format!("x{i}"), i)).collect();
        let candidates = (0..6).map(|i| RefinementCandidate::unclustered(format!("x{i}"))).collect();

        let executor = ScriptedExecutor::new();
        // Batch 1: one bad entry poisons the whole response.
        executor.push(
            TaskType::ClusterRefinement,
            Scripted::Reply(r#"{"x0": "NEW:Search", "x1": "KEEP:refined_1"}"#.into()),
        );
        // Batch 2: transport failure.
        executor.push(TaskType::ClusterRefinement, Scripted::Fail("502".into()));
        // Batch 3: fine.
        executor.push(
            TaskType::ClusterRefinement,
            Scripted::Reply(r#"{"x4": "NEW:Docs", "x5": "NEW:Docs"}"#.into()),
        );

        let assigner = ClusterRefinementAssigner::new(&executor, 2, Duration::from_secs(5));
        let result = assigner.refine(Vec::new(), &activities, candidates).await;

        assert_eq!(result.report.batches, 3);
        assert_eq!(result.report.batches_failed, 2);
        assert_eq!(result.report.batches_applied, 1);
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].activity_ids, vec!["x4", "x5"]);
        assert_eq!(result.unclustered, vec!["x0", "x1", "x2", "x3"]);
    }

    #[tokio::test]
    async fn timed_out_batch_leaves_activities_unclustered() {
        let activities = vec![activity("x0", 0)];
        let executor = ScriptedExecutor::new();
        executor.push(
            TaskType::ClusterRefinement,
            Scripted::Stall(Duration::from_millis(200)),
        );

        let assigner = ClusterRefinementAssigner::new(&executor, 5, Duration::from_millis(20));
        let result = assigner
            .refine(Vec::new(), &activities, vec![RefinementCandidate::unclustered("x0")])
            .await;
        assert_eq!(result.report.batches_failed, 1);
        assert_eq!(result.unclustered, vec!["x0"]);
    }

    #[tokio::test]
    async fn moving_out_of_a_cluster_keeps_the_partition() {
        let activities: Vec<Activity> = ["a", "b", "c"].iter().enumerate().map(|(i, id)| activity(id, i as i64)).collect();
        let c1 = Cluster::from_members("c1", &[&activities[0], &activities[1]]);
        let c2 = Cluster::from_members("c2", &[&activities[2]]);

        let executor = ScriptedExecutor::new();
        executor.push(
            TaskType::ClusterRefinement,
            Scripted::Reply(r#"{"b": "MOVE:c2"}"#.into()),
        );
        let assigner = ClusterRefinementAssigner::new(&executor, 5, Duration::from_secs(5));
        let result = assigner
            .refine(vec![c1, c2], &activities, vec![RefinementCandidate::in_cluster("b", "c1")])
            .await;

        assert_eq!(result.clusters[0].activity_ids, vec!["a"]);
        assert_eq!(result.clusters[1].activity_ids, vec!["c", "b"]);
        let range = result.clusters[1].metrics.date_range.unwrap();
        assert_eq!(range.start, activities[1].timestamp);
    }
}
