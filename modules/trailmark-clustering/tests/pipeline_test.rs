//! End-to-end runs of the clustering pipeline against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ai_client::Message;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use trailmark_clustering::{
    ClusteringPipeline, GroupingStore, InMemoryGroupingStore, QualityTier, TaskExecutor,
    TaskOptions, TaskOutput, TaskType,
};
use trailmark_common::{Activity, Config, GroupingMethod, SyncScope, ToolSource};

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

fn activity(id: &str, source: ToolSource, title: &str, ts: DateTime<Utc>, raw: Value) -> Activity {
    let mut a = Activity::new(id, source, title, ts);
    a.raw_data = raw;
    a
}

/// Two projects linked by refs and containers, plus three unrelated chats.
fn fixture() -> Vec<Activity> {
    vec![
        // SSO work in acme/tacit-web
        activity(
            "gh-1",
            ToolSource::Github,
            "AUTH-12 add sso callback",
            at(2, 9),
            json!({"repository": "acme/tacit-web", "branch": "main"}),
        ),
        activity(
            "gh-2",
            ToolSource::Github,
            "AUTH-12 handle sso logout",
            at(2, 15),
            json!({"repository": "acme/tacit-web", "branch": "main"}),
        ),
        activity(
            "jira-1",
            ToolSource::Jira,
            "AUTH-12 SSO callback ticket",
            at(3, 10),
            json!({"linkedIssues": [{"key": "AUTH-1", "type": "Epic"}], "assignee": "frank"}),
        ),
        activity(
            "slack-1",
            ToolSource::Slack,
            "AUTH-12 rollout chat",
            at(3, 11),
            json!({"threadTs": "1741000000.000100", "author": "frank"}),
        ),
        // Billing docs and API
        activity(
            "conf-1",
            ToolSource::Confluence,
            "BILL-7 pricing notes",
            at(4, 9),
            json!({"spaceKey": "BILL", "creator": "grace"}),
        ),
        activity(
            "conf-2",
            ToolSource::Confluence,
            "BILL-7 rollout plan",
            at(4, 14),
            json!({"spaceKey": "BILL", "creator": {"displayName": "Grace"}}),
        ),
        activity(
            "jira-2",
            ToolSource::Jira,
            "BILL-7 pricing API",
            at(5, 10),
            json!({"linkedIssues": [{"key": "BILL-1", "type": "Epic"}], "assignee": {"name": "heidi"}}),
        ),
        // Unthreaded chats
        activity("chat-1", ToolSource::Slack, "pricing page copy review", at(10, 9), json!({"author": "ivan"})),
        activity("chat-2", ToolSource::Slack, "invoice email template", at(11, 9), json!({"author": "judy"})),
        activity("chat-3", ToolSource::Slack, "offsite venue shortlist", at(12, 9), json!({"author": "mallory"})),
    ]
}

fn me() -> Vec<String> {
    vec!["dana".to_string()]
}

/// Answers refinement with a fixed assignment and names the SSO project.
/// With `vary_names`, each naming call words the name differently.
#[derive(Default)]
struct FixtureExecutor {
    refinement_calls: AtomicUsize,
    naming_calls: AtomicUsize,
    vary_names: bool,
}

#[async_trait]
impl TaskExecutor for FixtureExecutor {
    async fn execute_task(
        &self,
        task: TaskType,
        messages: Vec<Message>,
        _tier: QualityTier,
        _options: TaskOptions,
    ) -> Result<TaskOutput> {
        let prompt: String = messages.iter().map(|m| m.content.as_str()).collect();
        let content = match task {
            TaskType::ClusterRefinement => {
                self.refinement_calls.fetch_add(1, Ordering::SeqCst);
                "```json\n{\"chat-1\": \"MOVE:cluster_2\", \"chat-2\": \"MOVE:cluster_2\", \"chat-3\": \"NEW:Team Offsite\"}\n```"
                    .to_string()
            }
            TaskType::ClusterNaming => {
                let n = self.naming_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if prompt.contains("sso callback") && self.vary_names {
                    format!("Sso Rollout Work {n}")
                } else if prompt.contains("sso callback") {
                    "\"Single Sign-On Rollout\"".to_string()
                } else {
                    anyhow::bail!("unexpected naming prompt");
                }
            }
        };
        Ok(TaskOutput {
            content,
            model: "fixture".to_string(),
            estimated_cost: 0.001,
        })
    }
}

#[tokio::test]
async fn deterministic_run_clusters_projects_and_windows_orphans() {
    let store = Arc::new(InMemoryGroupingStore::new());
    let pipeline = ClusteringPipeline::new(Config::default(), store.clone());
    let scope = SyncScope::new("dana", "work");

    let report = pipeline.run(fixture(), &me(), 0, &scope).await.unwrap();

    assert_eq!(report.graph_clusters, 2);
    assert_eq!(report.graph_orphans, 3);
    assert!(report.refinement.is_none());
    assert!(report.naming.is_none());
    assert_eq!(report.entry_target.target_entries, 3);
    assert_eq!(report.entry_target.min_activities_per_entry, 3);

    let ids: Vec<Vec<&str>> = report
        .clusters
        .iter()
        .map(|c| c.activity_ids.iter().map(String::as_str).collect())
        .collect();
    assert_eq!(
        ids,
        vec![
            vec!["gh-1", "gh-2", "jira-1", "slack-1"],
            vec!["conf-1", "conf-2", "jira-2"],
        ]
    );
    assert_eq!(report.clusters[0].name.as_deref(), Some("tacit-web"));
    assert_eq!(report.clusters[1].dominant_container.as_deref(), Some("BILL"));
    assert_eq!(report.sync.created, 3);

    let records = store.list(&scope).await.unwrap();
    assert_eq!(records.len(), 3);
    let temporal: Vec<_> = records
        .iter()
        .filter(|r| r.grouping_method == GroupingMethod::Time)
        .collect();
    assert_eq!(temporal.len(), 1);
    assert_eq!(temporal[0].activity_ids, vec!["chat-1", "chat-2", "chat-3"]);
    assert!(records.iter().all(|r| r.narrative_pending));
}

#[tokio::test]
async fn rerun_with_same_input_creates_nothing() {
    let store = Arc::new(InMemoryGroupingStore::new());
    let pipeline = ClusteringPipeline::new(Config::default(), store.clone());
    let scope = SyncScope::new("dana", "work");

    pipeline.run(fixture(), &me(), 0, &scope).await.unwrap();
    let second = pipeline.run(fixture(), &me(), 0, &scope).await.unwrap();

    assert_eq!(second.sync.created, 0);
    assert_eq!(second.sync.updated, 0);
    assert_eq!(second.sync.unchanged, 3);
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn llm_run_refines_orphans_and_names_raw_clusters() {
    let store = Arc::new(InMemoryGroupingStore::new());
    let executor = Arc::new(FixtureExecutor::default());
    let pipeline =
        ClusteringPipeline::new(Config::default(), store.clone()).with_executor(executor.clone());
    let scope = SyncScope::new("dana", "work");

    let report = pipeline.run(fixture(), &me(), 0, &scope).await.unwrap();

    assert_eq!(executor.refinement_calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.naming_calls.load(Ordering::SeqCst), 1);
    assert!(report.orphans.is_empty());

    let names: Vec<&str> = report
        .clusters
        .iter()
        .filter_map(|c| c.name.as_deref())
        .collect();
    assert_eq!(names, vec!["Single Sign-On Rollout", "BILL", "Team Offsite"]);
    assert_eq!(
        report.clusters[1].activity_ids,
        vec!["conf-1", "conf-2", "jira-2", "chat-1", "chat-2"]
    );

    let records = store.list(&scope).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|r| r.grouping_method == GroupingMethod::Cluster));
    assert!(store
        .find_cluster_record(&scope, "Single Sign-On Rollout")
        .await
        .unwrap()
        .is_some());
    assert!(report.estimated_cost() > 0.0);
}

#[tokio::test]
async fn llm_rerun_with_reworded_names_creates_nothing() {
    let store = Arc::new(InMemoryGroupingStore::new());
    let executor = Arc::new(FixtureExecutor {
        vary_names: true,
        ..Default::default()
    });
    let pipeline =
        ClusteringPipeline::new(Config::default(), store.clone()).with_executor(executor.clone());
    let scope = SyncScope::new("dana", "work");

    let first = pipeline.run(fixture(), &me(), 0, &scope).await.unwrap();
    assert_eq!(first.sync.created, 3);
    assert_eq!(first.clusters[0].name.as_deref(), Some("Sso Rollout Work 1"));

    let second = pipeline.run(fixture(), &me(), 0, &scope).await.unwrap();
    assert_eq!(second.clusters[0].name.as_deref(), Some("Sso Rollout Work 2"));
    assert_eq!(second.sync.created, 0);
    assert_eq!(second.sync.unchanged, 3);
    assert_eq!(store.len().await, 3);

    let record = store
        .find_cluster_record(&scope, "Sso Rollout Work 1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.activity_ids, vec!["gh-1", "gh-2", "jira-1", "slack-1"]);
}

#[tokio::test]
async fn scopes_do_not_share_records() {
    let store = Arc::new(InMemoryGroupingStore::new());
    let pipeline = ClusteringPipeline::new(Config::default(), store.clone());

    pipeline
        .run(fixture(), &me(), 0, &SyncScope::new("dana", "work"))
        .await
        .unwrap();
    let other = pipeline
        .run(fixture(), &me(), 0, &SyncScope::new("eve", "work"))
        .await
        .unwrap();

    assert_eq!(other.sync.created, 3);
    assert_eq!(store.len().await, 6);
}
