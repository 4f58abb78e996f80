//! Human-readable cluster names.
//!
//! Graph clustering names clusters after whatever identifier dominated them
//! (`tacit-web`, `AUTH-12`, `local#4`). Those placeholders are replaced with a
//! short project name from a fast-tier model; anything already readable is
//! left alone.

use std::sync::LazyLock;
use std::time::Duration;

use ai_client::{strip_wrapping_quotes, Message};
use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, info};

use trailmark_common::{Activity, Cluster};

use crate::llm::{run_with_timeout, QualityTier, TaskExecutor, TaskOptions, TaskType};

const MAX_TITLES: usize = 8;
const MAX_NAME_CHARS: usize = 60;
const RAW_WORD_MAX_CHARS: usize = 15;

static LOCAL_REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^local#\d+$").unwrap());
static REPO_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.-]+/[\w.-]+#\d+$").unwrap());
static JIRA_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]+-\d+$").unwrap());
static LOWER_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9]+$").unwrap());
static KEBAB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)+$").unwrap());

/// Whether `name` reads like an identifier rather than a project name.
pub fn looks_like_raw_ref(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return false;
    }
    if LOCAL_REF_RE.is_match(name) || REPO_REF_RE.is_match(name) || JIRA_KEY_RE.is_match(name) {
        return true;
    }
    if LOWER_WORD_RE.is_match(name) {
        return name.chars().count() < RAW_WORD_MAX_CHARS;
    }
    KEBAB_RE.is_match(name)
}

fn needs_name(cluster: &Cluster) -> bool {
    match cluster.name.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(name) => looks_like_raw_ref(name),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamingReport {
    pub requested: usize,
    pub renamed: usize,
    pub kept: usize,
    pub estimated_cost: f64,
}

pub struct ClusterNamer<'a> {
    executor: &'a dyn TaskExecutor,
    concurrency: usize,
    timeout: Duration,
}

impl<'a> ClusterNamer<'a> {
    pub fn new(executor: &'a dyn TaskExecutor, concurrency: usize, timeout: Duration) -> Self {
        Self {
            executor,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Rename every cluster whose name is missing or raw-looking. A failed
    /// or rejected answer keeps that cluster's prior name.
    pub async fn name_clusters(&self, clusters: &mut [Cluster], activities: &[Activity]) -> NamingReport {
        let pending: Vec<(usize, Vec<String>)> = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| needs_name(c))
            .map(|(i, c)| (i, member_titles(c, activities)))
            .collect();

        let mut report = NamingReport {
            requested: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return report;
        }

        let answers: Vec<(usize, Option<(String, f64)>)> = stream::iter(pending)
            .map(|(i, titles)| async move { (i, self.suggest(&titles).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        for (i, answer) in answers {
            let cluster = &mut clusters[i];
            match answer {
                Some((name, cost)) => {
                    report.estimated_cost += cost;
                    match accept_name(&name) {
                        Some(name) => {
                            debug!(cluster = cluster.id.as_str(), name = name.as_str(), "Named cluster");
                            cluster.name = Some(name);
                            report.renamed += 1;
                        }
                        None => {
                            debug!(cluster = cluster.id.as_str(), raw = name.as_str(), "Rejected cluster name");
                            report.kept += 1;
                        }
                    }
                }
                None => report.kept += 1,
            }
        }

        info!(
            requested = report.requested,
            renamed = report.renamed,
            kept = report.kept,
            "Cluster naming complete"
        );
        report
    }

    async fn suggest(&self, titles: &[String]) -> Option<(String, f64)> {
        let messages = vec![
            Message::system(
                "You name software projects. Reply with a 3 to 6 word project name in title case \
                 and nothing else: no quotes, no punctuation at the end, no explanation.",
            ),
            Message::user(format!(
                "Activities in this project:\n{}",
                titles
                    .iter()
                    .map(|t| format!("- {t}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )),
        ];
        let options = TaskOptions {
            max_tokens: 32,
            temperature: 0.2,
        };
        let output = run_with_timeout(
            TaskType::ClusterNaming.as_str(),
            self.timeout,
            self.executor
                .execute_task(TaskType::ClusterNaming, messages, QualityTier::Fast, options),
        )
        .await?;
        Some((output.content, output.estimated_cost))
    }
}

fn member_titles(cluster: &Cluster, activities: &[Activity]) -> Vec<String> {
    cluster
        .activity_ids
        .iter()
        .filter_map(|id| activities.iter().find(|a| &a.id == id))
        .take(MAX_TITLES)
        .map(|a| a.title.clone())
        .collect()
}

fn accept_name(raw: &str) -> Option<String> {
    let name = strip_wrapping_quotes(raw.lines().next().unwrap_or(""));
    (!name.is_empty() && name.chars().count() < MAX_NAME_CHARS).then(|| name.to_string())
}
