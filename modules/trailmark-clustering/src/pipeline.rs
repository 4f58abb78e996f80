//! One user-sync run, end to end.
//!
//! enrich -> graph -> refine orphans -> entry target -> merge small -> dedup
//! by container -> name -> sync. The LLM stages only run when an executor is
//! configured; everything else is deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use trailmark_common::{Activity, Cluster, Config, SyncScope, TrailmarkError};

use crate::enrich::enrich_all;
use crate::graph::{ClusterOptions, GraphClusterer, LinkStats};
use crate::llm::{ClaudeExecutor, TaskExecutor};
use crate::namer::{ClusterNamer, NamingReport};
use crate::post_process::{
    compute_entry_target, dedup_clusters_by_container, merge_small_clusters, EntryTarget,
};
use crate::refinement::{ClusterRefinementAssigner, RefinementCandidate, RefinementReport};
use crate::store::GroupingStore;
use crate::sync::{display_name, SyncOrchestrator, SyncReport};

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub activities: usize,
    pub links: LinkStats,
    pub graph_clusters: usize,
    pub graph_orphans: usize,
    pub refinement: Option<RefinementReport>,
    pub entry_target: EntryTarget,
    pub naming: Option<NamingReport>,
    pub sync: SyncReport,
    /// Final cluster set, as synced.
    pub clusters: Vec<Cluster>,
    /// Activities that ended up in no cluster, in input order.
    pub orphans: Vec<String>,
}

impl PipelineReport {
    pub fn estimated_cost(&self) -> f64 {
        self.refinement.as_ref().map_or(0.0, |r| r.estimated_cost)
            + self.naming.as_ref().map_or(0.0, |n| n.estimated_cost)
    }
}

impl std::fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Clustering Complete ===")?;
        writeln!(f, "Activities:        {}", self.activities)?;
        writeln!(
            f,
            "Links:             {} ref, {} container, {} collaborator",
            self.links.ref_links, self.links.container_links, self.links.collaborator_links
        )?;
        writeln!(f, "Graph clusters:    {} ({} orphans)", self.graph_clusters, self.graph_orphans)?;
        match &self.refinement {
            Some(r) => writeln!(
                f,
                "Refinement:        {}/{} batches applied, {} moved, {} new clusters",
                r.batches_applied, r.batches, r.moved, r.clusters_created
            )?,
            None => writeln!(f, "Refinement:        skipped")?,
        }
        writeln!(
            f,
            "Entry target:      {} (min {} per entry)",
            self.entry_target.target_entries, self.entry_target.min_activities_per_entry
        )?;
        match &self.naming {
            Some(n) => writeln!(f, "Naming:            {}/{} renamed", n.renamed, n.requested)?,
            None => writeln!(f, "Naming:            skipped")?,
        }
        writeln!(f, "Final clusters:    {}", self.clusters.len())?;
        for cluster in &self.clusters {
            writeln!(f, "  - {} ({} activities)", display_name(cluster), cluster.len())?;
        }
        writeln!(f, "Orphans:           {}", self.orphans.len())?;
        writeln!(f, "{}", self.sync)?;
        write!(f, "Estimated cost:    ${:.4}", self.estimated_cost())
    }
}

pub struct ClusteringPipeline {
    config: Config,
    executor: Option<Arc<dyn TaskExecutor>>,
    store: Arc<dyn GroupingStore>,
}

impl ClusteringPipeline {
    /// Pipeline without LLM stages.
    pub fn new(config: Config, store: Arc<dyn GroupingStore>) -> Self {
        Self {
            config,
            executor: None,
            store,
        }
    }

    /// Pipeline with a Claude executor when the config carries an API key.
    pub fn from_config(config: Config, store: Arc<dyn GroupingStore>) -> Self {
        let executor = config.anthropic_api_key.as_deref().map(|key| {
            let mut claude = ClaudeExecutor::new(key, &config.fast_model, &config.balanced_model);
            if let Some(url) = config.anthropic_base_url.as_deref() {
                claude = claude.with_base_url(url);
            }
            Arc::new(claude) as Arc<dyn TaskExecutor>
        });
        Self {
            config,
            executor,
            store,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub async fn run(
        &self,
        mut activities: Vec<Activity>,
        self_identifiers: &[String],
        existing_entry_count: usize,
        scope: &SyncScope,
    ) -> Result<PipelineReport, TrailmarkError> {
        info!(
            author = scope.author.as_str(),
            mode = scope.mode.as_str(),
            activities = activities.len(),
            llm = self.executor.is_some(),
            "Starting clustering run"
        );

        enrich_all(&mut activities, self_identifiers);

        let outcome = GraphClusterer::new(ClusterOptions {
            min_cluster_size: self.config.min_cluster_size,
            collaborator_window: self.config.collaborator_window,
        })
        .cluster(&activities);
        let graph_clusters = outcome.clusters.len();
        let graph_orphans = outcome.orphans.len();

        let (mut clusters, orphans, refinement) = match &self.executor {
            Some(executor) if !outcome.orphans.is_empty() => {
                let assigner = ClusterRefinementAssigner::new(
                    executor.as_ref(),
                    self.config.refinement_batch_size,
                    self.config.llm_timeout,
                );
                let candidates = outcome
                    .orphans
                    .iter()
                    .map(RefinementCandidate::unclustered)
                    .collect();
                let refined = assigner.refine(outcome.clusters, &activities, candidates).await;
                (refined.clusters, refined.unclustered, Some(refined.report))
            }
            _ => (outcome.clusters, outcome.orphans, None),
        };

        let entry_target = compute_entry_target(&activities, existing_entry_count);
        clusters = merge_small_clusters(clusters, entry_target.target_entries);
        clusters = dedup_clusters_by_container(clusters, self.config.max_merge_size);

        let naming = match &self.executor {
            Some(executor) => {
                let namer = ClusterNamer::new(
                    executor.as_ref(),
                    self.config.naming_concurrency,
                    self.config.llm_timeout,
                );
                Some(namer.name_clusters(&mut clusters, &activities).await)
            }
            None => None,
        };

        let index: HashMap<&str, &Activity> = activities.iter().map(|a| (a.id.as_str(), a)).collect();
        let orphan_activities: Vec<&Activity> = orphans
            .iter()
            .filter_map(|id| index.get(id.as_str()).copied())
            .collect();

        let sync = SyncOrchestrator::new(self.store.as_ref(), self.config.temporal_window_days)
            .sync(
                scope,
                &clusters,
                &orphan_activities,
                entry_target.min_activities_per_entry,
            )
            .await?;

        let report = PipelineReport {
            activities: activities.len(),
            links: outcome.links,
            graph_clusters,
            graph_orphans,
            refinement,
            entry_target,
            naming,
            sync,
            clusters,
            orphans,
        };
        info!(
            clusters = report.clusters.len(),
            orphans = report.orphans.len(),
            estimated_cost = report.estimated_cost(),
            "Clustering run complete"
        );
        Ok(report)
    }
}
