pub mod enrich;
pub mod graph;
pub mod llm;
pub mod namer;
pub mod pipeline;
pub mod post_process;
pub mod refinement;
pub mod refs;
pub mod signals;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use graph::{short_repo_name, ClusterOptions, ClusterOutcome, GraphClusterer};
pub use llm::{ClaudeExecutor, QualityTier, TaskExecutor, TaskOptions, TaskOutput, TaskType};
pub use namer::{looks_like_raw_ref, ClusterNamer};
pub use pipeline::{ClusteringPipeline, PipelineReport};
pub use post_process::{
    compute_entry_target, dedup_clusters_by_container, merge_small_clusters, EntryTarget,
};
pub use refinement::{
    validate_cluster_assignment, Assignment, AssignmentValidation, ClusterRefinementAssigner,
    RefinementCandidate,
};
pub use refs::{extract_refs, extract_refs_from_multiple, extract_refs_from_object};
pub use signals::{extract_signals, Signals};
pub use store::{GroupingStore, InMemoryGroupingStore, PgGroupingStore, StoreError};
pub use sync::{SyncOrchestrator, SyncReport};
