//! LLM task execution seam.
//!
//! Refinement and naming talk to the model only through [`TaskExecutor`], so
//! tests can script responses and the pipeline never depends on a provider.
//! Every call goes through [`run_with_timeout`], which turns errors and
//! timeouts into "no answer".

use std::future::Future;
use std::time::Duration;

use ai_client::{Claude, Message};
use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    ClusterRefinement,
    ClusterNaming,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ClusterRefinement => "cluster_refinement",
            TaskType::ClusterNaming => "cluster_naming",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityTier {
    Fast,
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub content: String,
    pub model: String,
    /// USD, from token usage at list price.
    pub estimated_cost: f64,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute_task(
        &self,
        task: TaskType,
        messages: Vec<Message>,
        tier: QualityTier,
        options: TaskOptions,
    ) -> Result<TaskOutput>;
}

/// Claude-backed executor. Tiers map to a fast and a balanced model.
pub struct ClaudeExecutor {
    fast: Claude,
    balanced: Claude,
}

impl ClaudeExecutor {
    pub fn new(api_key: &str, fast_model: &str, balanced_model: &str) -> Self {
        Self {
            fast: Claude::new(api_key, fast_model),
            balanced: Claude::new(api_key, balanced_model),
        }
    }

    pub fn with_base_url(self, url: &str) -> Self {
        Self {
            fast: self.fast.with_base_url(url),
            balanced: self.balanced.with_base_url(url),
        }
    }

    fn model_for(&self, tier: QualityTier) -> &Claude {
        match tier {
            QualityTier::Fast => &self.fast,
            QualityTier::Balanced => &self.balanced,
        }
    }
}

/// (input, output) USD per million tokens.
fn price_per_mtok(model: &str) -> (f64, f64) {
    if model.contains("haiku") {
        (1.0, 5.0)
    } else if model.contains("opus") {
        (15.0, 75.0)
    } else {
        (3.0, 15.0)
    }
}

pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (input, output) = price_per_mtok(model);
    (input_tokens as f64 * input + output_tokens as f64 * output) / 1_000_000.0
}

#[async_trait]
impl TaskExecutor for ClaudeExecutor {
    async fn execute_task(
        &self,
        task: TaskType,
        messages: Vec<Message>,
        tier: QualityTier,
        options: TaskOptions,
    ) -> Result<TaskOutput> {
        let claude = self.model_for(tier);
        let completion = claude
            .chat(&messages, options.max_tokens, options.temperature)
            .await?;
        let estimated_cost = estimate_cost(
            &completion.model,
            completion.input_tokens,
            completion.output_tokens,
        );
        tracing::debug!(
            task = task.as_str(),
            model = completion.model.as_str(),
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            estimated_cost,
            "LLM task complete"
        );
        Ok(TaskOutput {
            content: completion.text,
            model: completion.model,
            estimated_cost,
        })
    }
}

/// Await `call` for at most `limit`. Errors and timeouts both resolve to
/// `None` so one slow or failing call only degrades its own unit of work.
pub async fn run_with_timeout<T, F>(label: &str, limit: Duration, call: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(task = label, error = %e, "LLM call failed, treating as no answer");
            None
        }
        Err(_) => {
            warn!(task = label, timeout_secs = limit.as_secs_f64(), "LLM call timed out, treating as no answer");
            None
        }
    }
}
