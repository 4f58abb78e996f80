// Test doubles for the clustering pipeline.
//
// - ScriptedExecutor (TaskExecutor): canned replies, failures and stalls per
//   task type, either queued or matched on prompt content
// - activity builders
//
// The grouping store double is the real InMemoryGroupingStore.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use ai_client::Message;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use trailmark_common::{Activity, ToolSource};

use crate::llm::{QualityTier, TaskExecutor, TaskOptions, TaskOutput, TaskType};

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail(String),
    /// Sleep this long, then reply with an empty string.
    Stall(Duration),
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub task: TaskType,
    pub tier: QualityTier,
    /// All message contents joined with newlines.
    pub prompt: String,
}

/// `TaskExecutor` that replays scripted answers.
///
/// A call first looks for a `when` rule whose needle appears in the prompt,
/// then falls back to the per-task queue. An unscripted call is an error.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(TaskType, String, Scripted)>>,
    queues: Mutex<HashMap<TaskType, VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: TaskType, answer: Scripted) {
        self.queues
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(answer);
    }

    pub fn when(&self, task: TaskType, needle: &str, answer: Scripted) {
        self.rules
            .lock()
            .unwrap()
            .push((task, needle.to_string(), answer));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prompts(&self, task: TaskType) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.task == task)
            .map(|c| c.prompt)
            .collect()
    }

    fn next_answer(&self, task: TaskType, prompt: &str) -> Option<Scripted> {
        let rule = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(t, needle, _)| *t == task && prompt.contains(needle.as_str()))
            .map(|(_, _, answer)| answer.clone());
        rule.or_else(|| {
            self.queues
                .lock()
                .unwrap()
                .get_mut(&task)
                .and_then(VecDeque::pop_front)
        })
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute_task(
        &self,
        task: TaskType,
        messages: Vec<Message>,
        tier: QualityTier,
        _options: TaskOptions,
    ) -> Result<TaskOutput> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let answer = self.next_answer(task, &prompt);
        self.calls.lock().unwrap().push(RecordedCall { task, tier, prompt });

        let content = match answer {
            Some(Scripted::Reply(content)) => content,
            Some(Scripted::Fail(reason)) => bail!("ScriptedExecutor: {reason}"),
            Some(Scripted::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                String::new()
            }
            None => bail!("ScriptedExecutor: nothing scripted for {}", task.as_str()),
        };
        Ok(TaskOutput {
            content,
            model: "scripted".to_string(),
            estimated_cost: 0.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Activity builders
// ---------------------------------------------------------------------------

/// `hour`:00 UTC on the given day of March 2026.
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

pub fn activity(id: &str, source: ToolSource, title: &str, ts: DateTime<Utc>) -> Activity {
    Activity::new(id, source, title, ts)
}

