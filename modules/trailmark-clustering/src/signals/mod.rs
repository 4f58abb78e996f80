//! Collaboration signals from per-tool payloads.
//!
//! Each tool's raw payload is parsed into its own typed shape, chosen by the
//! activity's declared source, and asked for two things: a container (the
//! tool-specific grouping context such as a branch, epic, thread or space) and
//! the set of people involved. Malformed payloads behave like empty ones, and a
//! malformed field (including `null`) only costs that field.

mod confluence;
mod github;
mod jira;
mod slack;

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use trailmark_common::ToolSource;

pub use confluence::ConfluenceRawData;
pub use github::GithubRawData;
pub use jira::JiraRawData;
pub use slack::SlackRawData;

/// What one payload says about grouping and people.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    pub collaborators: Vec<String>,
    pub container: Option<String>,
}

/// Capability shared by every typed payload.
pub trait SignalSource {
    fn container(&self) -> Option<String>;
    /// Raw identities in payload order, before normalization.
    fn collaborators(&self) -> Vec<&Identity>;
}

/// A person as tools report them: a bare handle, or an account object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Handle(String),
    Account {
        #[serde(default)]
        login: Option<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, rename = "displayName")]
        display_name: Option<String>,
    },
}

impl Identity {
    /// Every handle this identity is known by, most canonical first.
    pub fn handles(&self) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            Identity::Handle(h) => vec![h.as_str()],
            Identity::Account {
                login,
                username,
                email,
                name,
                display_name,
            } => [login, username, email, name, display_name]
                .into_iter()
                .filter_map(|v| v.as_deref())
                .collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .collect()
    }
}

/// Typed payload per tool. Dispatch is by the declared source, never by
/// sniffing the payload's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawData {
    Github(GithubRawData),
    Jira(JiraRawData),
    Slack(SlackRawData),
    Confluence(ConfluenceRawData),
}

impl RawData {
    pub fn parse(source: ToolSource, raw: &Value) -> Option<Self> {
        if !raw.is_object() {
            return None;
        }
        match source {
            ToolSource::Github => typed(raw).map(RawData::Github),
            ToolSource::Jira => typed(raw).map(RawData::Jira),
            ToolSource::Slack => typed(raw).map(RawData::Slack),
            ToolSource::Confluence => typed(raw).map(RawData::Confluence),
            ToolSource::Figma | ToolSource::Other => None,
        }
    }

    fn as_source(&self) -> &dyn SignalSource {
        match self {
            RawData::Github(d) => d,
            RawData::Jira(d) => d,
            RawData::Slack(d) => d,
            RawData::Confluence(d) => d,
        }
    }
}

fn typed<T: DeserializeOwned>(raw: &Value) -> Option<T> {
    match serde_json::from_value(raw.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(error = %e, "Unreadable raw payload, ignoring signals");
            None
        }
    }
}

/// Extract container and collaborators from one activity payload.
///
/// Collaborators are lowercased, deduplicated, and exclude anyone matching
/// `self_identifiers` (case-insensitive).
pub fn extract_signals(source: ToolSource, raw: &Value, self_identifiers: &[String]) -> Signals {
    let Some(data) = RawData::parse(source, raw) else {
        return Signals::default();
    };
    let data = data.as_source();

    let me: HashSet<String> = self_identifiers
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    let mut seen = HashSet::new();
    let collaborators = data
        .collaborators()
        .into_iter()
        .filter_map(|identity| {
            let handles: Vec<String> = identity.handles().iter().map(|h| h.to_lowercase()).collect();
            if handles.iter().any(|h| me.contains(h)) {
                return None;
            }
            handles.into_iter().next()
        })
        .filter(|h| seen.insert(h.clone()))
        .collect();

    Signals {
        collaborators,
        container: data.container().filter(|c| !c.trim().is_empty()),
    }
}

/// The repository a payload declares, used when no container exists.
pub fn declared_repository(source: ToolSource, raw: &Value) -> Option<String> {
    match RawData::parse(source, raw)? {
        RawData::Github(d) => d.repository.filter(|r| !r.trim().is_empty()),
        _ => None,
    }
}

/// Reads a field of the wrong shape as its default.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Keeps the readable elements of a list; anything but an array is empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
