use serde::Deserialize;

use super::{lenient, lenient_list, non_blank, Identity, SignalSource};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IssueType {
    Name(String),
    Named { name: String },
}

impl IssueType {
    fn name(&self) -> &str {
        match self {
            IssueType::Name(n) => n,
            IssueType::Named { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkedIssue {
    #[serde(default, deserialize_with = "lenient")]
    pub key: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        rename = "type",
        alias = "issueType",
        alias = "issuetype"
    )]
    pub issue_type: Option<IssueType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraRawData {
    #[serde(default, deserialize_with = "lenient_list", alias = "issueLinks")]
    pub linked_issues: Vec<LinkedIssue>,
    #[serde(default, deserialize_with = "lenient")]
    pub assignee: Option<Identity>,
    #[serde(default, deserialize_with = "lenient")]
    pub reporter: Option<Identity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub watchers: Vec<Identity>,
}

impl SignalSource for JiraRawData {
    /// The linked epic, if any. Tickets without one have no container.
    fn container(&self) -> Option<String> {
        self.linked_issues
            .iter()
            .filter(|link| {
                link.issue_type
                    .as_ref()
                    .is_some_and(|t| t.name().trim().eq_ignore_ascii_case("epic"))
            })
            .find_map(|link| non_blank(&link.key))
    }

    fn collaborators(&self) -> Vec<&Identity> {
        self.assignee
            .iter()
            .chain(self.reporter.iter())
            .chain(self.watchers.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trailmark_common::ToolSource;

    use crate::signals::extract_signals;

    #[test]
    fn epic_link_is_the_container() {
        let payload = json!({
            "linkedIssues": [
                {"key": "AUTH-2", "type": "Story"},
                {"key": "AUTH-1", "type": {"name": "Epic"}},
            ]
        });
        let signals = extract_signals(ToolSource::Jira, &payload, &[]);
        assert_eq!(signals.container.as_deref(), Some("AUTH-1"));
    }

    #[test]
    fn no_epic_means_no_container() {
        let payload = json!({"issueLinks": [{"key": "AUTH-2", "issueType": "Bug"}]});
        let signals = extract_signals(ToolSource::Jira, &payload, &[]);
        assert!(signals.container.is_none());
    }

    #[test]
    fn collaborators_from_people_fields() {
        let payload = json!({
            "assignee": {"email": "Dana@acme.io"},
            "reporter": "me@acme.io",
            "watchers": ["eve@acme.io", "dana@acme.io"],
        });
        let signals = extract_signals(ToolSource::Jira, &payload, &["ME@acme.io".to_string()]);
        assert_eq!(signals.collaborators, vec!["dana@acme.io", "eve@acme.io"]);
    }
}
