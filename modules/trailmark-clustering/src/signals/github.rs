use serde::Deserialize;

use super::{lenient, lenient_list, non_blank, Identity, SignalSource};

/// Long-lived branches say nothing about which project a change belongs to.
fn is_trunk_branch(branch: &str) -> bool {
    let b = branch.trim().to_lowercase();
    matches!(b.as_str(), "main" | "master" | "develop")
        || ["release-", "release/", "hotfix-", "hotfix/"]
            .iter()
            .any(|prefix| b.starts_with(prefix))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubRawData {
    #[serde(default, deserialize_with = "lenient")]
    pub head_ref: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub branch: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub repository: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<Identity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub reviewers: Vec<Identity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub requested_reviewers: Vec<Identity>,
}

impl SignalSource for GithubRawData {
    fn container(&self) -> Option<String> {
        if let Some(head) = non_blank(&self.head_ref) {
            return Some(head);
        }
        if let Some(branch) = non_blank(&self.branch).filter(|b| !is_trunk_branch(b)) {
            return Some(branch);
        }
        // Namespaced so a repository never collides with a branch of the same name.
        non_blank(&self.repository).map(|repo| format!("repo:{repo}"))
    }

    fn collaborators(&self) -> Vec<&Identity> {
        self.author
            .iter()
            .chain(self.reviewers.iter())
            .chain(self.requested_reviewers.iter())
            .collect()
    }
}
