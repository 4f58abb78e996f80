use serde::Deserialize;

use super::{lenient, lenient_list, non_blank, Identity, SignalSource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfluenceRawData {
    #[serde(default, deserialize_with = "lenient")]
    pub space_key: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub creator: Option<Identity>,
    #[serde(default, deserialize_with = "lenient")]
    pub last_modified_by: Option<Identity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub watchers: Vec<Identity>,
}

impl SignalSource for ConfluenceRawData {
    fn container(&self) -> Option<String> {
        non_blank(&self.space_key)
    }

    fn collaborators(&self) -> Vec<&Identity> {
        self.creator
            .iter()
            .chain(self.last_modified_by.iter())
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
    fn space_key_and_people() {
        let payload = json!({
            "spaceKey": "ENG",
            "creator": {"username": "Dana"},
            "lastModifiedBy": {"username": "me"},
            "watchers": ["eve", "dana"],
        });
        let signals = extract_signals(ToolSource::Confluence, &payload, &["ME".to_string()]);
        assert_eq!(signals.container.as_deref(), Some("ENG"));
        assert_eq!(signals.collaborators, vec!["dana", "eve"]);
    }
}
