use serde::Deserialize;

use super::{lenient, lenient_list, non_blank, Identity, SignalSource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackRawData {
    #[serde(default, deserialize_with = "lenient", alias = "thread_ts")]
    pub thread_ts: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<Identity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub mentions: Vec<Identity>,
}

impl SignalSource for SlackRawData {
    /// Thread timestamp; non-threaded messages have no container.
    fn container(&self) -> Option<String> {
        non_blank(&self.thread_ts)
    }

    fn collaborators(&self) -> Vec<&Identity> {
        self.author.iter().chain(self.mentions.iter()).collect()
    }
}
