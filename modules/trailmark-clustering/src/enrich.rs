use tracing::debug;

use trailmark_common::Activity;

use crate::refs::{extract_refs_from_multiple, extract_refs_from_object};
use crate::signals::extract_signals;

/// Recompute the enrichment fields of one activity from its identity fields.
pub fn enrich_activity(activity: &mut Activity, self_identifiers: &[String]) {
    let text_fields = [
        Some(activity.title.as_str()),
        activity.description.as_deref(),
        activity.source_url.as_deref(),
    ];
    let mut refs = extract_refs_from_multiple(text_fields.into_iter().flatten());
    for r in extract_refs_from_object(&activity.raw_data) {
        if !refs.contains(&r) {
            refs.push(r);
        }
    }

    let signals = extract_signals(activity.source, &activity.raw_data, self_identifiers);

    activity.cross_tool_refs = refs;
    activity.container = signals.container;
    activity.collaborators = signals.collaborators;
}

pub fn enrich_all(activities: &mut [Activity], self_identifiers: &[String]) {
    for activity in activities.iter_mut() {
        enrich_activity(activity, self_identifiers);
    }
    debug!(
        activities = activities.len(),
        with_refs = activities.iter().filter(|a| !a.cross_tool_refs.is_empty()).count(),
        with_container = activities.iter().filter(|a| a.container.is_some()).count(),
        "Enriched activities"
    );
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use trailmark_common::ToolSource;

    use super::*;

    #[test]
    fn enrichment_overwrites_stale_fields() {
        let mut activity = Activity::new("gh-1", ToolSource::Github, "Add login (AUTH-12)", Utc::now());
        activity.description = Some("Closes #4".into());
        activity.source_url = Some("https://github.com/acme/web/pull/40".into());
        activity.raw_data = json!({"headRef": "feat/AUTH-13-sso", "author": "dana"});
        activity.container = Some("stale".into());
        activity.cross_tool_refs = vec!["OLD-1".into()];

        enrich_activity(&mut activity, &[]);

        assert_eq!(
            activity.cross_tool_refs,
            vec!["AUTH-12", "local#4", "acme/web#40", "AUTH-13"]
        );
        assert_eq!(activity.container.as_deref(), Some("feat/AUTH-13-sso"));
        assert_eq!(activity.collaborators, vec!["dana"]);
    }

    #[test]
    fn enrichment_is_stable_across_runs() {
        let mut activity = Activity::new("j-1", ToolSource::Jira, "AUTH-1 epic work", Utc::now());
        activity.raw_data = json!({"linkedIssues": [{"key": "AUTH-1", "type": "Epic"}]});
        enrich_activity(&mut activity, &[]);
        let first = activity.clone();
        enrich_activity(&mut activity, &[]);
        assert_eq!(activity, first);
    }
}
