use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_FAST_MODEL: &str = "claude-haiku-4-5-20251001";
pub const DEFAULT_BALANCED_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Engine configuration loaded from environment variables.
///
/// Nothing is required: without `ANTHROPIC_API_KEY` the LLM passes are
/// skipped and the pipeline runs graph clustering + post-processing only.
#[derive(Debug, Clone)]
pub struct Config {
    // AI / LLM
    pub anthropic_api_key: Option<String>,
    /// Overrides the Anthropic API endpoint, e.g. for a proxy.
    pub anthropic_base_url: Option<String>,
    pub fast_model: String,
    pub balanced_model: String,
    pub llm_timeout: Duration,

    // Refinement + naming
    pub refinement_batch_size: usize,
    pub naming_concurrency: usize,

    // Graph clustering
    pub min_cluster_size: usize,
    /// `None` disables collaborator edges entirely.
    pub collaborator_window: Option<chrono::Duration>,

    // Post-processing + sync
    pub max_merge_size: usize,
    pub temporal_window_days: i64,

    // Database
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            anthropic_base_url: None,
            fast_model: DEFAULT_FAST_MODEL.to_string(),
            balanced_model: DEFAULT_BALANCED_MODEL.to_string(),
            llm_timeout: Duration::from_secs(30),
            refinement_batch_size: 20,
            naming_concurrency: 4,
            min_cluster_size: 2,
            collaborator_window: Some(chrono::Duration::hours(48)),
            max_merge_size: 15,
            temporal_window_days: 14,
            database_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable values fall
    /// back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let collaborator_hours: i64 = parsed(&lookup, "TRAILMARK_COLLABORATOR_WINDOW_HOURS", 48);

        Self {
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            anthropic_base_url: non_empty("ANTHROPIC_BASE_URL"),
            fast_model: non_empty("TRAILMARK_FAST_MODEL").unwrap_or(defaults.fast_model),
            balanced_model: non_empty("TRAILMARK_BALANCED_MODEL")
                .unwrap_or(defaults.balanced_model),
            llm_timeout: Duration::from_secs(parsed(&lookup, "TRAILMARK_LLM_TIMEOUT_SECS", 30)),
            refinement_batch_size: parsed::<usize>(&lookup, "TRAILMARK_REFINEMENT_BATCH_SIZE", 20)
                .max(1),
            naming_concurrency: parsed::<usize>(&lookup, "TRAILMARK_NAMING_CONCURRENCY", 4).max(1),
            min_cluster_size: parsed::<usize>(&lookup, "TRAILMARK_MIN_CLUSTER_SIZE", 2).max(1),
            collaborator_window: (collaborator_hours > 0)
                .then(|| chrono::Duration::hours(collaborator_hours)),
            max_merge_size: parsed(&lookup, "TRAILMARK_MAX_MERGE_SIZE", defaults.max_merge_size),
            temporal_window_days: parsed::<i64>(&lookup, "TRAILMARK_TEMPORAL_WINDOW_DAYS", 14)
                .max(1),
            database_url: non_empty("DATABASE_URL"),
        }
    }

    pub fn llm_enabled(&self) -> bool {
        self.anthropic_api_key.is_some()
    }

    /// Log the loaded configuration without leaking secrets.
    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview_secret(&self.anthropic_api_key));
        if let Some(url) = &self.anthropic_base_url {
            tracing::info!("  ANTHROPIC_BASE_URL: {url}");
        }
        tracing::info!("  models: fast={} balanced={}", self.fast_model, self.balanced_model);
        tracing::info!(
            "  refinement_batch_size={} naming_concurrency={} llm_timeout={}s",
            self.refinement_batch_size,
            self.naming_concurrency,
            self.llm_timeout.as_secs()
        );
        tracing::info!(
            "  min_cluster_size={} collaborator_window_hours={:?} max_merge_size={} temporal_window_days={}",
            self.min_cluster_size,
            self.collaborator_window.map(|d| d.num_hours()),
            self.max_merge_size,
            self.temporal_window_days
        );
        tracing::info!(
            "  DATABASE_URL: {}",
            if self.database_url.is_some() { "<set>" } else { "<not set>" }
        );
    }
}

/// First five characters and the length of a secret.
fn preview_secret(val: &Option<String>) -> String {
    match val {
        Some(v) => {
            let head: String = v.chars().take(5).collect();
            format!("{head}...({} chars)", v.chars().count())
        }
        None => "<not set>".to_string(),
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = raw.as_str(), "Invalid config value, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]);
        assert!(!config.llm_enabled());
        assert_eq!(config.refinement_batch_size, 20);
        assert_eq!(config.min_cluster_size, 2);
        assert_eq!(config.max_merge_size, 15);
        assert_eq!(config.temporal_window_days, 14);
        assert_eq!(config.collaborator_window, Some(chrono::Duration::hours(48)));
        assert_eq!(config.fast_model, DEFAULT_FAST_MODEL);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = config_from(&[
            ("TRAILMARK_REFINEMENT_BATCH_SIZE", "lots"),
            ("TRAILMARK_LLM_TIMEOUT_SECS", "-3"),
        ]);
        assert_eq!(config.refinement_batch_size, 20);
        assert_eq!(config.llm_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_collaborator_window_disables_edges() {
        let config = config_from(&[("TRAILMARK_COLLABORATOR_WINDOW_HOURS", "0")]);
        assert!(config.collaborator_window.is_none());
    }

    #[test]
    fn blank_api_key_is_treated_as_unset() {
        let config = config_from(&[("ANTHROPIC_API_KEY", "  ")]);
        assert!(!config.llm_enabled());

        let config = config_from(&[("ANTHROPIC_API_KEY", "sk-ant-abc")]);
        assert!(config.llm_enabled());
    }

    #[test]
    fn secret_preview_respects_char_boundaries() {
        assert_eq!(preview_secret(&Some("sk-ant-abc".into())), "sk-an...(10 chars)");
        assert_eq!(preview_secret(&Some("ключ-секрет".into())), "ключ-...(11 chars)");
        assert_eq!(preview_secret(&Some("é".into())), "é...(1 chars)");
        assert_eq!(preview_secret(&None), "<not set>");
    }

    #[test]
    fn base_url_override_is_optional() {
        assert!(config_from(&[]).anthropic_base_url.is_none());
        let config = config_from(&[("ANTHROPIC_BASE_URL", "http://localhost:8080")]);
        assert_eq!(config.anthropic_base_url.as_deref(), Some("http://localhost:8080"));
    }
}
