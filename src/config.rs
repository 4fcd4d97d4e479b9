use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "EvidenceEngine";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/EvidenceEngine/ on all platforms, falling back to the working directory
/// when no home directory can be resolved.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Location of the on-disk evidence cache.
pub fn cache_db_path() -> PathBuf {
    app_data_dir().join("cache.db")
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,evidence_engine=debug"
}

// ═══════════════════════════════════════════
// Engine Configuration
// ═══════════════════════════════════════════

/// Every tunable of an engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Router confidence at or above which heuristic extraction alone is trusted.
    pub heuristic_threshold: f32,
    /// Router confidence at or below which a requirement is marked likely-missing.
    pub missing_threshold: f32,
    /// Maximum inference calls in flight across the whole run.
    pub max_concurrent_inference: usize,
    /// Per-call inference timeout.
    pub inference_timeout_secs: u64,
    /// Extra attempts after a timeout or transport failure.
    pub max_backend_retries: u32,
    /// Confidence removed from a record whose location or value does not verify.
    pub verification_penalty: f32,
    /// Confidence removed from heuristic records produced as a backend fallback.
    pub fallback_penalty: f32,
    /// Maximum distance between two aligned dates.
    pub date_tolerance_days: i64,
    /// Name similarity at or above which two names are the same entity.
    pub identity_threshold: f64,
    /// Passing checks that rely on evidence below this confidence become warnings.
    pub low_confidence_floor: f32,
    /// Character budget for the excerpts sent with one inference call.
    pub excerpt_char_budget: usize,
    /// Maximum number of document segments sent with one inference call.
    pub excerpt_max_segments: usize,
    /// Maximum records kept per (requirement, document).
    pub max_records_per_document: usize,
    /// Model used for inference-backed extraction.
    pub model_name: String,
    /// Base URL of the Ollama instance.
    pub ollama_url: String,
    /// When false, the run is heuristic-only.
    pub inference_enabled: bool,
    /// When true, an unavailable backend aborts the run instead of degrading.
    pub require_inference: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heuristic_threshold: 0.95,
            missing_threshold: 0.30,
            max_concurrent_inference: 5,
            inference_timeout_secs: 120,
            max_backend_retries: 1,
            verification_penalty: 0.25,
            fallback_penalty: 0.20,
            date_tolerance_days: 120,
            identity_threshold: 0.75,
            low_confidence_floor: 0.50,
            excerpt_char_budget: 6000,
            excerpt_max_segments: 3,
            max_records_per_document: 5,
            model_name: "llama3.1:8b".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            inference_enabled: true,
            require_inference: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `EVIDENCE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>, slot: &mut T) {
            if let Some(raw) = raw {
                match raw.trim().parse::<T>() {
                    Ok(value) => *slot = value,
                    Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparsable config value"),
                }
            }
        }

        parse("EVIDENCE_HEURISTIC_THRESHOLD", lookup("EVIDENCE_HEURISTIC_THRESHOLD"), &mut config.heuristic_threshold);
        parse("EVIDENCE_MISSING_THRESHOLD", lookup("EVIDENCE_MISSING_THRESHOLD"), &mut config.missing_threshold);
        parse("EVIDENCE_MAX_CONCURRENT_INFERENCE", lookup("EVIDENCE_MAX_CONCURRENT_INFERENCE"), &mut config.max_concurrent_inference);
        parse("EVIDENCE_INFERENCE_TIMEOUT_SECS", lookup("EVIDENCE_INFERENCE_TIMEOUT_SECS"), &mut config.inference_timeout_secs);
        parse("EVIDENCE_DATE_TOLERANCE_DAYS", lookup("EVIDENCE_DATE_TOLERANCE_DAYS"), &mut config.date_tolerance_days);
        parse("EVIDENCE_IDENTITY_THRESHOLD", lookup("EVIDENCE_IDENTITY_THRESHOLD"), &mut config.identity_threshold);
        parse("EVIDENCE_INFERENCE_ENABLED", lookup("EVIDENCE_INFERENCE_ENABLED"), &mut config.inference_enabled);
        parse("EVIDENCE_REQUIRE_INFERENCE", lookup("EVIDENCE_REQUIRE_INFERENCE"), &mut config.require_inference);

        if let Some(model) = lookup("EVIDENCE_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model_name = model.trim().to_string();
        }
        if let Some(url) = lookup("EVIDENCE_OLLAMA_URL").filter(|u| !u.trim().is_empty()) {
            config.ollama_url = url.trim().to_string();
        }

        // A zero ceiling would deadlock every inference-routed requirement.
        config.max_concurrent_inference = config.max_concurrent_inference.max(1);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn cache_db_under_app_data() {
        let path = cache_db_path();
        assert!(path.starts_with(app_data_dir()));
        assert!(path.ends_with("cache.db"));
    }

    #[test]
    fn app_name_is_evidence_engine() {
        assert_eq!(APP_NAME, "EvidenceEngine");
    }

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.heuristic_threshold, 0.95);
        assert_eq!(config.missing_threshold, 0.30);
        assert_eq!(config.max_concurrent_inference, 5);
        assert_eq!(config.date_tolerance_days, 120);
        assert_eq!(config.identity_threshold, 0.75);
        assert!(config.inference_enabled);
        assert!(!config.require_inference);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("EVIDENCE_DATE_TOLERANCE_DAYS", "30"),
            ("EVIDENCE_MODEL", "qwen2.5:7b"),
            ("EVIDENCE_INFERENCE_ENABLED", "false"),
        ]);
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.date_tolerance_days, 30);
        assert_eq!(config.model_name, "qwen2.5:7b");
        assert!(!config.inference_enabled);
    }

    #[test]
    fn unparsable_env_value_keeps_default() {
        let config = EngineConfig::from_lookup(|k| {
            (k == "EVIDENCE_IDENTITY_THRESHOLD").then(|| "very similar".to_string())
        });
        assert_eq!(config.identity_threshold, 0.75);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = EngineConfig::from_lookup(|k| {
            (k == "EVIDENCE_MAX_CONCURRENT_INFERENCE").then(|| "0".to_string())
        });
        assert_eq!(config.max_concurrent_inference, 1);
    }
}
