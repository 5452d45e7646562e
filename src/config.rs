use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::DiscoveryError;

/// Scoring weights. The four positive sub-scores plus the diversity weight
/// must sum to exactly 1.0; anything else is a configuration error. Weights
/// are never renormalized, so equal-looking configs score identically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weights {
    pub novelty: f64,
    pub health: f64,
    pub relevance: f64,
    pub author: f64,
    pub diversity: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            novelty: 0.35,
            health: 0.25,
            relevance: 0.25,
            author: 0.05,
            diversity: 0.10,
        }
    }
}

impl Weights {
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        for (name, w) in [
            ("novelty", self.novelty),
            ("health", self.health),
            ("relevance", self.relevance),
            ("author", self.author),
            ("diversity", self.diversity),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(DiscoveryError::Configuration(format!(
                    "weight {name}={w} is outside [0,1]"
                )));
            }
        }
        let sum = self.novelty + self.health + self.relevance + self.author + self.diversity;
        // Epsilon covers binary float representation only, not rounding slop.
        if (sum - 1.0).abs() > 1e-9 {
            return Err(DiscoveryError::Configuration(format!(
                "weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Per-endpoint-class quota: at most `capacity` calls per rolling window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub capacity: u32,
    pub window_secs: u64,
}

/// LLM provider configuration, shared by the embedding and refinement
/// collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for refinement chat calls
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Max characters per text sent to the embedding API. Dense README
    /// content can tokenize at well over 2 tokens per char; 3 000 chars
    /// stays safely under an 8 192-token context.
    pub embed_max_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
            embed_max_chars: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the cache and mission records are stored
    pub data_dir: PathBuf,
    /// Topics to search for (required, non-empty)
    pub topics: Vec<String>,
    /// Free-text discovery goal, used for relevance and refinement
    pub goal: String,
    /// Activity window: only repos pushed within the last N days
    pub days: u32,
    /// SPDX license allow-list; empty disables the filter
    pub licenses: Vec<String>,
    /// Maximum candidates gathered per run (across all topics)
    pub max_candidates: usize,
    /// Results requested per search page
    pub per_page: usize,
    /// How many top candidates receive a deep probe
    pub probe_limit: usize,
    /// Characters of README kept as the excerpt during probing
    pub readme_max_chars: usize,
    /// Concurrent probe workers; kept smaller than any quota capacity
    pub probe_workers: usize,
    /// Final selection size
    pub select_count: usize,
    /// Drop candidates whose health is below this floor
    pub min_health: f64,
    /// Zero out health when CI is absent
    pub require_ci: bool,
    /// Zero out health when tests are absent
    pub require_tests: bool,
    /// Fetch owner follower counts for the author-reputation signal
    pub author_signal: bool,
    /// Long-tail mode: bias toward repos under `max_stars`
    pub explore_longtail: bool,
    /// Star-count ceiling applied in long-tail mode
    pub max_stars: Option<u64>,
    pub weights: Weights,
    /// Cache entries older than this are refetched
    pub cache_staleness_secs: u64,
    pub search_quota: QuotaConfig,
    pub code_search_quota: QuotaConfig,
    pub rest_quota: QuotaConfig,
    /// Preemptive pacing kicks in within this percentage of a quota boundary
    pub quota_safety_margin_pct: u32,
    /// Wall-clock budget per orchestrator phase
    pub phase_timeout_secs: u64,
    /// GitHub token; anonymous access works but with tiny quotas
    pub github_token: Option<String>,
    pub use_embeddings: bool,
    pub use_refinement: bool,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            topics: Vec::new(),
            goal: String::new(),
            days: 90,
            licenses: vec![
                "MIT".to_string(),
                "Apache-2.0".to_string(),
                "BSD-3-Clause".to_string(),
                "MPL-2.0".to_string(),
            ],
            max_candidates: 120,
            per_page: 20,
            probe_limit: 40,
            readme_max_chars: 8_000,
            probe_workers: 4,
            select_count: 6,
            min_health: 0.0,
            require_ci: false,
            require_tests: false,
            author_signal: true,
            explore_longtail: false,
            max_stars: None,
            weights: Weights::default(),
            cache_staleness_secs: 24 * 3600,
            // GitHub documents 30/min for repo search and 10/min for code
            // search; stay under both.
            search_quota: QuotaConfig { capacity: 28, window_secs: 60 },
            code_search_quota: QuotaConfig { capacity: 8, window_secs: 60 },
            rest_quota: QuotaConfig { capacity: 5_000, window_secs: 3_600 },
            quota_safety_margin_pct: 10,
            phase_timeout_secs: 15 * 60,
            github_token: None,
            use_embeddings: false,
            use_refinement: false,
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("REPO_SCOUT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(topics) = std::env::var("REPO_SCOUT_TOPICS") {
            config.topics = topics
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Ok(goal) = std::env::var("REPO_SCOUT_GOAL") {
            config.goal = goal;
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_DAYS") {
            if let Ok(v) = val.parse() {
                config.days = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_LICENSES") {
            config.licenses = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_MAX_CANDIDATES") {
            if let Ok(v) = val.parse() {
                config.max_candidates = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_PROBE_LIMIT") {
            if let Ok(v) = val.parse() {
                config.probe_limit = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_README_MAX_CHARS") {
            if let Ok(v) = val.parse() {
                config.readme_max_chars = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_PROBE_WORKERS") {
            if let Ok(v) = val.parse() {
                config.probe_workers = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_SELECT_COUNT") {
            if let Ok(v) = val.parse() {
                config.select_count = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_MIN_HEALTH") {
            if let Ok(v) = val.parse() {
                config.min_health = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_MAX_STARS") {
            config.max_stars = val.parse().ok();
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_LONGTAIL") {
            config.explore_longtail = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_STALENESS_SECS") {
            if let Ok(v) = val.parse() {
                config.cache_staleness_secs = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_PHASE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.phase_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_W_NOVELTY") {
            if let Ok(v) = val.parse() {
                config.weights.novelty = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_W_HEALTH") {
            if let Ok(v) = val.parse() {
                config.weights.health = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_W_RELEVANCE") {
            if let Ok(v) = val.parse() {
                config.weights.relevance = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_W_AUTHOR") {
            if let Ok(v) = val.parse() {
                config.weights.author = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_W_DIVERSITY") {
            if let Ok(v) = val.parse() {
                config.weights.diversity = v;
            }
        }
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            config.github_token = Some(token);
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_EMBEDDINGS") {
            config.use_embeddings = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(val) = std::env::var("REPO_SCOUT_REFINEMENT") {
            config.use_refinement = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("LLM_EMBED_MAX_CHARS") {
            if let Ok(v) = val.parse() {
                config.llm.embed_max_chars = v;
            }
        }

        config
    }

    /// Fail-fast validation, run before any network activity.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.topics.is_empty() {
            return Err(DiscoveryError::Configuration(
                "topic set is empty; refusing to issue an unconstrained query".to_string(),
            ));
        }
        self.weights.validate()?;
        if self.probe_limit == 0 || self.select_count == 0 {
            return Err(DiscoveryError::Configuration(
                "probe_limit and select_count must be positive".to_string(),
            ));
        }
        if self.probe_workers == 0 {
            return Err(DiscoveryError::Configuration(
                "probe_workers must be positive".to_string(),
            ));
        }
        if self.quota_safety_margin_pct >= 100 {
            return Err(DiscoveryError::Configuration(format!(
                "quota_safety_margin_pct={} must be below 100",
                self.quota_safety_margin_pct
            )));
        }
        for (name, q) in [
            ("search", &self.search_quota),
            ("code_search", &self.code_search_quota),
            ("rest", &self.rest_quota),
        ] {
            if q.capacity == 0 || q.window_secs == 0 {
                return Err(DiscoveryError::Configuration(format!(
                    "{name} quota needs positive capacity and window"
                )));
            }
        }
        if self.max_stars.is_some() && !self.explore_longtail {
            return Err(DiscoveryError::Configuration(
                "max_stars is only meaningful with explore_longtail".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("repo_cache.json")
    }

    pub fn missions_dir(&self) -> PathBuf {
        self.data_dir.join("missions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        Weights::default().validate().unwrap();
    }

    #[test]
    fn test_weights_rejects_bad_sum() {
        let w = Weights { novelty: 0.5, health: 0.5, relevance: 0.5, author: 0.0, diversity: 0.0 };
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_weights_not_renormalized() {
        // 0.99 total looks "close enough" but must be rejected outright.
        let w = Weights { novelty: 0.34, health: 0.25, relevance: 0.25, author: 0.05, diversity: 0.10 };
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_topics() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("topic set"));
    }

    #[test]
    fn test_validate_rejects_max_stars_without_longtail() {
        let mut config = Config { topics: vec!["rust".into()], ..Config::default() };
        config.max_stars = Some(50);
        assert!(config.validate().is_err());
        config.explore_longtail = true;
        config.validate().unwrap();
    }
}
