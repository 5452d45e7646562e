use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository identity: the `owner/name` full name.
///
/// This is the only key used for cache lookups and deduplication across a
/// run, so it is kept as an opaque newtype rather than a free string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(pub String);

impl RepoId {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self(full_name.into())
    }

    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(o, _)| o).unwrap_or(&self.0)
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything we know about a candidate repository.
///
/// First-pass fields come from the search listing; derived signals are filled
/// in by the deep probe. Probed-only signals default to their worst case so
/// unprobed candidates stay comparable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: RepoId,
    pub url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    /// SPDX license id, if the listing carried one.
    pub license: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub is_fork: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,

    // Derived signals (deep probe)
    #[serde(default)]
    pub has_ci: bool,
    #[serde(default)]
    pub has_tests: bool,
    #[serde(default)]
    pub has_manifest: bool,
    /// Age of the most recent release at probe time, in days.
    #[serde(default)]
    pub latest_release_age_days: Option<f64>,
    #[serde(default)]
    pub readme_excerpt: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    /// Owner followers, fetched only when the author signal is enabled.
    #[serde(default)]
    pub owner_followers: Option<u64>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,

    /// Whether the deep probe ran for this record.
    #[serde(default)]
    pub probed: bool,
    /// Set when the probe completed with one or more signals missing.
    #[serde(default)]
    pub partial_probe: bool,

    pub fetched_at: DateTime<Utc>,
}

impl RepositoryRecord {
    /// A minimal record as produced by a search listing.
    pub fn from_listing(id: RepoId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            description: None,
            language: None,
            license: None,
            stars: 0,
            forks: 0,
            is_fork: false,
            created_at: None,
            pushed_at: None,
            has_ci: false,
            has_tests: false,
            has_manifest: false,
            latest_release_age_days: None,
            readme_excerpt: String::new(),
            concepts: Vec::new(),
            owner_followers: None,
            embedding: None,
            probed: false,
            partial_probe: false,
            fetched_at: Utc::now(),
        }
    }
}

/// The sub-scores and composite "gem score" for one candidate.
///
/// All fields lie in [0,1]; composite is a pure function of the sub-scores,
/// the diversity penalty and the configured weights.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreSet {
    pub novelty: f64,
    pub health: f64,
    pub relevance: f64,
    pub author_rep: f64,
    pub diversity_penalty: f64,
    pub composite: f64,
}

/// A candidate together with its score, as emitted by the selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRepo {
    pub record: RepositoryRecord,
    pub scores: ScoreSet,
}
