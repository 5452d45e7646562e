use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::RepoCache;
use crate::config::Config;
use crate::error::DiscoveryError;
use crate::github::RepoHost;
use crate::models::{RepoId, RepositoryRecord};

/// Search results are capped by the service at 1000 per query.
const MAX_PAGES: u32 = 10;

/// Build the search query for one topic.
///
/// Uses an activity cutoff (`pushed:>`) rather than creation date, phrase
/// quoting for multi-word topics, and a `has:license` qualifier. Long-tail
/// mode swaps popularity for a star ceiling plus freshness qualifiers.
pub fn build_query(topic: &str, days: u32, explore_longtail: bool, max_stars: Option<u64>) -> String {
    let cutoff = (Utc::now() - ChronoDuration::days(days as i64))
        .date_naive()
        .to_string();
    let topic_term = if topic.contains(' ') {
        format!("\"{topic}\"")
    } else {
        topic.to_string()
    };
    let base = format!("pushed:>{cutoff} {topic_term} in:name,description,readme");

    if explore_longtail {
        let cap = max_stars.unwrap_or(20);
        format!("{base} stars:<{cap} forks:<2 fork:false archived:false has:license")
    } else {
        format!("{base} has:license")
    }
}

/// Gather candidates for all topics concurrently.
///
/// Returns a finite, consume-once stream of deduplicated records. Topics are
/// paged independently; within one topic the service's relevance order is
/// preserved, across topics the interleaving is unspecified. The first
/// occurrence of an identity wins. Fresh cache entries contribute their
/// probed signals so the prober can skip those identities entirely.
pub fn gather(
    host: Arc<dyn RepoHost>,
    cache: Arc<RepoCache>,
    config: &Config,
) -> Result<mpsc::Receiver<RepositoryRecord>, DiscoveryError> {
    if config.topics.is_empty() {
        return Err(DiscoveryError::InvalidInput("topic set is empty".to_string()));
    }

    let (tx, rx) = mpsc::channel(config.per_page.max(1));
    let seen: Arc<parking_lot::Mutex<HashSet<RepoId>>> = Arc::default();
    let emitted = Arc::new(AtomicUsize::new(0));

    for topic in &config.topics {
        let query = build_query(topic, config.days, config.explore_longtail, config.max_stars);
        let task = TopicGather {
            host: host.clone(),
            cache: cache.clone(),
            tx: tx.clone(),
            seen: seen.clone(),
            emitted: emitted.clone(),
            licenses: config.licenses.clone(),
            per_page: config.per_page,
            max_candidates: config.max_candidates,
            topic: topic.clone(),
            query,
        };
        tokio::spawn(task.run());
    }
    // The receiver closes once every topic task finishes.
    drop(tx);

    Ok(rx)
}

struct TopicGather {
    host: Arc<dyn RepoHost>,
    cache: Arc<RepoCache>,
    tx: mpsc::Sender<RepositoryRecord>,
    seen: Arc<parking_lot::Mutex<HashSet<RepoId>>>,
    emitted: Arc<AtomicUsize>,
    licenses: Vec<String>,
    per_page: usize,
    max_candidates: usize,
    topic: String,
    query: String,
}

impl TopicGather {
    async fn run(self) {
        for page in 1..=MAX_PAGES {
            if self.emitted.load(Ordering::Relaxed) >= self.max_candidates {
                return;
            }

            let records = match self.host.search_page(&self.query, page, self.per_page).await {
                Ok(records) => records,
                Err(e) if page == 1 => {
                    // A topic whose very first page fails yields nothing;
                    // that is terminal for the topic, not for the run.
                    tracing::error!("topic '{}' failed on first page: {e:#}", self.topic);
                    return;
                }
                Err(e) => {
                    tracing::warn!("topic '{}' page {page} failed, skipping: {e:#}", self.topic);
                    continue;
                }
            };
            let exhausted = records.len() < self.per_page;

            for record in records {
                if !self.seen.lock().insert(record.id.clone()) {
                    continue;
                }
                if !license_allowed(&self.licenses, record.license.as_deref()) {
                    continue;
                }

                let record = match self.cache.get_fresh(&record.id) {
                    Some(cached) => merge_cached_signals(record, cached),
                    None => record,
                };

                // Claim a slot atomically: a load-then-add pair would let
                // concurrent topic tasks overshoot the cap together.
                let claim = self.emitted.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    (n < self.max_candidates).then_some(n + 1)
                });
                if claim.is_err() {
                    return;
                }
                if self.tx.send(record).await.is_err() {
                    // Consumer hung up; nothing left to do.
                    return;
                }
            }

            if exhausted {
                return;
            }
        }
    }
}

fn license_allowed(allowed: &[String], license: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match license {
        Some(l) => allowed.iter().any(|a| a == l),
        None => false,
    }
}

/// Keep the fresh listing's first-pass metadata but adopt the cached entry's
/// probed signals, so a fresh cache hit needs no secondary fetches.
fn merge_cached_signals(
    listing: RepositoryRecord,
    cached: RepositoryRecord,
) -> RepositoryRecord {
    RepositoryRecord {
        has_ci: cached.has_ci,
        has_tests: cached.has_tests,
        has_manifest: cached.has_manifest,
        latest_release_age_days: cached.latest_release_age_days,
        readme_excerpt: cached.readme_excerpt,
        concepts: cached.concepts,
        owner_followers: cached.owner_followers,
        embedding: cached.embedding,
        probed: cached.probed,
        partial_probe: cached.partial_probe,
        ..listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use std::time::Duration;

    fn test_config(topics: &[&str]) -> Config {
        Config {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            licenses: Vec::new(),
            per_page: 2,
            max_candidates: 100,
            ..Config::default()
        }
    }

    fn open_cache(dir: &std::path::Path) -> Arc<RepoCache> {
        Arc::new(
            RepoCache::open_or_create(&dir.join("cache.json"), Duration::from_secs(3600)).unwrap(),
        )
    }

    async fn collect(mut rx: mpsc::Receiver<RepositoryRecord>) -> Vec<RepositoryRecord> {
        let mut out = Vec::new();
        while let Some(r) = rx.recv().await {
            out.push(r);
        }
        out
    }

    #[test]
    fn test_build_query_quotes_multiword_topics() {
        let q = build_query("vector database", 30, false, None);
        assert!(q.contains("\"vector database\""));
        assert!(q.contains("pushed:>"));
        assert!(q.contains("has:license"));
    }

    #[test]
    fn test_build_query_longtail_adds_star_ceiling() {
        let q = build_query("rust", 30, true, Some(50));
        assert!(q.contains("stars:<50"));
        assert!(q.contains("archived:false"));
    }

    #[tokio::test]
    async fn test_empty_topics_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let host: Arc<dyn RepoHost> = Arc::new(FakeHost::default());
        let err = gather(host, open_cache(dir.path()), &test_config(&[])).unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_dedup_across_topics_first_occurrence_wins() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::default();
        host.add_repo("shared/repo", 10);
        host.add_repo("only/first", 5);
        // Both topic queries return every repo in the fake catalog, so
        // shared/repo is mentioned by both.
        let host: Arc<dyn RepoHost> = Arc::new(host);

        let rx = gather(host, open_cache(dir.path()), &test_config(&["a", "b"])).unwrap();
        let records = collect(rx).await;

        let shared = records.iter().filter(|r| r.id.as_str() == "shared/repo").count();
        assert_eq!(shared, 1, "identity must appear exactly once");
    }

    #[tokio::test]
    async fn test_max_candidates_caps_output() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::default();
        for i in 0..20 {
            host.add_repo(&format!("owner/repo{i}"), i);
        }
        let host: Arc<dyn RepoHost> = Arc::new(host);

        let mut config = test_config(&["a"]);
        config.max_candidates = 5;
        let rx = gather(host, open_cache(dir.path()), &config).unwrap();
        assert_eq!(collect(rx).await.len(), 5);
    }

    #[tokio::test]
    async fn test_max_candidates_caps_output_across_concurrent_topics() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::default();
        for i in 0..12 {
            host.add_repo(&format!("owner/repo{i}"), i);
        }
        let host: Arc<dyn RepoHost> = Arc::new(host);

        // Several topic tasks race for the remaining slots; the cap must
        // hold exactly, never within topics.len() - 1 of it.
        let mut config = test_config(&["a", "b", "c", "d"]);
        config.max_candidates = 7;
        let rx = gather(host, open_cache(dir.path()), &config).unwrap();
        assert_eq!(collect(rx).await.len(), 7);
    }

    #[tokio::test]
    async fn test_fresh_cache_entry_contributes_probed_signals() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path());
        let host = FakeHost::default();
        host.add_repo("a/b", 3);

        let mut cached = RepositoryRecord::from_listing(RepoId::new("a/b"), "https://x/a/b");
        cached.has_ci = true;
        cached.readme_excerpt = "cached readme".to_string();
        cached.probed = true;
        cache.upsert(cached).unwrap();

        let host: Arc<dyn RepoHost> = Arc::new(host);
        let rx = gather(host, cache, &test_config(&["a"])).unwrap();
        let records = collect(rx).await;

        let rec = records.iter().find(|r| r.id.as_str() == "a/b").unwrap();
        assert!(rec.probed);
        assert!(rec.has_ci);
        assert_eq!(rec.readme_excerpt, "cached readme");
        // First-pass metadata still comes from the live listing.
        assert_eq!(rec.stars, 3);
    }

    #[tokio::test]
    async fn test_license_filter_drops_unlisted() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::default();
        host.add_repo_with_license("mit/repo", 1, Some("MIT"));
        host.add_repo_with_license("gpl/repo", 1, Some("GPL-3.0"));
        host.add_repo_with_license("none/repo", 1, None);
        let host: Arc<dyn RepoHost> = Arc::new(host);

        let mut config = test_config(&["a"]);
        config.licenses = vec!["MIT".to_string()];
        let rx = gather(host, open_cache(dir.path()), &config).unwrap();
        let records = collect(rx).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_str(), "mit/repo");
    }
}
