use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::RepoCache;
use crate::config::Config;
use crate::github::RepoHost;
use crate::models::RepositoryRecord;

/// English plus a handful of romance-language stopwords that show up in
/// README prose.
const STOPWORDS: &str = "a an and are as at be by for from has have in is it its of on or that \
    the to with you your we i our this these those via into over under using use used new fast \
    real il lo la gli le un una uno che di da con su per tra fra e o ma se non piu come";

/// Deep-probe the top `probe_limit` candidates.
///
/// Candidates already carrying fresh probed signals (cache hits from the
/// gather phase) are skipped entirely. The rest are probed by a bounded
/// worker pool; each enriched record is written back to the cache with a
/// fresh timestamp. A candidate whose probe partially fails keeps whatever
/// signals were obtained and is flagged, never dropped.
pub async fn probe(
    host: Arc<dyn RepoHost>,
    cache: Arc<RepoCache>,
    mut records: Vec<RepositoryRecord>,
    config: &Config,
) -> Vec<RepositoryRecord> {
    let limit = config.probe_limit.min(records.len());
    let semaphore = Arc::new(Semaphore::new(config.probe_workers));
    let mut tasks: JoinSet<(usize, RepositoryRecord)> = JoinSet::new();

    for (idx, record) in records.iter().enumerate().take(limit) {
        if record.probed {
            tracing::debug!("{}: probed signals served from cache", record.id);
            continue;
        }
        let host = host.clone();
        let semaphore = semaphore.clone();
        let record = record.clone();
        let author_signal = config.author_signal;
        let readme_chars = config.readme_max_chars;

        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                // Semaphore closed means the pool is shutting down; return
                // the record untouched.
                Err(_) => return (idx, record),
            };
            let probed = probe_one(host.as_ref(), record, author_signal, readme_chars).await;
            (idx, probed)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let Ok((idx, record)) = joined else { continue };
        if let Err(e) = cache.upsert(record.clone()) {
            tracing::warn!("cache write failed for {}: {e:#}", record.id);
        }
        records[idx] = record;
    }

    records
}

/// Fetch all secondary signals for one candidate. Individual failures set
/// the partial-probe flag and leave that signal at its default.
async fn probe_one(
    host: &dyn RepoHost,
    mut record: RepositoryRecord,
    author_signal: bool,
    readme_chars: usize,
) -> RepositoryRecord {
    let id = record.id.clone();
    let mut partial = false;

    match host.fetch_readme(&id, readme_chars).await {
        Ok(readme) => record.readme_excerpt = readme,
        Err(e) => {
            tracing::warn!("{id}: README fetch failed: {e:#}");
            partial = true;
        }
    }
    match host.has_ci(&id).await {
        Ok(ci) => record.has_ci = ci,
        Err(e) => {
            tracing::warn!("{id}: CI check failed: {e:#}");
            partial = true;
        }
    }
    match host.has_tests(&id).await {
        Ok(tests) => record.has_tests = tests,
        Err(e) => {
            tracing::warn!("{id}: test check failed: {e:#}");
            partial = true;
        }
    }
    match host.has_manifest(&id).await {
        Ok(manifest) => record.has_manifest = manifest,
        Err(e) => {
            tracing::warn!("{id}: manifest check failed: {e:#}");
            partial = true;
        }
    }
    match host.latest_release_age_days(&id).await {
        Ok(age) => record.latest_release_age_days = age,
        Err(e) => {
            tracing::warn!("{id}: release check failed: {e:#}");
            partial = true;
        }
    }
    if author_signal {
        match host.owner_followers(id.owner()).await {
            Ok(followers) => record.owner_followers = Some(followers),
            Err(e) => {
                tracing::warn!("{id}: follower fetch failed: {e:#}");
                partial = true;
            }
        }
    }

    let text = format!(
        "{}\n{}",
        record.description.as_deref().unwrap_or_default(),
        record.readme_excerpt
    );
    record.concepts = extract_concepts(&text, 8);
    record.probed = true;
    record.partial_probe = partial;
    record.fetched_at = Utc::now();
    record
}

/// Lightweight keyword extraction over description + README: stopword-filtered
/// unigrams and bigrams that occur at least twice, bigrams weighted 1.5x.
pub fn extract_concepts(text: &str, topk: usize) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '+' | '#' | '.' | '/') {
                c
            } else {
                ' '
            }
        })
        .collect();

    let stop: std::collections::HashSet<&str> = STOPWORDS.split_whitespace().collect();
    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| !stop.contains(t) && !t.chars().all(|c| c.is_ascii_digit()))
        .collect();

    let mut unigrams: HashMap<&str, u32> = HashMap::new();
    for t in &tokens {
        *unigrams.entry(t).or_insert(0) += 1;
    }
    let mut bigrams: HashMap<(&str, &str), u32> = HashMap::new();
    for pair in tokens.windows(2) {
        *bigrams.entry((pair[0], pair[1])).or_insert(0) += 1;
    }

    let mut phrases: Vec<(String, f64)> = bigrams
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .map(|((a, b), n)| (format!("{a} {b}"), n as f64 * 1.5))
        .chain(
            unigrams
                .into_iter()
                .filter(|(_, n)| *n >= 2)
                .map(|(t, n)| (t.to_string(), n as f64)),
        )
        .collect();
    // Secondary lexicographic key keeps extraction deterministic.
    phrases.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut out: Vec<String> = Vec::new();
    for (phrase, _) in phrases {
        if out.len() >= topk {
            break;
        }
        let capped: String = phrase.chars().take(40).collect();
        if !out.contains(&capped) {
            out.push(capped);
        }
    }
    out
}
