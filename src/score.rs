use chrono::{DateTime, Utc};

use crate::config::Weights;
use crate::models::{RepositoryRecord, ScoreSet};

/// Inputs shared by every scoring call in a run, including a single clock
/// snapshot so every candidate in the run ages against the same instant.
pub struct ScoreContext<'a> {
    pub now: DateTime<Utc>,
    pub goal_embedding: Option<&'a [f32]>,
    pub weights: Weights,
    pub require_ci: bool,
    pub require_tests: bool,
}

/// Compute the full score set for one candidate against the current
/// selection. Pure: identical inputs always produce identical output.
pub fn score(
    record: &RepositoryRecord,
    selected: &[&RepositoryRecord],
    ctx: &ScoreContext<'_>,
) -> ScoreSet {
    let novelty = novelty(record, ctx.now);
    let health = health(record, ctx.require_ci, ctx.require_tests);
    let relevance = relevance(record, ctx.goal_embedding);
    let author_rep = author_reputation(record);
    let diversity_penalty = diversity_penalty(record, selected);

    let w = &ctx.weights;
    let composite = (w.novelty * novelty
        + w.health * health
        + w.relevance * relevance
        + w.author * author_rep
        - w.diversity * diversity_penalty)
        .clamp(0.0, 1.0);

    ScoreSet { novelty, health, relevance, author_rep, diversity_penalty, composite }
}

/// Star velocity, push recency and fork count, with a flat penalty for
/// forks. Monotonically decreasing with staleness.
pub fn novelty(record: &RepositoryRecord, now: DateTime<Utc>) -> f64 {
    let created_days = age_days(record.created_at, now);
    let pushed_days = age_days(record.pushed_at, now);

    let velocity = ((record.stars as f64 / created_days.max(1e-6)) / 50.0).tanh();
    let freshness = 1.0 / (1.0 + pushed_days);
    let forks = (record.forks as f64 / 50.0).tanh();
    let fork_penalty = if record.is_fork { 0.2 } else { 0.0 };

    (0.55 * velocity + 0.40 * freshness + 0.05 * forks - fork_penalty).clamp(0.0, 1.0)
}

fn age_days(ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match ts {
        Some(ts) => ((now - ts).num_seconds() as f64 / 86_400.0).max(1e-6),
        // Unknown age reads as a decade old.
        None => 3_650.0,
    }
}

/// Equal quarters for CI, tests, manifest, and release recency. Missing
/// signals contribute zero rather than shrinking the denominator, so health
/// is comparable across candidates with different amounts of signal.
pub fn health(record: &RepositoryRecord, require_ci: bool, require_tests: bool) -> f64 {
    if (require_ci && !record.has_ci) || (require_tests && !record.has_tests) {
        return 0.0;
    }
    let release = match record.latest_release_age_days {
        Some(age) => 1.0 / (1.0 + age.max(0.0) / 90.0),
        None => 0.0,
    };
    0.25 * f64::from(record.has_ci as u8)
        + 0.25 * f64::from(record.has_tests as u8)
        + 0.25 * f64::from(record.has_manifest as u8)
        + 0.25 * release
}

/// Cosine similarity to the goal, rescaled from [-1,1] to [0,1]. Missing
/// embeddings on either side yield the neutral midpoint, never zero, so a
/// record is not penalized for absent optional data.
pub fn relevance(record: &RepositoryRecord, goal_embedding: Option<&[f32]>) -> f64 {
    match (record.embedding.as_deref(), goal_embedding) {
        (Some(vec), Some(goal)) => {
            let cos = cosine_similarity(vec, goal) as f64;
            ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
        }
        _ => 0.5,
    }
}

/// Log-scaled follower count, clamped so outlier accounts cannot dominate.
pub fn author_reputation(record: &RepositoryRecord) -> f64 {
    match record.owner_followers {
        Some(followers) => (((followers + 1) as f64).log10() / 3.0).clamp(0.0, 1.0),
        None => 0.0,
    }
}

/// Maximum similarity to any already-selected candidate: 0 with an empty
/// selection, approaching 1 for near-duplicate concepts. Embedding cosine
/// when both sides have vectors, concept-tag overlap otherwise.
pub fn diversity_penalty(record: &RepositoryRecord, selected: &[&RepositoryRecord]) -> f64 {
    selected
        .iter()
        .map(|other| pair_similarity(record, other))
        .fold(0.0, f64::max)
}

fn pair_similarity(a: &RepositoryRecord, b: &RepositoryRecord) -> f64 {
    match (a.embedding.as_deref(), b.embedding.as_deref()) {
        (Some(va), Some(vb)) => (cosine_similarity(va, vb) as f64).clamp(0.0, 1.0),
        _ => tag_overlap(&a.concepts, &b.concepts),
    }
}

/// Jaccard overlap of concept-tag sets.
fn tag_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::HashSet<&String> = a.iter().collect();
    let set_b: std::collections::HashSet<&String> = b.iter().collect();
    let inter = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    inter / union
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RepoId;
    use chrono::Duration;

    fn record(name: &str) -> RepositoryRecord {
        RepositoryRecord::from_listing(RepoId::new(name), format!("https://x/{name}"))
    }

    fn ctx(weights: Weights) -> ScoreContext<'static> {
        ScoreContext {
            now: Utc::now(),
            goal_embedding: None,
            weights,
            require_ci: false,
            require_tests: false,
        }
    }

    #[test]
    fn test_all_scores_within_unit_interval() {
        let mut r = record("a/b");
        r.stars = 1_000_000;
        r.forks = 1_000_000;
        r.created_at = Some(Utc::now() - Duration::days(1));
        r.pushed_at = Some(Utc::now());
        r.has_ci = true;
        r.has_tests = true;
        r.has_manifest = true;
        r.latest_release_age_days = Some(0.0);
        r.owner_followers = Some(u64::MAX);

        let s = score(&r, &[], &ctx(Weights::default()));
        for v in [s.novelty, s.health, s.relevance, s.author_rep, s.diversity_penalty, s.composite]
        {
            assert!((0.0..=1.0).contains(&v), "score {v} out of range");
        }
    }

    #[test]
    fn test_score_is_reproducible_for_identical_inputs() {
        let mut r = record("a/b");
        r.stars = 250;
        r.created_at = Some(Utc::now() - Duration::days(30));
        r.pushed_at = Some(Utc::now() - Duration::days(2));
        let ctx = ctx(Weights::default());

        let first = score(&r, &[], &ctx);
        // Wall-clock time advances between the calls; the context's snapshot
        // must keep the result bit-identical.
        std::thread::sleep(std::time::Duration::from_millis(15));
        let second = score(&r, &[], &ctx);

        assert_eq!(first.composite.to_bits(), second.composite.to_bits());
        assert_eq!(first.novelty.to_bits(), second.novelty.to_bits());
    }

    #[test]
    fn test_novelty_decreases_with_staleness() {
        let now = Utc::now();
        let mut fresh = record("a/fresh");
        fresh.created_at = Some(now - Duration::days(10));
        fresh.pushed_at = Some(now - Duration::days(1));
        fresh.stars = 100;

        let mut stale = fresh.clone();
        stale.pushed_at = Some(now - Duration::days(300));

        assert!(novelty(&fresh, now) > novelty(&stale, now));
    }

    #[test]
    fn test_fork_penalty_applies() {
        let now = Utc::now();
        let mut original = record("a/b");
        original.pushed_at = Some(now - Duration::days(5));
        let mut fork = original.clone();
        fork.is_fork = true;
        assert!(novelty(&fork, now) < novelty(&original, now));
    }

    #[test]
    fn test_health_missing_signals_score_zero_not_null() {
        let unprobed = record("a/b");
        assert_eq!(health(&unprobed, false, false), 0.0);

        let mut half = record("a/c");
        half.has_ci = true;
        half.has_tests = true;
        assert_eq!(health(&half, false, false), 0.5);
    }

    #[test]
    fn test_health_release_recency_decays() {
        let mut recent = record("a/b");
        recent.latest_release_age_days = Some(0.0);
        let mut old = record("a/c");
        old.latest_release_age_days = Some(900.0);
        assert!(health(&recent, false, false) > health(&old, false, false));
        assert!(health(&old, false, false) > 0.0);
    }

    #[test]
    fn test_health_require_flags_zero_out() {
        let mut r = record("a/b");
        r.has_tests = true;
        r.has_manifest = true;
        assert_eq!(health(&r, true, false), 0.0);
        assert!(health(&r, false, false) > 0.0);
    }

    #[test]
    fn test_relevance_neutral_without_embeddings() {
        let r = record("a/b");
        assert_eq!(relevance(&r, None), 0.5);

        let goal = vec![1.0, 0.0];
        assert_eq!(relevance(&r, Some(&goal)), 0.5);
    }

    #[test]
    fn test_relevance_rescaled_to_unit_interval() {
        let mut r = record("a/b");
        r.embedding = Some(vec![1.0, 0.0]);
        let opposite = vec![-1.0, 0.0];
        // Opposite vectors: cosine -1 maps to 0, not below.
        assert_eq!(relevance(&r, Some(&opposite)), 0.0);
        let same = vec![1.0, 0.0];
        assert_eq!(relevance(&r, Some(&same)), 1.0);
    }

    #[test]
    fn test_author_reputation_log_scaled() {
        let mut nobody = record("a/b");
        nobody.owner_followers = Some(0);
        assert_eq!(author_reputation(&nobody), 0.0);

        let mut famous = record("a/c");
        famous.owner_followers = Some(10_000_000);
        assert_eq!(author_reputation(&famous), 1.0);

        let mut middling = record("a/d");
        middling.owner_followers = Some(99);
        let rep = author_reputation(&middling);
        assert!(rep > 0.5 && rep < 0.7, "rep {rep}");
    }

    #[test]
    fn test_diversity_zero_for_empty_selection() {
        let r = record("a/b");
        assert_eq!(diversity_penalty(&r, &[]), 0.0);
    }

    #[test]
    fn test_diversity_max_over_selected_tag_overlap() {
        let mut cand = record("a/b");
        cand.concepts = vec!["vector".into(), "database".into()];

        let mut twin = record("a/twin");
        twin.concepts = vec!["vector".into(), "database".into()];
        let mut unrelated = record("a/other");
        unrelated.concepts = vec!["game".into(), "engine".into()];

        let penalty = diversity_penalty(&cand, &[&unrelated, &twin]);
        assert_eq!(penalty, 1.0, "near-duplicate must dominate");
    }

    #[test]
    fn test_composite_is_clamped() {
        // Heavy diversity weight can push the raw sum negative.
        let weights =
            Weights { novelty: 0.0, health: 0.0, relevance: 0.1, author: 0.0, diversity: 0.9 };
        let mut cand = record("a/b");
        cand.concepts = vec!["x".into()];
        let mut twin = record("a/twin");
        twin.concepts = vec!["x".into()];

        let s = score(&cand, &[&twin], &ctx(weights));
        assert_eq!(s.diversity_penalty, 1.0);
        assert!(s.composite >= 0.0);
    }
}
