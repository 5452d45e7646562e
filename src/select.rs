use crate::models::{RepositoryRecord, ScoredRepo};
use crate::score::{self, ScoreContext};

/// Greedy diversified top-N selection.
///
/// Each iteration re-scores every remaining candidate against the current
/// selection (the diversity penalty depends on prior picks) and takes the
/// best. Deliberately O(n x m) instead of a one-shot sort: a global sort
/// would let near-duplicate concepts crowd the result.
///
/// Ties on composite score break by stars, then identity, so repeated runs
/// over identical input produce byte-identical output.
pub fn select(
    candidates: Vec<RepositoryRecord>,
    ctx: &ScoreContext<'_>,
    n: usize,
    min_health: f64,
) -> Vec<ScoredRepo> {
    let mut pool: Vec<RepositoryRecord> = candidates
        .into_iter()
        .filter(|r| score::health(r, ctx.require_ci, ctx.require_tests) >= min_health)
        .collect();

    let mut selected: Vec<ScoredRepo> = Vec::with_capacity(n.min(pool.len()));

    while selected.len() < n && !pool.is_empty() {
        let selected_records: Vec<&RepositoryRecord> =
            selected.iter().map(|s| &s.record).collect();

        let mut best_idx = 0;
        let mut best_score = score::score(&pool[0], &selected_records, ctx);
        for (idx, record) in pool.iter().enumerate().skip(1) {
            let scores = score::score(record, &selected_records, ctx);
            if beats(record, &scores, &pool[best_idx], &best_score) {
                best_idx = idx;
                best_score = scores;
            }
        }

        let record = pool.swap_remove(best_idx);
        selected.push(ScoredRepo { record, scores: best_score });
    }

    selected
}

fn beats(
    record: &RepositoryRecord,
    scores: &crate::models::ScoreSet,
    best_record: &RepositoryRecord,
    best_scores: &crate::models::ScoreSet,
) -> bool {
    match scores.composite.total_cmp(&best_scores.composite) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => match record.stars.cmp(&best_record.stars) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            // Final deterministic tiebreak on identity.
            std::cmp::Ordering::Equal => record.id < best_record.id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Weights;
    use crate::models::RepoId;
    use chrono::{Duration, Utc};

    fn record(name: &str, stars: u64) -> RepositoryRecord {
        let mut r = RepositoryRecord::from_listing(RepoId::new(name), format!("https://x/{name}"));
        r.stars = stars;
        r.pushed_at = Some(Utc::now() - Duration::days(5));
        r.created_at = Some(Utc::now() - Duration::days(100));
        r
    }

    fn ctx() -> ScoreContext<'static> {
        ScoreContext {
            now: Utc::now(),
            goal_embedding: None,
            weights: Weights::default(),
            require_ci: false,
            require_tests: false,
        }
    }

    #[test]
    fn test_selects_at_most_n() {
        let candidates = vec![record("a/1", 1), record("a/2", 2), record("a/3", 3)];
        let picked = select(candidates, &ctx(), 2, 0.0);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_equal_scores_tiebreak_on_stars() {
        // Both star velocities saturate tanh, so the composites are equal
        // and the raw star count decides.
        let low = record("z/low", 1_000_000);
        let high = record("a/high", 2_000_000);
        let picked = select(vec![low, high], &ctx(), 1, 0.0);
        assert_eq!(picked[0].record.id.as_str(), "a/high");
    }

    #[test]
    fn test_equal_scores_and_stars_tiebreak_on_identity() {
        let a = record("b/second", 100);
        let b = record("a/first", 100);
        let picked = select(vec![a, b], &ctx(), 2, 0.0);
        assert_eq!(picked[0].record.id.as_str(), "a/first");
        assert_eq!(picked[1].record.id.as_str(), "b/second");
    }

    #[test]
    fn test_identical_candidates_select_exactly_one() {
        // Two candidates with identical concept tags and identical raw
        // scores, selection size 1: exactly one is chosen.
        let mut a = record("x/a", 50);
        a.concepts = vec!["vector".into(), "db".into()];
        let mut b = record("x/b", 50);
        b.concepts = vec!["vector".into(), "db".into()];

        let picked = select(vec![a, b], &ctx(), 1, 0.0);
        assert_eq!(picked.len(), 1);
        // First pick carries no diversity penalty.
        assert_eq!(picked[0].scores.diversity_penalty, 0.0);
    }

    #[test]
    fn test_diversity_prefers_non_duplicate_second_pick() {
        let weights =
            Weights { novelty: 0.1, health: 0.1, relevance: 0.1, author: 0.05, diversity: 0.65 };
        let ctx = ScoreContext {
            now: Utc::now(),
            goal_embedding: None,
            weights,
            require_ci: false,
            require_tests: false,
        };

        let mut first = record("a/first", 300);
        first.concepts = vec!["vector".into(), "database".into()];
        first.has_ci = true;
        let mut twin = record("a/twin", 200);
        twin.concepts = vec!["vector".into(), "database".into()];
        twin.has_ci = true;
        let mut other = record("a/other", 100);
        other.concepts = vec!["game".into(), "engine".into()];
        other.has_ci = true;

        let picked = select(vec![first, twin, other], &ctx, 2, 0.0);
        assert_eq!(picked[0].record.id.as_str(), "a/first");
        assert_eq!(
            picked[1].record.id.as_str(),
            "a/other",
            "near-duplicate must not crowd the result"
        );
        assert!(picked[1].scores.diversity_penalty < 1.0);
    }

    #[test]
    fn test_min_health_floor_drops_candidates() {
        let healthy = {
            let mut r = record("a/healthy", 10);
            r.has_ci = true;
            r.has_tests = true;
            r
        };
        let sickly = record("a/sickly", 1_000);

        let picked = select(vec![healthy, sickly], &ctx(), 5, 0.4);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].record.id.as_str(), "a/healthy");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let make = || {
            vec![
                record("a/one", 10),
                record("a/two", 10),
                record("a/three", 99),
                record("b/four", 5),
            ]
        };
        let shared = ctx();
        let first = select(make(), &shared, 3, 0.0);
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = select(make(), &shared, 3, 0.0);

        let ids: Vec<&str> = first.iter().map(|s| s.record.id.as_str()).collect();
        let ids2: Vec<&str> = second.iter().map(|s| s.record.id.as_str()).collect();
        assert_eq!(ids, ids2);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.scores.composite.to_bits(), b.scores.composite.to_bits());
        }
    }
}
