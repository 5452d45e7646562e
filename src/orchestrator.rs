use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::DiscoveryError;
use crate::gather;
use crate::mission::{Mission, Phase};
use crate::models::RepositoryRecord;
use crate::probe;
use crate::score::ScoreContext;
use crate::select;
use crate::state::AppState;

/// Drives a mission through `Gathering -> Probing -> Scoring -> (Refining)
/// -> Finalized`, persisting after every transition.
///
/// Each phase materializes its output locally and commits it to the mission
/// in one assignment, so a timeout or crash never leaves a half-written
/// phase: resumption reruns the interrupted phase from its start.
pub struct Orchestrator {
    state: AppState,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(state: AppState) -> Self {
        Self { state, cancel: Arc::new(AtomicBool::new(false)) }
    }

    /// Handle for cooperative cancellation. Checked at phase boundaries
    /// only; a phase in flight always completes or times out.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run a mission to completion, resuming `resume` if it names a
    /// persisted, non-finalized run.
    pub async fn run(&self, resume: Option<Uuid>) -> Result<Mission, DiscoveryError> {
        self.state.config.validate()?;

        let mut mission = match resume {
            Some(run_id) => match self.state.store.load(run_id)? {
                Some(mission) => {
                    tracing::info!(
                        "resuming mission {run_id} at phase {}",
                        mission.phase.as_str()
                    );
                    mission
                }
                None => {
                    return Err(DiscoveryError::InvalidInput(format!(
                        "no persisted mission with run id {run_id}"
                    )))
                }
            },
            None => {
                let mission = Mission::new(
                    self.state.config.goal.clone(),
                    self.state.config.topics.clone(),
                );
                tracing::info!("starting mission {}", mission.run_id);
                self.state.store.save(&mission)?;
                mission
            }
        };

        if mission.is_finalized() {
            return Ok(mission);
        }
        // A previous failed attempt leaves its error behind; this attempt
        // starts clean from the preserved cursor.
        mission.error = None;

        let budget = Duration::from_secs(self.state.config.phase_timeout_secs);
        while !mission.is_finalized() {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!(
                    "mission {} cancelled before phase {}",
                    mission.run_id,
                    mission.phase.as_str()
                );
                self.state.store.save(&mission)?;
                return Ok(mission);
            }

            let phase = mission.phase;
            tracing::info!("mission {}: phase {}", mission.run_id, phase.as_str());

            let outcome = tokio::time::timeout(budget, self.run_phase(&mut mission)).await;
            match outcome {
                Err(_) => {
                    let err = DiscoveryError::Timeout {
                        phase: phase.as_str(),
                        budget_secs: budget.as_secs(),
                        completed: phase_progress(&mission),
                    };
                    mission.error = Some(err.to_string());
                    mission.updated_at = Utc::now();
                    self.state.store.save(&mission)?;
                    return Err(err);
                }
                Ok(Err(e)) => {
                    mission.error = Some(e.to_string());
                    mission.updated_at = Utc::now();
                    self.state.store.save(&mission)?;
                    return Err(e);
                }
                Ok(Ok(())) => {
                    mission.updated_at = Utc::now();
                    self.state.store.save(&mission)?;
                }
            }
        }

        tracing::info!(
            "mission {} finalized: {} selected from {} candidates",
            mission.run_id,
            mission.metrics.selected,
            mission.metrics.candidates
        );
        Ok(mission)
    }

    async fn run_phase(&self, mission: &mut Mission) -> Result<(), DiscoveryError> {
        match mission.phase {
            Phase::Gathering => {
                let mut rx = gather::gather(
                    self.state.host.clone(),
                    self.state.cache.clone(),
                    &self.state.config,
                )?;
                let mut candidates = Vec::new();
                while let Some(record) = rx.recv().await {
                    candidates.push(record);
                }
                if candidates.is_empty() {
                    return Err(DiscoveryError::Upstream(
                        "gathering produced no candidates for any topic".to_string(),
                    ));
                }
                tracing::info!("gathered {} unique candidates", candidates.len());
                mission.metrics.candidates = candidates.len();
                mission.candidates = candidates;
                mission.phase = Phase::Probing;
            }
            Phase::Probing => {
                let probed = probe::probe(
                    self.state.host.clone(),
                    self.state.cache.clone(),
                    mission.candidates.clone(),
                    &self.state.config,
                )
                .await;
                mission.metrics.probed =
                    probed.iter().filter(|r| r.probed).count();
                mission.probed = probed;
                mission.phase = Phase::Scoring;
            }
            Phase::Scoring => {
                let mut records = mission.probed.clone();
                let goal_embedding = self.attach_embeddings(&mut records).await;

                let config = &self.state.config;
                let ctx = ScoreContext {
                    now: Utc::now(),
                    goal_embedding: goal_embedding.as_deref(),
                    weights: config.weights,
                    require_ci: config.require_ci,
                    require_tests: config.require_tests,
                };
                let selection =
                    select::select(records, &ctx, config.select_count, config.min_health);
                tracing::info!("selected {} of {} candidates", selection.len(), mission.probed.len());

                mission.metrics.selected = selection.len();
                mission.metrics.weights = Some(config.weights);
                mission.selection = selection;
                mission.phase = if self.state.refiner.is_some() {
                    Phase::Refining
                } else {
                    // No refiner configured: a normal path, not a degraded one.
                    Phase::Finalized
                };
            }
            Phase::Refining => {
                if let Some(refiner) = &self.state.refiner {
                    match refiner.refine(&mission.goal, &mission.selection).await {
                        Ok(refinement) => mission.refinement = Some(refinement),
                        // Refinement failures never fail the mission.
                        Err(e) => tracing::warn!("refinement failed, continuing: {e:#}"),
                    }
                }
                mission.phase = Phase::Finalized;
            }
            Phase::Finalized => {}
        }
        Ok(())
    }

    /// Embed candidate texts and the goal when the embedder is configured.
    /// Failures degrade to the no-embedding path (neutral relevance,
    /// tag-overlap diversity) instead of failing the phase.
    async fn attach_embeddings(&self, records: &mut [RepositoryRecord]) -> Option<Vec<f32>> {
        let embedder = self.state.embedder.as_ref()?;

        let pending: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.probed && r.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if !pending.is_empty() {
            let texts: Vec<String> = pending
                .iter()
                .map(|&i| {
                    format!(
                        "{}\n{}",
                        records[i].description.as_deref().unwrap_or_default(),
                        records[i].readme_excerpt
                    )
                })
                .collect();
            match embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    for (&i, vector) in pending.iter().zip(vectors) {
                        records[i].embedding = Some(vector);
                        if let Err(e) = self.state.cache.upsert(records[i].clone()) {
                            tracing::warn!("cache write failed for {}: {e:#}", records[i].id);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("embedding batch failed, scoring without vectors: {e:#}");
                    return None;
                }
            }
        }

        if self.state.config.goal.is_empty() {
            return None;
        }
        match embedder.embed_single(&self.state.config.goal).await {
            Ok(goal_vec) => Some(goal_vec),
            Err(e) => {
                tracing::warn!("goal embedding failed, relevance stays neutral: {e:#}");
                None
            }
        }
    }
}

/// Units of work the interrupted phase can already account for. Phase
/// outputs commit atomically, so for probing the count comes from the
/// cache-merged probe flags on the gathered candidates.
fn phase_progress(mission: &Mission) -> usize {
    match mission.phase {
        Phase::Gathering => mission.candidates.len(),
        Phase::Probing => mission.candidates.iter().filter(|r| r.probed).count(),
        Phase::Scoring => mission.probed.len(),
        Phase::Refining | Phase::Finalized => mission.selection.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RepoCache;
    use crate::config::Config;
    use crate::mission::MissionStore;
    use crate::planner::Planner;
    use crate::testing::{FakeHost, FakeSignals};

    fn test_state(dir: &std::path::Path, host: Arc<FakeHost>, config: Config) -> AppState {
        let cache = Arc::new(
            RepoCache::open_or_create(
                &dir.join("cache.json"),
                Duration::from_secs(config.cache_staleness_secs),
            )
            .unwrap(),
        );
        let planner = Arc::new(Planner::new(&config));
        let store = MissionStore::open(&dir.join("missions")).unwrap();
        AppState { config, cache, planner, host, embedder: None, refiner: None, store }
    }

    fn test_config() -> Config {
        Config {
            topics: vec!["vector-database".to_string()],
            goal: "find storage gems".to_string(),
            per_page: 10,
            probe_workers: 2,
            select_count: 2,
            author_signal: false,
            phase_timeout_secs: 30,
            ..Config::default()
        }
    }

    fn seeded_host() -> Arc<FakeHost> {
        let host = FakeHost::default();
        host.add_repo("alpha/db", 120);
        host.add_repo("beta/store", 40);
        host.add_repo("gamma/index", 5);
        for name in ["alpha/db", "beta/store", "gamma/index"] {
            host.set_signals(
                name,
                FakeSignals { has_ci: true, has_tests: true, ..FakeSignals::default() },
            );
        }
        Arc::new(host)
    }

    #[tokio::test]
    async fn test_full_run_finalizes_without_refiner() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(test_state(dir.path(), seeded_host(), test_config()));

        let mission = orch.run(None).await.unwrap();
        assert!(mission.is_finalized());
        assert_eq!(mission.selection.len(), 2);
        assert!(mission.refinement.is_none());
        assert_eq!(mission.metrics.candidates, 3);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_any_network() {
        let dir = tempfile::tempdir().unwrap();
        let host = seeded_host();
        let mut config = test_config();
        config.weights.novelty = 0.9; // breaks the sum
        let orch = Orchestrator::new(test_state(dir.path(), host.clone(), config));

        let err = orch.run(None).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Configuration(_)));
        assert_eq!(host.search_call_count(), 0);
        assert_eq!(host.probe_call_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_unknown_run_id_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(test_state(dir.path(), seeded_host(), test_config()));
        let err = orch.run(Some(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidInput(_)));
    }

    #[test]
    fn test_phase_progress_counts_the_interrupted_phase() {
        let mut mission = Mission::new("goal", vec!["t".to_string()]);
        let mut probed = crate::models::RepositoryRecord::from_listing(
            crate::models::RepoId::new("a/b"),
            "https://x/a/b",
        );
        probed.probed = true;
        let unprobed = crate::models::RepositoryRecord::from_listing(
            crate::models::RepoId::new("c/d"),
            "https://x/c/d",
        );
        mission.candidates = vec![probed.clone(), unprobed];

        mission.phase = Phase::Gathering;
        assert_eq!(phase_progress(&mission), 2);

        // A probing timeout reports probes already resolved, not the number
        // of candidates waiting.
        mission.phase = Phase::Probing;
        assert_eq!(phase_progress(&mission), 1);

        mission.probed = vec![probed];
        mission.phase = Phase::Scoring;
        assert_eq!(phase_progress(&mission), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_phase_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(test_state(dir.path(), seeded_host(), test_config()));
        orch.cancel_flag().store(true, Ordering::Relaxed);

        let mission = orch.run(None).await.unwrap();
        // Nothing ran, nothing was lost.
        assert_eq!(mission.phase, Phase::Gathering);
        assert!(mission.candidates.is_empty());
    }
}
