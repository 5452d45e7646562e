use std::sync::Arc;

use crate::cache::RepoCache;
use crate::config::Config;
use crate::embed::{Embedder, HttpEmbedder};
use crate::github::{GithubClient, RepoHost};
use crate::mission::MissionStore;
use crate::planner::Planner;
use crate::refine::{HttpRefiner, Refiner};

/// Everything a mission run needs, wired once at startup.
///
/// The embedding and refinement collaborators are capability-gated: when a
/// flag is off the corresponding handle is simply absent, and the pipeline
/// takes its documented fallback path.
pub struct AppState {
    pub config: Config,
    pub cache: Arc<RepoCache>,
    pub planner: Arc<Planner>,
    pub host: Arc<dyn RepoHost>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub refiner: Option<Arc<dyn Refiner>>,
    pub store: MissionStore,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        let cache = Arc::new(RepoCache::open_or_create(
            &config.cache_path(),
            std::time::Duration::from_secs(config.cache_staleness_secs),
        )?);
        let planner = Arc::new(Planner::new(&config));
        let host: Arc<dyn RepoHost> = Arc::new(GithubClient::new(
            http_client.clone(),
            planner.clone(),
            config.github_token.clone(),
        ));
        let embedder: Option<Arc<dyn Embedder>> = if config.use_embeddings {
            Some(Arc::new(HttpEmbedder::new(http_client.clone(), config.llm.clone())))
        } else {
            None
        };
        let refiner: Option<Arc<dyn Refiner>> = if config.use_refinement {
            Some(Arc::new(HttpRefiner::new(http_client, config.llm.clone())))
        } else {
            None
        };
        let store = MissionStore::open(&config.missions_dir())?;

        Ok(Self { config, cache, planner, host, embedder, refiner, store })
    }
}
