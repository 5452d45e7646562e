use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use repo_scout::config::Config;
use repo_scout::orchestrator::Orchestrator;
use repo_scout::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Topics: {}", config.topics.join(", "));
    if config.use_embeddings || config.use_refinement {
        tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);
    }

    // REPO_SCOUT_RUN_ID resumes a previously interrupted mission.
    let resume = match std::env::var("REPO_SCOUT_RUN_ID") {
        Ok(raw) => Some(Uuid::parse_str(&raw)?),
        Err(_) => None,
    };

    let state = AppState::new(config)?;
    let orchestrator = Orchestrator::new(state);

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping at the next phase boundary");
            cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    let mission = orchestrator.run(resume).await?;

    if !mission.is_finalized() {
        println!(
            "Mission {} paused at phase {}. Resume with REPO_SCOUT_RUN_ID={}",
            mission.run_id,
            mission.phase.as_str(),
            mission.run_id
        );
        return Ok(());
    }

    println!("\nMission {} complete.\n", mission.run_id);
    for (rank, scored) in mission.selection.iter().enumerate() {
        println!(
            "{:>2}. {:<40} gem={:.3}  novelty={:.2} health={:.2} relevance={:.2}  ★{}",
            rank + 1,
            scored.record.id.as_str(),
            scored.scores.composite,
            scored.scores.novelty,
            scored.scores.health,
            scored.scores.relevance,
            scored.record.stars,
        );
        println!("    {}", scored.record.url);
    }
    if let Some(refinement) = &mission.refinement {
        println!("\nRefined goal: {}", refinement.refined_goal);
        if !refinement.repository_synergy.is_empty() {
            println!("Synergy: {}", refinement.repository_synergy);
        }
    }

    Ok(())
}
