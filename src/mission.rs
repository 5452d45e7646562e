use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Weights;
use crate::error::DiscoveryError;
use crate::models::{RepositoryRecord, ScoredRepo};
use crate::refine::Refinement;

/// The phase the mission will execute next. `Finalized` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Gathering,
    Probing,
    Scoring,
    Refining,
    Finalized,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Gathering => "gathering",
            Phase::Probing => "probing",
            Phase::Scoring => "scoring",
            Phase::Refining => "refining",
            Phase::Finalized => "finalized",
        }
    }
}

/// Run-level counters persisted with the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionMetrics {
    pub candidates: usize,
    pub probed: usize,
    pub selected: usize,
    pub weights: Option<Weights>,
}

/// One complete, persisted, resumable discovery run.
///
/// Mutated exclusively by the orchestrator, exactly once per completed
/// phase, and persisted after every transition. A crash mid-run resumes at
/// `phase` with all earlier phases' outputs intact. A set `error` records a
/// failed attempt; the phase cursor still points at the phase to rerun.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub run_id: Uuid,
    pub goal: String,
    pub topics: Vec<String>,
    pub phase: Phase,
    #[serde(default)]
    pub candidates: Vec<RepositoryRecord>,
    #[serde(default)]
    pub probed: Vec<RepositoryRecord>,
    #[serde(default)]
    pub selection: Vec<ScoredRepo>,
    #[serde(default)]
    pub refinement: Option<Refinement>,
    #[serde(default)]
    pub metrics: MissionMetrics,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(goal: impl Into<String>, topics: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            goal: goal.into(),
            topics,
            phase: Phase::Gathering,
            candidates: Vec::new(),
            probed: Vec::new(),
            selection: Vec::new(),
            refinement: None,
            metrics: MissionMetrics::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == Phase::Finalized
    }
}

/// Durable mission storage: one JSON file per run id, written atomically.
/// This is the system's sole output artifact, so write failures are fatal.
pub struct MissionStore {
    dir: PathBuf,
}

impl MissionStore {
    pub fn open(dir: &Path) -> Result<Self, DiscoveryError> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create mission dir {}", dir.display()))
            .map_err(DiscoveryError::Persistence)?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn save(&self, mission: &Mission) -> Result<(), DiscoveryError> {
        let path = self.path_for(mission.run_id);
        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(mission)
            .map_err(|e| DiscoveryError::Persistence(anyhow!(e)))?;
        std::fs::write(&tmp_path, &data)
            .with_context(|| format!("Failed to write mission {}", mission.run_id))
            .map_err(DiscoveryError::Persistence)?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to replace mission {}", mission.run_id))
            .map_err(DiscoveryError::Persistence)?;
        tracing::debug!("mission {} persisted at phase {}", mission.run_id, mission.phase.as_str());
        Ok(())
    }

    pub fn load(&self, run_id: Uuid) -> Result<Option<Mission>, DiscoveryError> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read mission {run_id}"))
            .map_err(DiscoveryError::Persistence)?;
        let mission = serde_json::from_str(&data)
            .with_context(|| format!("Mission {run_id} is corrupt"))
            .map_err(DiscoveryError::Persistence)?;
        Ok(Some(mission))
    }

    fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}
