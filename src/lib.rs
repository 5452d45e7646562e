//! # repo-scout
//!
//! A discovery engine that finds, scores, and ranks "gem" repositories on a
//! code host: projects that are young, active, healthy, and relevant to a
//! stated goal, surfaced before raw star counts make them obvious.
//!
//! ## Pipeline
//!
//! A mission runs as a persisted state machine:
//!
//! ```text
//!   ┌────────────┐   topic queries    ┌────────────┐   deep signals
//!   │ Gathering  │ ─────────────────▶ │  Probing   │ ──────────────┐
//!   │ search API │   dedup + filter   │ CI, tests, │               │
//!   └────────────┘                    │ README,    │               ▼
//!                                     │ releases   │        ┌────────────┐
//!                                     └────────────┘        │  Scoring   │
//!                                                           │ novelty    │
//!   ┌────────────┐                    ┌────────────┐        │ health     │
//!   │ Finalized  │ ◀───────────────── │  Refining  │ ◀───── │ relevance  │
//!   │ mission on │     optional LLM   │ (optional) │ greedy │ author rep │
//!   │ disk       │       summary      └────────────┘ select │ diversity  │
//!   └────────────┘                                          └────────────┘
//! ```
//!
//! Every call to the host rides through a rate-limit planner that paces
//! requests per endpoint class, so a mission can chew through hundreds of
//! lookups without tripping the service's limits. Each completed phase is
//! persisted, so an interrupted mission resumes where it left off.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration: topics, weights, quotas, LLM settings
//! - [`models`] - Shared data types: `RepoId`, `RepositoryRecord`, `ScoreSet`, `ScoredRepo`
//! - [`error`] - The `DiscoveryError` taxonomy shared by the whole pipeline
//! - [`planner`] - Rolling-window quota budgets with fair FIFO admission and pacing
//! - [`github`] - The `RepoHost` trait and its GitHub REST implementation
//! - [`cache`] - Persistent repository cache keyed by identity, with staleness
//! - [`gather`] - Topic search, deduplication, and license filtering
//! - [`probe`] - Concurrent deep probing: README, CI, tests, releases, concepts
//! - [`score`] - The gem score: novelty, health, relevance, author reputation
//! - [`select`] - Greedy diversity-aware selection of the final ranked set
//! - [`embed`] - Batch embedding generation via Ollama or OpenAI-compatible APIs
//! - [`refine`] - Optional LLM refinement of the goal against the selection
//! - [`mission`] - The persisted, resumable mission record and its store
//! - [`orchestrator`] - The phase driver: timeouts, persistence, resumption
//! - [`state`] - Shared application state wiring all collaborators together

pub mod cache;
pub mod config;
pub mod embed;
pub mod error;
pub mod gather;
pub mod github;
pub mod mission;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod probe;
pub mod refine;
pub mod score;
pub mod select;
pub mod state;
pub mod testing;
