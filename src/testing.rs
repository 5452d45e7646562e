//! In-memory [`RepoHost`] double used by unit and integration tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::github::RepoHost;
use crate::models::{RepoId, RepositoryRecord};

/// Secondary signals the fake serves for one repository.
#[derive(Debug, Clone, Default)]
pub struct FakeSignals {
    pub readme: String,
    pub has_ci: bool,
    pub has_tests: bool,
    pub has_manifest: bool,
    pub release_age_days: Option<f64>,
    pub followers: u64,
}

/// A scripted search service: every query returns the same catalog, paged.
/// Call counters let tests assert that cached identities trigger no network.
#[derive(Default)]
pub struct FakeHost {
    catalog: Mutex<Vec<RepositoryRecord>>,
    signals: Mutex<HashMap<RepoId, FakeSignals>>,
    failing: Mutex<HashSet<RepoId>>,
    pub search_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
}

impl FakeHost {
    pub fn add_repo(&self, full_name: &str, stars: u64) {
        self.add_repo_with_license(full_name, stars, Some("MIT"));
    }

    pub fn add_repo_with_license(&self, full_name: &str, stars: u64, license: Option<&str>) {
        let id = RepoId::new(full_name);
        let mut record =
            RepositoryRecord::from_listing(id, format!("https://github.com/{full_name}"));
        record.stars = stars;
        record.license = license.map(|l| l.to_string());
        self.catalog.lock().push(record);
    }

    pub fn add_record(&self, record: RepositoryRecord) {
        self.catalog.lock().push(record);
    }

    pub fn set_signals(&self, full_name: &str, signals: FakeSignals) {
        self.signals.lock().insert(RepoId::new(full_name), signals);
    }

    /// Make every probe endpoint fail for this repository.
    pub fn fail_probes_for(&self, full_name: &str) {
        self.failing.lock().insert(RepoId::new(full_name));
    }

    pub fn search_call_count(&self) -> usize {
        self.search_calls.load(Ordering::Relaxed)
    }

    pub fn probe_call_count(&self) -> usize {
        self.probe_calls.load(Ordering::Relaxed)
    }

    fn signals_for(&self, id: &RepoId) -> Result<FakeSignals> {
        self.probe_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.lock().contains(id) {
            bail!("simulated upstream failure for {id}");
        }
        Ok(self.signals.lock().get(id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RepoHost for FakeHost {
    async fn search_page(
        &self,
        _query: &str,
        page: u32,
        per_page: usize,
    ) -> Result<Vec<RepositoryRecord>> {
        self.search_calls.fetch_add(1, Ordering::Relaxed);
        let catalog = self.catalog.lock();
        let start = (page.saturating_sub(1) as usize) * per_page;
        Ok(catalog.iter().skip(start).take(per_page).cloned().collect())
    }

    async fn fetch_readme(&self, id: &RepoId, max_chars: usize) -> Result<String> {
        let readme = self.signals_for(id)?.readme;
        // Count characters, like the real client; byte-index truncation
        // panics inside multi-byte characters.
        Ok(readme.chars().take(max_chars).collect())
    }

    async fn has_ci(&self, id: &RepoId) -> Result<bool> {
        Ok(self.signals_for(id)?.has_ci)
    }

    async fn has_tests(&self, id: &RepoId) -> Result<bool> {
        Ok(self.signals_for(id)?.has_tests)
    }

    async fn has_manifest(&self, id: &RepoId) -> Result<bool> {
        Ok(self.signals_for(id)?.has_manifest)
    }

    async fn latest_release_age_days(&self, id: &RepoId) -> Result<Option<f64>> {
        Ok(self.signals_for(id)?.release_age_days)
    }

    async fn owner_followers(&self, owner: &str) -> Result<u64> {
        self.probe_calls.fetch_add(1, Ordering::Relaxed);
        let signals = self.signals.lock();
        Ok(signals
            .iter()
            .find(|(id, _)| id.owner() == owner)
            .map(|(_, s)| s.followers)
            .unwrap_or(0))
    }
}
