use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{RepoId, RepositoryRecord};
use crate::planner::{EndpointClass, Planner};

const GH_API: &str = "https://api.github.com";
const GH_ACCEPT: &str = "application/vnd.github+json";
const GH_VERSION: &str = "2022-11-28";
const MAX_ATTEMPTS: u32 = 3;

/// The search service, seen through the narrowest interface the pipeline
/// needs. The gather and probe phases only ever talk to this trait, which
/// keeps them testable without a network.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// One page of repository search results, in the service's relevance
    /// order. An empty page means the query is exhausted.
    async fn search_page(&self, query: &str, page: u32, per_page: usize)
        -> Result<Vec<RepositoryRecord>>;

    async fn fetch_readme(&self, id: &RepoId, max_chars: usize) -> Result<String>;

    async fn has_ci(&self, id: &RepoId) -> Result<bool>;

    async fn has_tests(&self, id: &RepoId) -> Result<bool>;

    async fn has_manifest(&self, id: &RepoId) -> Result<bool>;

    /// Age of the latest release in days, `None` if the repo has none.
    async fn latest_release_age_days(&self, id: &RepoId) -> Result<Option<f64>>;

    async fn owner_followers(&self, owner: &str) -> Result<u64>;
}

/// GitHub REST implementation of [`RepoHost`]. Every call goes through the
/// planner; rate-limit headers feed back into it.
pub struct GithubClient {
    client: reqwest::Client,
    planner: Arc<Planner>,
    token: Option<String>,
    base_url: String,
}

impl GithubClient {
    pub fn new(client: reqwest::Client, planner: Arc<Planner>, token: Option<String>) -> Self {
        Self { client, planner, token, base_url: GH_API.to_string() }
    }

    /// GET a GitHub endpoint with planner gating, header reconciliation and
    /// bounded backoff. `Ok(None)` means 404, which several probes treat as
    /// a plain "no".
    async fn gh_get(
        &self,
        class: EndpointClass,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<serde_json::Value>> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..MAX_ATTEMPTS {
            self.planner.acquire(class).await;

            let mut req = self
                .client
                .get(&url)
                .header("Accept", GH_ACCEPT)
                .header("X-GitHub-Api-Version", GH_VERSION)
                .header("User-Agent", "repo-scout")
                .query(query);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt + 1 == MAX_ATTEMPTS {
                        return Err(e).with_context(|| format!("GET {url} failed"));
                    }
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
            };

            self.reconcile_from_headers(class, resp.headers());

            let status = resp.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == reqwest::StatusCode::FORBIDDEN
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            {
                // Secondary rate limit or shared-quota exhaustion the local
                // bookkeeping missed. The reconcile above already adopted the
                // authoritative window; retry after it.
                tracing::warn!("{} returned {status}, repacing and retrying", class.as_str());
                if attempt + 1 == MAX_ATTEMPTS {
                    anyhow::bail!("GET {url} rate limited after {MAX_ATTEMPTS} attempts");
                }
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                if attempt + 1 == MAX_ATTEMPTS {
                    anyhow::bail!("GET {url} returned {status}: {body}");
                }
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }

            let body = resp.json().await.with_context(|| format!("GET {url}: bad JSON"))?;
            return Ok(Some(body));
        }
        anyhow::bail!("GET {url} failed after {MAX_ATTEMPTS} attempts")
    }

    fn reconcile_from_headers(&self, class: EndpointClass, headers: &reqwest::header::HeaderMap) {
        let remaining = header_u64(headers, "x-ratelimit-remaining");
        let reset_epoch = header_u64(headers, "x-ratelimit-reset");
        if let (Some(remaining), Some(reset_epoch)) = (remaining, reset_epoch) {
            let reset_in = (reset_epoch as i64 - Utc::now().timestamp()).max(0) as u64;
            self.planner
                .reconcile(class, remaining as u32, Duration::from_secs(reset_in));
        }
    }

    async fn code_search_count(&self, q: &str) -> Result<u64> {
        let body = self
            .gh_get(
                EndpointClass::CodeSearch,
                "/search/code",
                &[("q", q.to_string()), ("per_page", "1".to_string())],
            )
            .await?;
        Ok(body
            .and_then(|b| b.get("total_count").and_then(|c| c.as_u64()))
            .unwrap_or(0))
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn backoff(attempt: u32) -> Duration {
    let base = Duration::from_secs(1 << attempt.min(5));
    let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 10);
    base + Duration::from_millis(jitter)
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

/// One search listing. Everything except the identity is optional because
/// the service occasionally returns partial records.
#[derive(Deserialize)]
struct SearchItem {
    full_name: Option<String>,
    html_url: Option<String>,
    description: Option<String>,
    language: Option<String>,
    license: Option<LicenseField>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    fork: bool,
    created_at: Option<DateTime<Utc>>,
    pushed_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct LicenseField {
    spdx_id: Option<String>,
}

impl SearchItem {
    fn into_record(self) -> Option<RepositoryRecord> {
        let full_name = self.full_name?;
        let id = RepoId::new(full_name);
        let url = self
            .html_url
            .unwrap_or_else(|| format!("https://github.com/{id}"));
        let mut record = RepositoryRecord::from_listing(id, url);
        record.description = self.description;
        record.language = self.language;
        record.license = self.license.and_then(|l| l.spdx_id).filter(|s| s != "NOASSERTION");
        record.stars = self.stargazers_count;
        record.forks = self.forks_count;
        record.is_fork = self.fork;
        record.created_at = self.created_at;
        record.pushed_at = self.pushed_at;
        Some(record)
    }
}

#[async_trait]
impl RepoHost for GithubClient {
    async fn search_page(
        &self,
        query: &str,
        page: u32,
        per_page: usize,
    ) -> Result<Vec<RepositoryRecord>> {
        let body = self
            .gh_get(
                EndpointClass::Search,
                "/search/repositories",
                &[
                    ("q", query.to_string()),
                    ("sort", "stars".to_string()),
                    ("order", "desc".to_string()),
                    ("per_page", per_page.to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?
            .context("search endpoint returned 404")?;

        let parsed: SearchResponse = serde_json::from_value(body)?;
        // Malformed items (no identity) are dropped, not propagated.
        Ok(parsed.items.into_iter().filter_map(SearchItem::into_record).collect())
    }

    async fn fetch_readme(&self, id: &RepoId, max_chars: usize) -> Result<String> {
        let body = self
            .gh_get(EndpointClass::Rest, &format!("/repos/{id}/readme"), &[])
            .await?;
        let Some(body) = body else { return Ok(String::new()) };

        let encoded: String = body
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("README content is not valid base64")?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(truncate_chars(&text, max_chars))
    }

    async fn has_ci(&self, id: &RepoId) -> Result<bool> {
        let body = self
            .gh_get(
                EndpointClass::Rest,
                &format!("/repos/{id}/contents/.github/workflows"),
                &[],
            )
            .await?;
        Ok(body.is_some())
    }

    async fn has_tests(&self, id: &RepoId) -> Result<bool> {
        if self.code_search_count(&format!("repo:{id} path:tests")).await? > 0 {
            return Ok(true);
        }
        Ok(self
            .code_search_count(&format!("repo:{id} filename:*test*"))
            .await?
            > 0)
    }

    async fn has_manifest(&self, id: &RepoId) -> Result<bool> {
        let q = format!(
            "repo:{id} filename:pyproject.toml OR filename:package.json \
             OR filename:Cargo.toml OR filename:go.mod"
        );
        Ok(self.code_search_count(&q).await? > 0)
    }

    async fn latest_release_age_days(&self, id: &RepoId) -> Result<Option<f64>> {
        let body = self
            .gh_get(EndpointClass::Rest, &format!("/repos/{id}/releases/latest"), &[])
            .await?;
        let Some(body) = body else { return Ok(None) };

        let published: Option<DateTime<Utc>> = body
            .get("published_at")
            .and_then(|p| p.as_str())
            .and_then(|p| p.parse().ok());
        Ok(published.map(|p| {
            ((Utc::now() - p).num_seconds() as f64 / 86_400.0).max(0.0)
        }))
    }

    async fn owner_followers(&self, owner: &str) -> Result<u64> {
        let body = self
            .gh_get(EndpointClass::Rest, &format!("/users/{owner}"), &[])
            .await?;
        Ok(body
            .and_then(|b| b.get("followers").and_then(|f| f.as_u64()))
            .unwrap_or(0))
    }
}

/// Truncate to at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_item_without_identity_is_dropped() {
        let item = SearchItem {
            full_name: None,
            html_url: None,
            description: None,
            language: None,
            license: None,
            stargazers_count: 0,
            forks_count: 0,
            fork: false,
            created_at: None,
            pushed_at: None,
        };
        assert!(item.into_record().is_none());
    }

    #[test]
    fn test_noassertion_license_treated_as_missing() {
        let json = serde_json::json!({
            "full_name": "a/b",
            "html_url": "https://github.com/a/b",
            "license": { "spdx_id": "NOASSERTION" }
        });
        let item: SearchItem = serde_json::from_value(json).unwrap();
        let record = item.into_record().unwrap();
        assert!(record.license.is_none());
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let text = "héllo wörld";
        let cut = truncate_chars(text, 3);
        assert_eq!(cut, "hél");

        // Multi-byte-only text must not split inside a character.
        assert_eq!(truncate_chars("日本語テキスト", 2), "日本");
        assert_eq!(truncate_chars("ok", 10), "ok");
    }
}
