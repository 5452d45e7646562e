use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::models::ScoredRepo;

/// The refinement payload attached to a finalized mission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Refinement {
    pub refined_goal: String,
    #[serde(default)]
    pub repository_synergy: String,
    #[serde(default)]
    pub technical_architecture: String,
}

/// Optional text-generation collaborator, invoked at most once per mission.
/// Its absence is a normal, first-class path: the orchestrator goes straight
/// from scoring to finalized when no refiner is configured.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, goal: &str, selection: &[ScoredRepo]) -> Result<Refinement>;
}

/// Chat-completion refiner for Ollama or OpenAI-compatible providers.
pub struct HttpRefiner {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpRefiner {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Refiner for HttpRefiner {
    async fn refine(&self, goal: &str, selection: &[ScoredRepo]) -> Result<Refinement> {
        let prompt = build_prompt(goal, selection);

        let response = match self.config.provider.as_str() {
            "ollama" => call_ollama(&self.client, &self.config, &prompt).await?,
            "openai" => call_openai(&self.client, &self.config, &prompt).await?,
            other => anyhow::bail!("Unknown LLM provider: {other}"),
        };

        Ok(parse_refinement(goal, &response))
    }
}

fn build_prompt(goal: &str, selection: &[ScoredRepo]) -> String {
    let sources: Vec<serde_json::Value> = selection
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.record.id.as_str(),
                "url": s.record.url,
                "description": s.record.description,
                "concepts": s.record.concepts.iter().take(5).collect::<Vec<_>>(),
                "gem_score": s.scores.composite,
            })
        })
        .collect();
    let context = serde_json::to_string_pretty(&sources).unwrap_or_default();

    format!(
        "You are a software architecture analyst. Given a discovery goal and a ranked set of \
         repositories, refine the goal and explain how the repositories combine.\n\n\
         GOAL: {goal}\n\nREPOSITORIES:\n{context}\n\n\
         Respond with ONLY a JSON object with keys \"refined_goal\", \
         \"repository_synergy\" and \"technical_architecture\". No explanation."
    )
}

/// Extract the JSON object from the model's response. An unparseable reply
/// degrades to the original goal rather than failing the mission.
fn parse_refinement(goal: &str, content: &str) -> Refinement {
    let json_str = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content,
    };

    match serde_json::from_str::<Refinement>(json_str) {
        Ok(mut refinement) => {
            if refinement.refined_goal.is_empty() {
                refinement.refined_goal = goal.to_string();
            }
            refinement
        }
        Err(e) => {
            tracing::warn!("Failed to parse refinement: {e}. Raw: {content}");
            Refinement { refined_goal: goal.to_string(), ..Refinement::default() }
        }
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

async fn call_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaChatRequest {
        model: config.chat_model.clone(),
        messages: vec![Message { role: "user".to_string(), content: prompt.to_string() }],
        stream: false,
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama chat API for refinement")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let body: OllamaChatResponse = resp.json().await?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Message,
}

async fn call_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let req = OpenAiChatRequest {
        model: config.chat_model.clone(),
        messages: vec![Message { role: "user".to_string(), content: prompt.to_string() }],
        temperature: 0.3,
    };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI chat API for refinement")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp.json().await?;
    body.choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .context("OpenAI chat API returned no choices")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_refinement_extracts_embedded_json() {
        let raw = "Here you go:\n{\"refined_goal\": \"build X\", \
                   \"repository_synergy\": \"A feeds B\", \
                   \"technical_architecture\": \"pipeline\"}\nDone.";
        let r = parse_refinement("original", raw);
        assert_eq!(r.refined_goal, "build X");
        assert_eq!(r.repository_synergy, "A feeds B");
    }

    #[test]
    fn test_parse_refinement_falls_back_to_original_goal() {
        let r = parse_refinement("original goal", "not json at all");
        assert_eq!(r.refined_goal, "original goal");
        assert!(r.repository_synergy.is_empty());
    }
}
